use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    document::{Document, FieldValue},
    error::{BucketError, Result},
    timeutils,
};

pub const TIMESTAMP_FIELD: &str = "_timestamp";
pub const ID_FIELD: &str = "_id";
pub const RESERVED_KEYWORDS: &[&str] = &[TIMESTAMP_FIELD, ID_FIELD];

static BUCKET_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]+$").expect("valid bucket name regex"));
static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]+$").expect("valid key regex"));
static DATETIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}(?:[+-][0-9]{2}:?[0-9]{2}|Z)$")
        .expect("valid datetime regex")
});

pub fn bucket_name_is_valid(name: &str) -> bool {
    BUCKET_NAME_RE.is_match(name)
}

pub fn key_is_valid(key: &str) -> bool {
    !key.is_empty() && KEY_RE.is_match(&key.to_lowercase())
}

pub fn key_is_reserved(key: &str) -> bool {
    RESERVED_KEYWORDS.contains(&key)
}

pub fn key_is_internal(key: &str) -> bool {
    key.starts_with('_')
}

pub fn value_is_valid_id(value: &FieldValue) -> bool {
    match value.as_str() {
        Some(id) => !id.is_empty() && !id.chars().any(char::is_whitespace),
        None => false,
    }
}

/// Strict `YYYY-MM-DDTHH:MM:SS` plus offset, naming a real calendar instant.
pub fn value_is_valid_datetime_string(value: &str) -> bool {
    DATETIME_RE.is_match(value) && timeutils::parse_time_string(value).is_some()
}

pub fn validate_key(key: &str) -> Result<()> {
    if !key_is_valid(key) {
        return Err(invalid(format!("{key} is not a valid key")));
    }
    if key_is_internal(key) && !key_is_reserved(key) {
        return Err(invalid(format!("{key} is not a recognised internal field")));
    }
    Ok(())
}

/// Structural checks applied to every record before it can be constructed.
pub fn validate_record_data(data: &Document) -> Result<()> {
    for (key, value) in data {
        validate_key(key)?;
        if key == TIMESTAMP_FIELD && value.as_timestamp().is_none() {
            return Err(invalid("_timestamp is not a valid datetime object"));
        }
        if key == ID_FIELD && !value_is_valid_id(value) {
            return Err(invalid("_id is not a valid id"));
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> BucketError {
    BucketError::Validation(message.into())
}
