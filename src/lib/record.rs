//! Records accepted by the write path.
//!
//! A [`Record`] can only be obtained through [`Record::parse`] or
//! [`Record::new`], both of which run the structural validation in
//! [`crate::validation`]; derived period-start fields are attached at
//! construction and the write-time marker just before storage.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    document::{Document, FieldValue},
    error::{BucketError, Result},
    timeutils,
    validation::{self, TIMESTAMP_FIELD},
};

pub const UPDATED_AT_FIELD: &str = "_updated_at";
pub const WEEK_START_FIELD: &str = "_week_start_at";
pub const MONTH_START_FIELD: &str = "_month_start_at";

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    data: Document,
    meta: Document,
}

impl Record {
    /// Builds a record from already-typed fields.
    pub fn new(data: Document) -> Result<Self> {
        validation::validate_record_data(&data)?;

        let mut meta = Document::new();
        if let Some(timestamp) = data.get(TIMESTAMP_FIELD).and_then(FieldValue::as_timestamp) {
            meta.insert(
                WEEK_START_FIELD.to_string(),
                FieldValue::Timestamp(timeutils::week_start(timestamp)),
            );
            meta.insert(
                MONTH_START_FIELD.to_string(),
                FieldValue::Timestamp(timeutils::month_start(timestamp)),
            );
        }
        Ok(Self { data, meta })
    }

    /// Parses a single JSON object into a record.
    pub fn parse(raw: &Value) -> Result<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| BucketError::Parse("record must be a JSON object".into()))?;

        let mut data = Document::new();
        let mut entries: Vec<(&String, &Value)> = object.iter().collect();
        entries.sort_by(|lhs, rhs| lhs.0.cmp(rhs.0));

        for (key, value) in entries {
            if key == TIMESTAMP_FIELD {
                if let Value::String(text) = value {
                    let timestamp = timeutils::parse_time_string(text).ok_or_else(|| {
                        BucketError::Parse(
                            "_timestamp is not a valid timestamp, it must be ISO8601".into(),
                        )
                    })?;
                    data.insert(key.clone(), FieldValue::Timestamp(timestamp));
                    continue;
                }
            }
            validation::validate_key(key)?;
            let value = FieldValue::from_json(value).ok_or_else(|| {
                BucketError::Validation(format!("{key} has an invalid value"))
            })?;
            data.insert(key.clone(), value);
        }

        Self::new(data)
    }

    /// Accepts either one object or a list of objects.
    pub fn parse_all(raw: &Value) -> Result<Vec<Self>> {
        match raw {
            Value::Array(items) => items.iter().map(Self::parse).collect(),
            other => Ok(vec![Self::parse(other)?]),
        }
    }

    /// Stamps the record with the current write time. Called once per store.
    pub fn add_updated_at(mut self) -> Self {
        self.meta.insert(
            UPDATED_AT_FIELD.to_string(),
            FieldValue::Timestamp(timeutils::now()),
        );
        self
    }

    pub fn data(&self) -> &Document {
        &self.data
    }

    pub fn meta(&self) -> &Document {
        &self.meta
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.data
            .get(TIMESTAMP_FIELD)
            .and_then(FieldValue::as_timestamp)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.meta
            .get(UPDATED_AT_FIELD)
            .and_then(FieldValue::as_timestamp)
    }

    /// Flattens data and meta fields into one document; meta wins on collision.
    pub fn to_storage_representation(&self) -> Document {
        let mut document = self.data.clone();
        document.extend(
            self.meta
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        document
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn timestamp_strings_are_parsed_and_periods_derived() {
        let record = Record::parse(&json!({"_timestamp": "2013-04-03T12:00:00Z", "x": 1}))
            .expect("valid record");

        let stored = record.to_storage_representation();
        assert_eq!(
            stored[WEEK_START_FIELD],
            FieldValue::Timestamp(Utc.with_ymd_and_hms(2013, 4, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            stored[MONTH_START_FIELD],
            FieldValue::Timestamp(Utc.with_ymd_and_hms(2013, 4, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(stored["x"], FieldValue::Integer(1));
    }

    #[test]
    fn records_without_timestamp_have_no_period_fields() {
        let record = Record::parse(&json!({"name": "alice"})).expect("valid record");
        assert!(record.meta().is_empty());
        assert!(record.timestamp().is_none());
    }

    #[test]
    fn malformed_timestamp_is_a_parse_error() {
        let err = Record::parse(&json!({"_timestamp": "yesterday"})).unwrap_err();
        assert!(matches!(err, BucketError::Parse(_)));
        assert_eq!(
            err.to_string(),
            "_timestamp is not a valid timestamp, it must be ISO8601"
        );
    }

    #[test]
    fn out_of_range_years_are_a_parse_error() {
        for value in ["-262143-01-01T00:00:00+00:00", "+262142-12-31T00:00:00+00:00"] {
            let err = Record::parse(&json!({"_timestamp": value})).unwrap_err();
            assert_eq!(
                err.to_string(),
                "_timestamp is not a valid timestamp, it must be ISO8601",
                "{value}"
            );
        }
    }

    #[test]
    fn non_string_timestamp_fails_validation() {
        let err = Record::parse(&json!({"_timestamp": 1234})).unwrap_err();
        assert!(matches!(err, BucketError::Validation(_)));
    }

    #[test]
    fn invalid_keys_and_values_are_rejected() {
        let err = Record::parse(&json!({"foo-bar": 1})).unwrap_err();
        assert_eq!(err.to_string(), "foo-bar is not a valid key");

        let err = Record::parse(&json!({"_secret": 1})).unwrap_err();
        assert_eq!(err.to_string(), "_secret is not a recognised internal field");

        let err = Record::parse(&json!({"nested": {"a": 1}})).unwrap_err();
        assert_eq!(err.to_string(), "nested has an invalid value");

        let err = Record::parse(&json!({"missing": null})).unwrap_err();
        assert_eq!(err.to_string(), "missing has an invalid value");
    }

    #[test]
    fn parse_all_accepts_single_object_or_list() {
        assert_eq!(Record::parse_all(&json!({"name": "a"})).unwrap().len(), 1);
        assert_eq!(
            Record::parse_all(&json!([{"name": "a"}, {"name": "b"}]))
                .unwrap()
                .len(),
            2
        );
        assert!(Record::parse_all(&json!(["scalar"])).is_err());
    }

    #[test]
    fn updated_at_is_refreshed_on_every_call() {
        let record = Record::parse(&json!({"name": "a"})).unwrap();
        assert!(record.updated_at().is_none());

        let first = record.clone().add_updated_at();
        let stamped = first.updated_at().expect("stamped");
        let second = first.add_updated_at();
        assert!(second.updated_at().expect("restamped") >= stamped);
        assert!(
            second
                .to_storage_representation()
                .contains_key(UPDATED_AT_FIELD)
        );
    }
}
