//! Decoding of write payloads into [`Record`]s.
//!
//! JSON bodies may hold one object or a list of objects. CSV bodies use the
//! header row as field names and keep every cell as a string, so both formats
//! reach [`Record::parse`] in the same object shape.

use std::{fs::File, io::Read, path::Path};

use serde_json::{Map, Value};

use crate::{
    error::{BucketError, Result},
    record::Record,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Csv,
}

impl PayloadFormat {
    /// `text/csv` (with or without parameters) selects CSV; anything else is JSON.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(value)
                if value
                    .split(';')
                    .next()
                    .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/csv")) =>
            {
                PayloadFormat::Csv
            }
            _ => PayloadFormat::Json,
        }
    }

    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => PayloadFormat::Csv,
            _ => PayloadFormat::Json,
        }
    }
}

pub fn parse_payload(format: PayloadFormat, body: &[u8]) -> Result<Vec<Record>> {
    match format {
        PayloadFormat::Json => records_from_json(body),
        PayloadFormat::Csv => records_from_csv(body),
    }
}

pub fn records_from_json(body: &[u8]) -> Result<Vec<Record>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| BucketError::Parse(format!("invalid json: {err}")))?;
    Record::parse_all(&value)
}

pub fn records_from_csv<R: Read>(reader: R) -> Result<Vec<Record>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let object: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(field, cell)| (field.to_string(), Value::String(cell.to_string())))
            .collect();
        records.push(Record::parse(&Value::Object(object))?);
    }
    Ok(records)
}

pub fn records_from_path(path: &Path) -> Result<Vec<Record>> {
    let mut body = Vec::new();
    File::open(path)?.read_to_end(&mut body)?;
    parse_payload(PayloadFormat::from_path(path), &body)
}
