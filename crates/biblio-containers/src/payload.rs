//! Decoding one container's bytes into its list of top-level records.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use serde_json::{Map, Value};

use crate::error::ContainerError;
use crate::xml;

/// XML declaration that separates the documents of a concatenated payload.
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// How the bytes of a container are turned into records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadFormat {
    /// One JSON document. With `records_key`, the records are the array
    /// stored under that key of the top-level object; without it, a
    /// top-level array is the record list and any other value is a single
    /// record.
    Json { records_key: Option<String> },
    /// One JSON value per non-blank line.
    JsonLines,
    /// One XML document forming a single record.
    Xml,
    /// Several XML documents concatenated, split on `delimiter`.
    XmlFragments { delimiter: String },
    /// Delimited text with a header row; each row becomes an object keyed
    /// by the header names, all values as strings.
    Csv { delimiter: u8 },
}

impl PayloadFormat {
    /// JSON documents whose records live under `key` (e.g. `"items"`).
    pub fn json_items(key: &str) -> Self {
        Self::Json { records_key: Some(key.to_string()) }
    }

    /// Concatenated XML documents split on the standard UTF-8 declaration.
    pub fn xml_fragments() -> Self {
        Self::XmlFragments { delimiter: XML_DECLARATION.to_string() }
    }

    /// Decodes `bytes` read from the container called `name`.
    pub fn decode(&self, name: &str, bytes: &[u8]) -> Result<Vec<Value>, ContainerError> {
        match self {
            Self::Json { records_key } => decode_json(name, bytes, records_key.as_deref()),
            Self::JsonLines => decode_json_lines(name, bytes),
            Self::Xml => Ok(vec![xml::parse_document(name, bytes)?]),
            Self::XmlFragments { delimiter } => xml::parse_fragments(name, bytes, delimiter),
            Self::Csv { delimiter } => decode_csv(name, bytes, *delimiter),
        }
    }
}

/// Reads a whole file, gunzipping it when its name ends in `.gz`.
pub fn read_file(path: &Path) -> Result<Vec<u8>, ContainerError> {
    let file = std::fs::File::open(path).map_err(|e| ContainerError::io(path, e))?;
    let mut bytes = Vec::new();
    let gzipped = path.extension().map_or(false, |ext| ext == "gz");
    let result = if gzipped {
        GzDecoder::new(file).read_to_end(&mut bytes)
    } else {
        std::io::BufReader::new(file).read_to_end(&mut bytes)
    };
    result.map_err(|e| ContainerError::io(path, e))?;
    Ok(bytes)
}

fn decode_json(
    name: &str,
    bytes: &[u8],
    records_key: Option<&str>,
) -> Result<Vec<Value>, ContainerError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|source| ContainerError::Json { name: name.to_string(), source })?;

    match (records_key, value) {
        (Some(key), Value::Object(mut map)) => match map.remove(key) {
            Some(Value::Array(records)) => Ok(records),
            _ => Err(ContainerError::MissingRecords { name: name.to_string(), key: key.to_string() }),
        },
        (Some(key), _) => {
            Err(ContainerError::MissingRecords { name: name.to_string(), key: key.to_string() })
        }
        (None, Value::Array(records)) => Ok(records),
        (None, other) => Ok(vec![other]),
    }
}

fn decode_json_lines(name: &str, bytes: &[u8]) -> Result<Vec<Value>, ContainerError> {
    let mut records = Vec::new();
    for line in bytes.split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record = serde_json::from_slice(line)
            .map_err(|source| ContainerError::Json { name: name.to_string(), source })?;
        records.push(record);
    }
    Ok(records)
}

fn decode_csv(name: &str, bytes: &[u8], delimiter: u8) -> Result<Vec<Value>, ContainerError> {
    let csv_err = |source| ContainerError::Csv { name: name.to_string(), source };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers().map_err(csv_err)?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(csv_err)?;
        let mut object = Map::with_capacity(headers.len());
        for (header, field) in headers.iter().zip(row.iter()) {
            object.insert(header.to_string(), Value::String(field.to_string()));
        }
        records.push(Value::Object(object));
    }
    Ok(records)
}
