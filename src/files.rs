use csv::Writer;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::Path;

use crate::dto::{Partitioned, Record};
use crate::error::ServiceError;

/// Reads a data file. A missing or malformed file is a `BadRequest`: the run
/// stops before touching the store.
pub fn load_partitioned(path: &Path) -> Result<Partitioned, ServiceError> {
    let text = fs::read_to_string(path).map_err(|err| {
        ServiceError::bad_request(format!("cannot read {}: {}", path.display(), err))
    })?;
    parse_partitioned(&text)
        .map_err(|err| ServiceError::bad_request(format!("{}: {}", path.display(), err.msg)))
}

pub fn parse_partitioned(text: &str) -> Result<Partitioned, ServiceError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| ServiceError::bad_request(format!("invalid JSON: {err}")))?;
    Partitioned::from_value(value)
}

/// Writes `data` into the file at `path`, keeping whatever other categories the
/// file already holds, and returns the merged contents.
pub fn save_partitioned(path: &Path, data: &Partitioned) -> Result<Partitioned, ServiceError> {
    let mut merged = if path.exists() {
        load_partitioned(path)?
    } else {
        Partitioned::default()
    };
    for (category, records) in &data.partitions {
        merged.insert(category, records.clone());
    }
    for (key, value) in &data.extras {
        merged.extras.insert(key.clone(), value.clone());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ServiceError::internal_server_error)?;
        }
    }
    let json = serde_json::to_string_pretty(&merged.to_value())
        .map_err(ServiceError::internal_server_error)?;
    fs::write(path, json).map_err(|err| {
        ServiceError::internal_server_error(format!("cannot write {}: {}", path.display(), err))
    })?;
    tracing::info!("data saved to {}", path.display());
    Ok(merged)
}

/// One row per record. Columns are the union of top-level fields in the order
/// they first appear; lists are joined with `; `, absent fields left empty.
pub fn write_csv<W: io::Write>(records: &[Record], writer: W) -> Result<(), ServiceError> {
    let mut headers: Vec<&str> = Vec::new();
    for record in records {
        for field in record.keys() {
            if !headers.contains(&field.as_str()) {
                headers.push(field);
            }
        }
    }

    let mut writer = Writer::from_writer(writer);
    writer
        .write_record(&headers)
        .map_err(ServiceError::internal_server_error)?;
    for record in records {
        let row: Vec<String> = headers
            .iter()
            .map(|field| record.get(*field).map(cell).unwrap_or_default())
            .collect();
        writer
            .write_record(&row)
            .map_err(ServiceError::internal_server_error)?;
    }
    writer.flush().map_err(ServiceError::internal_server_error)
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join("; "),
        other => other.to_string(),
    }
}
