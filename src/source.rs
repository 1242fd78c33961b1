// Input loading: JSON-lines objects with configurable id/text field names.
// Rows with absent or blank text are dropped here, before the pipeline sees them.

use crate::domain::{Record, RecordId};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read input {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: invalid JSON: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: expected a JSON object")]
    NotAnObject { line: usize },
    #[error("line {line}: field '{field}' is missing or not a string/number")]
    InvalidId { line: usize, field: String },
    #[error("line {line}: field '{field}' is not a string")]
    InvalidText { line: usize, field: String },
    #[error("line {line}: duplicate record id '{id}'")]
    DuplicateId { line: usize, id: RecordId },
}

#[derive(Debug, Clone)]
pub struct SourceFields {
    pub id_field: String,
    pub text_field: String,
}

impl Default for SourceFields {
    fn default() -> Self {
        Self {
            id_field: "comment_id".to_string(),
            text_field: "comment_text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    pub records: Vec<Record>,
    /// Rows dropped because their text was absent, null or blank.
    pub skipped: usize,
}

pub async fn load_records(
    path: &Path,
    fields: &SourceFields,
) -> Result<LoadedRecords, SourceError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let loaded = parse_records(&content, fields)?;
    info!(
        "Loaded {} records from {} ({} dropped for missing text)",
        loaded.records.len(),
        path.display(),
        loaded.skipped
    );
    Ok(loaded)
}

pub fn parse_records(content: &str, fields: &SourceFields) -> Result<LoadedRecords, SourceError> {
    let mut loaded = LoadedRecords::default();
    let mut seen = HashSet::new();

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        if raw.trim().is_empty() {
            continue;
        }

        let value: Value =
            serde_json::from_str(raw).map_err(|source| SourceError::Parse { line, source })?;
        let Value::Object(object) = value else {
            return Err(SourceError::NotAnObject { line });
        };

        let id = match object.get(&fields.id_field) {
            Some(Value::String(s)) if !s.is_empty() => RecordId::new(s.as_str()),
            Some(Value::Number(n)) => RecordId::new(n.to_string()),
            _ => {
                return Err(SourceError::InvalidId {
                    line,
                    field: fields.id_field.clone(),
                });
            }
        };

        let text = match object.get(&fields.text_field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()).filter(|t| !t.trim().is_empty()),
            Some(_) => {
                return Err(SourceError::InvalidText {
                    line,
                    field: fields.text_field.clone(),
                });
            }
        };

        let Some(text) = text else {
            loaded.skipped += 1;
            continue;
        };

        if !seen.insert(id.clone()) {
            return Err(SourceError::DuplicateId { line, id });
        }
        loaded.records.push(Record::new(id, text));
    }

    Ok(loaded)
}
