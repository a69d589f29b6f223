//! Parser for device telemetry exports.
//!
//! An export is tab-separated. The first two rows are boilerplate and are
//! skipped without inspection. Every following row is trimmed, stripped of
//! empty fields, and then read positionally:
//!
//! | pos | field            |
//! |-----|------------------|
//! | 0   | sequence number  |
//! | 1   | inventory id     |
//! | 2   | device id        |
//! | 3   | message id       |
//! | 4   | text             |
//! | 5   | message class    |
//! | 6   | level            |
//! | 7   | area             |
//! | 8   | address          |
//!
//! Dropping empty fields shifts everything after them one position left.
//! Exports rely on this, so it must not be "fixed" here.
//!
//! Parsing is all-or-nothing: one bad row rejects the whole file.

use crate::model::DeviceRecord;
use chrono::Utc;
use csv::StringRecord;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

const HEADER_ROWS: usize = 2;
const FIELD_COUNT: usize = 9;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to open file: {0}")]
    Open(#[from] std::io::Error),

    #[error("missing header row {0}")]
    MissingHeader(usize),

    #[error("error reading row {row}: {source}")]
    Csv {
        row: usize,
        #[source]
        source: csv::Error,
    },

    #[error("row {row}: missing required fields {}", .fields.join(", "))]
    MissingRequiredFields { row: usize, fields: Vec<&'static str> },

    #[error("row {row}: expected 9 fields, found {found}")]
    TooFewFields { row: usize, found: usize },

    #[error("parse task failed: {0}")]
    Task(String),
}

/// Stateless parser; one instance is shared by all workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryParser;

impl TelemetryParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_file(&self, path: &Path, file_name: &str) -> Result<Vec<DeviceRecord>, ParseError> {
        let file = File::open(path)?;
        self.parse_reader(file, file_name)
    }

    pub fn parse_reader<R: Read>(
        &self,
        reader: R,
        file_name: &str,
    ) -> Result<Vec<DeviceRecord>, ParseError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = reader.records();

        for header in 1..=HEADER_ROWS {
            rows.next()
                .ok_or(ParseError::MissingHeader(header))?
                .map_err(|source| ParseError::Csv {
                    row: header,
                    source,
                })?;
        }

        let mut records = Vec::new();
        for (idx, row) in rows.enumerate() {
            let row_num = HEADER_ROWS + idx + 1;
            let row = row.map_err(|source| ParseError::Csv {
                row: row_num,
                source,
            })?;
            records.push(map_row(&row, row_num, file_name)?);
        }

        Ok(records)
    }
}

/// Trim every field and drop the ones that end up empty.
pub fn normalize_row(row: &StringRecord) -> Vec<&str> {
    row.iter()
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .collect()
}

fn map_row(row: &StringRecord, row_num: usize, file_name: &str) -> Result<DeviceRecord, ParseError> {
    let fields = normalize_row(row);
    let field = |pos: usize| fields.get(pos).copied().unwrap_or_default();

    let device_id = field(2);
    let message_id = field(3);

    let mut missing = Vec::new();
    if device_id.is_empty() {
        missing.push("device_id");
    }
    if message_id.is_empty() {
        missing.push("message_id");
    }
    if !missing.is_empty() {
        return Err(ParseError::MissingRequiredFields {
            row: row_num,
            fields: missing,
        });
    }

    if fields.len() < FIELD_COUNT {
        return Err(ParseError::TooFewFields {
            row: row_num,
            found: fields.len(),
        });
    }

    Ok(DeviceRecord {
        id: Uuid::new_v4(),
        sequence_number: parse_int(field(0)),
        inventory_id: field(1).to_string(),
        device_id: device_id.to_string(),
        message_id: message_id.to_string(),
        text: field(4).to_string(),
        message_class: field(5).to_string(),
        level: parse_int(field(6)),
        area: field(7).to_string(),
        address: field(8).to_string(),
        source_file: file_name.to_string(),
        created_at: Utc::now(),
    })
}

/// Non-numeric values become 0.
fn parse_int(value: &str) -> i64 {
    value.parse().unwrap_or(0)
}
