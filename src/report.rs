//! Per-device report generation.
//!
//! [`ReportTrigger`] loads a device's newest records and hands them to a
//! [`ReportRenderer`]. Failures are returned to the caller, which treats
//! them as non-fatal for the file being processed.

use crate::model::DeviceRecord;
use crate::storage::{Storage, StorageError};
use chrono::Local;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Rows shown in the detail table before truncation.
pub const MAX_DETAIL_ROWS: usize = 30;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to fetch records: {0}")]
    Fetch(#[from] StorageError),

    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("render task failed: {0}")]
    Task(String),
}

/// Turns one device's records into a document on disk.
pub trait ReportRenderer: Send + Sync {
    /// Returns the path of the written report.
    fn render(&self, device_id: &str, records: &[DeviceRecord]) -> Result<PathBuf, ReportError>;
}

pub struct ReportTrigger {
    storage: Arc<dyn Storage>,
    renderer: Arc<dyn ReportRenderer>,
    max_records: u64,
}

impl ReportTrigger {
    pub fn new(
        storage: Arc<dyn Storage>,
        renderer: Arc<dyn ReportRenderer>,
        max_records: u64,
    ) -> Self {
        Self {
            storage,
            renderer,
            max_records,
        }
    }

    /// Fetch the first page of the device's records (newest first) and
    /// render them.
    pub async fn trigger(&self, device_id: &str) -> Result<PathBuf, ReportError> {
        let page = self
            .storage
            .device_records(device_id, 1, self.max_records)
            .await?;
        debug!(
            device_id = %device_id,
            records = page.records.len(),
            total = page.total,
            "Rendering device report"
        );

        let renderer = self.renderer.clone();
        let device_id = device_id.to_string();
        tokio::task::spawn_blocking(move || renderer.render(&device_id, &page.records))
            .await
            .map_err(|e| ReportError::Task(e.to_string()))?
    }
}

/// Writes plain-text reports into a single directory.
pub struct TextReportRenderer {
    output_dir: PathBuf,
}

impl TextReportRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl ReportRenderer for TextReportRenderer {
    fn render(&self, device_id: &str, records: &[DeviceRecord]) -> Result<PathBuf, ReportError> {
        let now = Local::now();
        let file_name = format!(
            "device_{}_{}.txt",
            sanitize_device_id(device_id),
            now.format("%Y%m%d_%H%M%S")
        );
        let path = self.output_dir.join(file_name);

        let body = render_text(device_id, &now.format("%Y-%m-%d %H:%M:%S").to_string(), records);
        std::fs::write(&path, body).map_err(|source| ReportError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Replace everything outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_device_id(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn class_label(class: &str) -> &str {
    match class {
        "alarm" => "Alarm",
        "warning" => "Warning",
        "working" => "Working",
        "waiting" => "Waiting",
        other => other,
    }
}

/// Drop repeated (sequence number, message id, address) rows, keeping the
/// first occurrence.
pub fn dedup_records(records: &[DeviceRecord]) -> Vec<&DeviceRecord> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert((r.sequence_number, r.message_id.as_str(), r.address.as_str())))
        .collect()
}

pub fn render_text(device_id: &str, generated_at: &str, records: &[DeviceRecord]) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = writeln!(out, "Device report: {}", device_id);
    let _ = writeln!(out, "Generated: {}", generated_at);
    let _ = writeln!(out);

    if let Some(first) = records.first() {
        let _ = writeln!(out, "Device information");
        let _ = writeln!(out, "  Inventory ID: {}", first.inventory_id);
        let _ = writeln!(out, "  Total records: {}", records.len());
        let _ = writeln!(out);
    }

    let mut class_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut message_ids = HashSet::new();
    for record in records {
        *class_counts.entry(record.message_class.as_str()).or_default() += 1;
        message_ids.insert(record.message_id.as_str());
    }

    let _ = writeln!(out, "Message statistics");
    let _ = writeln!(out, "  Unique message IDs: {}", message_ids.len());
    for (class, count) in &class_counts {
        let _ = writeln!(out, "  - {}: {}", class_label(class), count);
    }
    let _ = writeln!(out);

    let unique = dedup_records(records);
    let _ = writeln!(out, "Details");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["No", "Message ID", "Text", "Class", "Level", "Area", "Address"]);

    for record in unique.iter().take(MAX_DETAIL_ROWS) {
        table.add_row(vec![
            record.sequence_number.to_string(),
            record.message_id.clone(),
            record.text.clone(),
            class_label(&record.message_class).to_string(),
            record.level.to_string(),
            record.area.clone(),
            record.address.clone(),
        ]);
    }
    let _ = writeln!(out, "{}", table);

    if unique.len() > MAX_DETAIL_ROWS {
        let _ = writeln!(out, "... and more records");
    }
    let _ = writeln!(out, "Unique records: {}", unique.len());

    out
}
