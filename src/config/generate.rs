pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# TELEMETRY-INGEST CONFIGURATION
# =============================================================================
# Device telemetry export files (tab-separated, two header rows) dropped into
# the input directory are parsed, stored once per file name, archived, and a
# per-device report is written for every device seen in the file.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/telemetry-ingest/config.yml
#   3. /etc/telemetry-ingest/config.yml
#
# Any value may reference an environment variable with $env{NAME}.

# =============================================================================
# WATCHER
# =============================================================================

watcher:
  # Directory scanned for new export files
  input_dir: /var/lib/telemetry-ingest/input
  # Receives errors/, archive/ and the generated reports
  output_dir: /var/lib/telemetry-ingest/output
  # Only files with this extension are picked up (no leading dot)
  extension: tsv
  # How often the input directory is scanned
  poll_interval: 10s
  # Number of concurrent workers
  workers: 4
  # Jobs waiting for a worker. When full, newly found files wait for the
  # next scan.
  queue_capacity: 100

# =============================================================================
# PIPELINE
# =============================================================================

pipeline:
  # What to do with a file whose records could not be stored:
  #   leave_in_place - keep it in the input directory
  #   move_to_errors - move it to <output_dir>/errors
  # The file is marked as failed in the ledger either way.
  on_persistence_failure: leave_in_place

# =============================================================================
# STORAGE
# =============================================================================

storage:
  # Path to DuckDB database file
  path: /var/lib/telemetry-ingest/ingest.duckdb

# =============================================================================
# REPORTS
# =============================================================================

reports:
  enabled: true
  # Newest records included in a device report
  max_records: 1000

# =============================================================================
# WEB SERVER
# =============================================================================

web:
  listen: 127.0.0.1:8080
  # Set to 0.0.0.0:8080 to allow external connections
"#
    .to_string()
}
