//! Ingestion pipeline for device telemetry exports.
//!
//! A [`pipeline::DirectoryWatcher`] claims new files in the ledger and
//! queues them; a [`pipeline::WorkerPool`] parses, stores, and archives
//! each file and asks [`report::ReportTrigger`] for one report per device.

pub mod cli;
pub mod config;
pub mod ledger;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod storage;
pub mod web;
