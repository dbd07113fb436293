//! Pipeline error types.
//!
//! Only structural failures surface here: a missing input table or a schema
//! that lacks the required columns aborts the run before any aggregation.
//! Per-address and per-region failures are represented as absent values in
//! the data and logged where they occur.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Required input file is missing (run the earlier stage first).
    #[error("input not found: {0} ({1})")]
    InputNotFound(PathBuf, String),

    /// Input table lacks required columns — fail fast, never aggregate
    /// silently wrong data.
    #[error("invalid input schema — missing columns: {missing:?}; found: {found:?}")]
    InvalidSchema {
        missing: Vec<String>,
        found: Vec<String>,
    },

    /// No input file could be read at all.
    #[error("no readable input: {0}")]
    NoInput(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type used across the pipeline stages.
pub type Result<T> = std::result::Result<T, PipelineError>;
