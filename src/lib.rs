//! itbi-insights library interface
//!
//! Ingests the per-year ITBI transaction CSVs published by the Niterói
//! finance authority, consolidates and geocodes them with a persistent
//! address cache, and derives window-based valuation and hidden-gem scores
//! per street and neighborhood.

pub mod config;
pub mod error;
pub mod services;
pub mod types;

pub use crate::error::{PipelineError, Result};
