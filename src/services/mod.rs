//! Pipeline services.
//!
//! Stages in run order: discovery → download → consolidate → geocode
//! (geocache + centroids + geocoder) → aggregate → features → scoring →
//! export. Each stage reads and writes plain artifacts under the data
//! directory so any stage can be rerun in isolation.

pub mod aggregator;
pub mod centroids;
pub mod consolidate;
pub mod discovery;
pub mod download;
pub mod exporter;
pub mod features;
pub mod geocache;
pub mod geocoder;
pub mod price_index;
pub mod scoring;
pub mod stats;
