//! Insight document export.
//!
//! The presentation layer (map / ranking UI) consumes a single JSON
//! document: a metadata block for traceability plus the flat list of scored
//! records. The schema is append-compatible — consumers must ignore fields
//! they do not know.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::services::scoring::ScoredInsight;
use crate::types::Granularity;

/// Window lengths the pipeline evaluates, in months.
pub const WINDOWS_MONTHS: [u32; 3] = [12, 24, 36];

#[derive(Debug, Serialize)]
pub struct DocumentMetadata {
    pub formula_version: String,
    pub windows_months: Vec<u32>,
    pub granularities: Vec<Granularity>,
    pub generated_at: DateTime<Utc>,
    pub total_insights: usize,
    pub total_valorization_eligible: usize,
    pub total_hidden_gem_eligible: usize,
}

#[derive(Debug, Serialize)]
pub struct InsightDocument {
    pub metadata: DocumentMetadata,
    pub insights: Vec<ScoredInsight>,
}

impl InsightDocument {
    pub fn new(formula_version: &str, insights: Vec<ScoredInsight>) -> Self {
        let metadata = DocumentMetadata {
            formula_version: formula_version.to_string(),
            windows_months: WINDOWS_MONTHS.to_vec(),
            granularities: vec![Granularity::Neighborhood, Granularity::Street],
            generated_at: Utc::now(),
            total_insights: insights.len(),
            total_valorization_eligible: insights
                .iter()
                .filter(|i| i.valorization_eligible)
                .count(),
            total_hidden_gem_eligible: insights.iter().filter(|i| i.hidden_gem_eligible).count(),
        };
        Self { metadata, insights }
    }

    /// Serialize to pretty JSON and write, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("insight serialization failed: {e}"))?;
        std::fs::write(path, json)?;
        info!(
            file = %path.display(),
            insights = self.metadata.total_insights,
            "insight document written"
        );
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::features::{ConfidenceTier, WindowFeatures};
    use crate::services::scoring::FORMULA_V0_1;
    use crate::types::Precision;
    use tempfile::TempDir;

    fn sample_insight() -> ScoredInsight {
        FORMULA_V0_1.score(WindowFeatures {
            region: "Rua A — Icaraí".into(),
            neighborhood: "Icaraí".into(),
            granularity: Granularity::Street,
            window_months: 12,
            p0: 100_000.0,
            p1: 120_000.0,
            trend_pct: 0.2,
            trend_norm: 0.8,
            q: 25,
            liquidity_norm: 0.6,
            cv: 0.1,
            stability_norm: 0.7,
            benchmark_ticket: 130_000.0,
            discount_pct: 0.0769,
            discount_norm: 0.3,
            liq_delta_pct: 0.1,
            liq_delta_norm: 0.5,
            active_months: 10,
            precision: Precision::Address,
            confidence: 0.8,
            confidence_tier: ConfidenceTier::from_confidence(0.8),
        })
    }

    #[test]
    fn document_counts_eligible_insights() {
        let doc = InsightDocument::new("v0.1", vec![sample_insight()]);
        assert_eq!(doc.metadata.total_insights, 1);
        assert_eq!(doc.metadata.total_valorization_eligible, 1);
        assert_eq!(doc.metadata.formula_version, "v0.1");
    }

    #[test]
    fn written_document_has_metadata_and_flat_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("itbi_insights.json");
        let doc = InsightDocument::new("v0.1", vec![sample_insight()]);
        doc.write(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["metadata"]["formula_version"], "v0.1");
        assert_eq!(value["metadata"]["windows_months"], serde_json::json!([12, 24, 36]));

        let record = &value["insights"][0];
        // Features are flattened next to scores, not nested.
        assert_eq!(record["region"], "Rua A — Icaraí");
        assert_eq!(record["granularity"], "street");
        assert_eq!(record["confidence_tier"], "alta");
        assert_eq!(record["formula_version"], "v0.1");
        assert!(record["valorization_score"].is_number());
        assert!(record["hidden_gem_eligible"].is_boolean());
    }
}
