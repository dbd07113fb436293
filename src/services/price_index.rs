//! Monthly price-index collaborator.
//!
//! The aggregator converts nominal transaction values into real values at a
//! fixed base month using a month → index-ratio lookup. A month without a
//! ratio is a data gap: the affected records are excluded from aggregation,
//! never deflated with a silent 1.0.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::types::YearMonth;

/// Month → multiplicative index ratio to the base month.
pub trait PriceIndex {
    /// Ratio converting a nominal value in `month` to base-month terms, or
    /// `None` when the series has no entry for that month.
    fn ratio(&self, month: YearMonth) -> Option<f64>;

    /// The base month, whose ratio is exactly 1.0.
    fn base_month(&self) -> YearMonth;
}

/// In-memory index series.
pub struct StaticPriceIndex {
    base: YearMonth,
    ratios: BTreeMap<YearMonth, f64>,
}

/// Annual IPCA factors to December 2024 (IBGE/SIDRA series 1737, computed as
/// IPCA_dec2024 / IPCA_decYear).
const ANNUAL_IPCA_TO_DEC_2024: &[(i32, f64)] = &[
    (2020, 1.278),
    (2021, 1.161),
    (2022, 1.098),
    (2023, 1.049),
    (2024, 1.000),
];

impl StaticPriceIndex {
    /// Built-in series: the annual IPCA factors expanded to every month of
    /// their year. Coarse by construction — a proper monthly series can be
    /// supplied with [`StaticPriceIndex::from_csv`].
    pub fn builtin() -> Self {
        let mut ratios = BTreeMap::new();
        for (year, factor) in ANNUAL_IPCA_TO_DEC_2024 {
            for month in 1..=12 {
                if let Some(ym) = YearMonth::new(*year, month) {
                    ratios.insert(ym, *factor);
                }
            }
        }
        Self {
            base: YearMonth { year: 2024, month: 12 },
            ratios,
        }
    }

    pub fn from_pairs(base: YearMonth, pairs: impl IntoIterator<Item = (YearMonth, f64)>) -> Self {
        let mut ratios: BTreeMap<YearMonth, f64> = pairs.into_iter().collect();
        ratios.insert(base, 1.0);
        Self { base, ratios }
    }

    /// Load a `month,ratio` CSV (header optional). Unparseable rows are
    /// rejected — a price index with silent holes defeats its purpose.
    pub fn from_csv(path: &Path, base: YearMonth) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        let mut ratios = BTreeMap::new();
        for (i, row) in reader.records().enumerate() {
            let record = row?;
            let month_raw = record.get(0).unwrap_or("").trim();
            let ratio_raw = record.get(1).unwrap_or("").trim();
            if i == 0 && month_raw.parse::<YearMonth>().is_err() {
                continue; // header row
            }
            let month: YearMonth = month_raw.parse().map_err(|e: String| {
                PipelineError::Other(anyhow::anyhow!("bad index row {}: {e}", i + 1))
            })?;
            let ratio: f64 = ratio_raw.parse().map_err(|_| {
                PipelineError::Other(anyhow::anyhow!("bad ratio '{ratio_raw}' at row {}", i + 1))
            })?;
            ratios.insert(month, ratio);
        }
        ratios.insert(base, 1.0);
        Ok(Self { base, ratios })
    }
}

impl PriceIndex for StaticPriceIndex {
    fn ratio(&self, month: YearMonth) -> Option<f64> {
        self.ratios.get(&month).copied()
    }

    fn base_month(&self) -> YearMonth {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_month_ratio_is_exactly_one() {
        let index = StaticPriceIndex::builtin();
        let base = index.base_month();
        assert_eq!(index.ratio(base), Some(1.0));
    }

    #[test]
    fn missing_month_is_a_gap_not_a_default() {
        let index = StaticPriceIndex::builtin();
        assert_eq!(index.ratio(YearMonth::new(2019, 6).unwrap()), None);
        assert_eq!(index.ratio(YearMonth::new(2025, 1).unwrap()), None);
    }

    #[test]
    fn builtin_covers_every_month_of_configured_years() {
        let index = StaticPriceIndex::builtin();
        for year in 2020..=2024 {
            for month in 1..=12 {
                assert!(index.ratio(YearMonth::new(year, month).unwrap()).is_some());
            }
        }
        assert_eq!(index.ratio(YearMonth::new(2020, 3).unwrap()), Some(1.278));
    }
}
