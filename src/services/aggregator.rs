//! Monthly aggregation of geocoded transaction records per region.
//!
//! Deflation happens per record, before any summing, so monthly totals are
//! comparable in real terms. Records that cannot be placed (no month, no
//! transaction value, zero count) or whose month has no price-index ratio
//! are excluded with a logged count — never defaulted.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::services::price_index::PriceIndex;
use crate::services::stats::median;
use crate::types::{GeocodedRecord, Granularity, Precision, YearMonth};

/// One (region, month) point of the aggregated series.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyPoint {
    /// Region key: `"<street> — <neighborhood>"` at street granularity, the
    /// neighborhood name otherwise.
    pub region: String,
    pub neighborhood: String,
    pub month: YearMonth,
    /// Transactions in the month.
    pub count: u32,
    /// Total deflated value in the month.
    pub total_real: f64,
    /// Median per-record real ticket in the month — median, not mean, to
    /// resist outliers in the street-level source aggregates.
    pub ticket_real: f64,
    /// Predominant geocoding precision among the month's records.
    pub precision: Precision,
}

pub fn region_key(granularity: Granularity, street: &str, neighborhood: &str) -> String {
    match granularity {
        Granularity::Street => format!("{street} — {neighborhood}"),
        Granularity::Neighborhood => neighborhood.to_string(),
    }
}

/// Counts of records excluded from aggregation, by reason.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionCounts {
    pub no_month: usize,
    pub no_value: usize,
    pub zero_count: usize,
    pub no_index_ratio: usize,
}

impl ExclusionCounts {
    pub fn total(&self) -> usize {
        self.no_month + self.no_value + self.zero_count + self.no_index_ratio
    }
}

/// Aggregate geocoded records into a monthly series at the given
/// granularity. The output is sorted by (region, month).
pub fn aggregate(
    records: &[GeocodedRecord],
    granularity: Granularity,
    index: &impl PriceIndex,
) -> Vec<MonthlyPoint> {
    struct Group {
        neighborhood: String,
        count: u32,
        total_real: f64,
        tickets: Vec<f64>,
        precision_votes: BTreeMap<Precision, usize>,
    }

    let mut groups: BTreeMap<(String, YearMonth), Group> = BTreeMap::new();
    let mut excluded = ExclusionCounts::default();

    for geocoded in records {
        let record = &geocoded.record;

        let Some(month) = record.period() else {
            excluded.no_month += 1;
            continue;
        };
        let Some(value) = record.transaction_value else {
            excluded.no_value += 1;
            continue;
        };
        if record.transaction_count == 0 {
            excluded.zero_count += 1;
            continue;
        }
        let Some(ratio) = index.ratio(month) else {
            excluded.no_index_ratio += 1;
            continue;
        };

        let real_value = value * ratio;
        let ticket = real_value / f64::from(record.transaction_count);
        let key = (
            region_key(granularity, &record.street, &record.neighborhood),
            month,
        );

        let group = groups.entry(key).or_insert_with(|| Group {
            neighborhood: record.neighborhood.clone(),
            count: 0,
            total_real: 0.0,
            tickets: Vec::new(),
            precision_votes: BTreeMap::new(),
        });
        group.count += record.transaction_count;
        group.total_real += real_value;
        group.tickets.push(ticket);
        // Records without coordinates still aggregate; their precision vote
        // defaults to the weakest tier.
        let precision = geocoded.precision.unwrap_or(Precision::Centroid);
        *group.precision_votes.entry(precision).or_insert(0) += 1;
    }

    if excluded.total() > 0 {
        warn!(
            no_month = excluded.no_month,
            no_value = excluded.no_value,
            zero_count = excluded.zero_count,
            no_index_ratio = excluded.no_index_ratio,
            "records excluded from aggregation"
        );
    }

    let points: Vec<MonthlyPoint> = groups
        .into_iter()
        .map(|((region, month), group)| {
            // Mode of the precision votes; BTreeMap iteration order makes a
            // tie resolve toward the better tier.
            let precision = group
                .precision_votes
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(p, _)| *p)
                .unwrap_or(Precision::Centroid);
            MonthlyPoint {
                region,
                neighborhood: group.neighborhood,
                month,
                count: group.count,
                total_real: group.total_real,
                ticket_real: median(&group.tickets),
                precision,
            }
        })
        .collect();

    info!(
        granularity = %granularity,
        regions_months = points.len(),
        "monthly aggregation finished"
    );
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::price_index::StaticPriceIndex;
    use crate::types::TransactionRecord;

    fn record(
        neighborhood: &str,
        street: &str,
        value: Option<f64>,
        count: u32,
        year: i32,
        month: Option<u32>,
    ) -> GeocodedRecord {
        GeocodedRecord {
            record: TransactionRecord {
                neighborhood: neighborhood.into(),
                street: street.into(),
                lot_area: None,
                built_area: None,
                private_area: None,
                assessed_value: None,
                transaction_value: value,
                transaction_count: count,
                property_type: String::new(),
                legal_nature: String::new(),
                year,
                month,
            },
            latitude: Some(-22.9),
            longitude: Some(-43.1),
            precision: Some(Precision::Address),
        }
    }

    fn flat_index() -> StaticPriceIndex {
        let base = YearMonth::new(2024, 12).unwrap();
        StaticPriceIndex::from_pairs(
            base,
            (2023..=2024).flat_map(|year| {
                (1..=12).map(move |month| (YearMonth::new(year, month).unwrap(), 1.0))
            }),
        )
    }

    #[test]
    fn groups_by_region_and_month_with_summed_counts() {
        let records = vec![
            record("Icaraí", "Rua A", Some(300_000.0), 3, 2024, Some(1)),
            record("Icaraí", "Rua A", Some(100_000.0), 1, 2024, Some(1)),
            record("Icaraí", "Rua A", Some(200_000.0), 2, 2024, Some(2)),
        ];
        let points = aggregate(&records, Granularity::Street, &flat_index());

        assert_eq!(points.len(), 2);
        let jan = &points[0];
        assert_eq!(jan.region, "Rua A — Icaraí");
        assert_eq!(jan.month, YearMonth::new(2024, 1).unwrap());
        assert_eq!(jan.count, 4);
        assert!((jan.total_real - 400_000.0).abs() < 1e-9);
        // Tickets 100k and 100k → median 100k.
        assert!((jan.ticket_real - 100_000.0).abs() < 1e-9);
    }

    #[test]
    fn deflation_applies_before_summing() {
        let base = YearMonth::new(2024, 12).unwrap();
        let index = StaticPriceIndex::from_pairs(
            base,
            [
                (YearMonth::new(2023, 6).unwrap(), 1.05),
                (YearMonth::new(2024, 12).unwrap(), 1.0),
            ],
        );
        let records = vec![
            record("Centro", "Rua B", Some(100_000.0), 1, 2023, Some(6)),
            record("Centro", "Rua B", Some(100_000.0), 1, 2024, Some(12)),
        ];
        let points = aggregate(&records, Granularity::Neighborhood, &index);

        assert!((points[0].total_real - 105_000.0).abs() < 1e-9);
        // Base-month record keeps its nominal value exactly.
        assert!((points[1].total_real - 100_000.0).abs() < 1e-12);
    }

    #[test]
    fn gaps_are_excluded_never_defaulted() {
        let base = YearMonth::new(2024, 12).unwrap();
        let index = StaticPriceIndex::from_pairs(base, [(base, 1.0)]);
        let records = vec![
            record("Icaraí", "Rua A", Some(100_000.0), 1, 2024, None), // no month
            record("Icaraí", "Rua A", None, 1, 2024, Some(12)),        // no value
            record("Icaraí", "Rua A", Some(100_000.0), 0, 2024, Some(12)), // zero count
            record("Icaraí", "Rua A", Some(100_000.0), 1, 2020, Some(1)), // no ratio
            record("Icaraí", "Rua A", Some(100_000.0), 1, 2024, Some(12)), // kept
        ];
        let points = aggregate(&records, Granularity::Street, &index);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].count, 1);
    }

    #[test]
    fn predominant_precision_is_the_mode_with_better_tier_tiebreak() {
        let mut a = record("Icaraí", "Rua A", Some(100_000.0), 1, 2024, Some(1));
        a.precision = Some(Precision::Centroid);
        let b = record("Icaraí", "Rua A", Some(100_000.0), 1, 2024, Some(1));
        // One vote each: the tie breaks toward the better (address) tier.
        let points = aggregate(&[a, b], Granularity::Street, &flat_index());
        assert_eq!(points[0].precision, Precision::Address);
    }
}
