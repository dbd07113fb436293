//! Window feature extraction over the monthly region series.
//!
//! For each region and window length W (months ending at the most recent
//! month in the series) this computes the trend, liquidity, stability,
//! discount-vs-benchmark and liquidity-delta features plus a composite
//! confidence, all normalized onto [0, 1] by clip-then-rescale.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::services::aggregator::MonthlyPoint;
use crate::services::stats::{mean, median, std_pop};
use crate::types::{Granularity, Precision, YearMonth};

/// Division guard.
pub const EPS: f64 = 1e-9;

/// Confidence tier label attached to every insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Alta,
    Media,
    Baixa,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.75 {
            ConfidenceTier::Alta
        } else if confidence >= 0.55 {
            ConfidenceTier::Media
        } else {
            ConfidenceTier::Baixa
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::Alta => "alta",
            ConfidenceTier::Media => "media",
            ConfidenceTier::Baixa => "baixa",
        }
    }
}

/// Feature set for one (region, window) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowFeatures {
    pub region: String,
    pub neighborhood: String,
    pub granularity: Granularity,
    pub window_months: u32,
    /// Median ticket across the first / last 3 active months of the window.
    pub p0: f64,
    pub p1: f64,
    pub trend_pct: f64,
    pub trend_norm: f64,
    /// Total transactions in the window.
    pub q: u32,
    pub liquidity_norm: f64,
    pub cv: f64,
    pub stability_norm: f64,
    /// Parent-region benchmark ticket (neighborhood for streets, city for
    /// neighborhoods); 0 when no benchmark was available.
    pub benchmark_ticket: f64,
    pub discount_pct: f64,
    pub discount_norm: f64,
    pub liq_delta_pct: f64,
    pub liq_delta_norm: f64,
    pub active_months: u32,
    pub precision: Precision,
    pub confidence: f64,
    pub confidence_tier: ConfidenceTier,
}

/// Clip `x` into `[lo, hi]`, then rescale onto `[0, 1]`. Out-of-range
/// inputs saturate instead of escaping the unit interval.
pub fn norm(x: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return 0.0;
    }
    let clipped = x.clamp(lo, hi);
    (clipped - lo) / (hi - lo)
}

/// Composite confidence: sample size, window coverage and geocoding quality.
pub fn confidence(q: u32, active_months: u32, window_months: u32, precision: Precision) -> f64 {
    let c_sample = (f64::from(q) / 30.0).min(1.0);
    let c_coverage = f64::from(active_months) / f64::from(window_months.max(1));
    let c_geo = precision.confidence_weight();
    0.5 * c_sample + 0.3 * c_coverage + 0.2 * c_geo
}

/// Extract features for every region of `series` over a trailing window of
/// `window_months`, ending at the most recent month present in the series.
///
/// `benchmark` supplies the parent-level series for the discount feature:
/// the neighborhood series when extracting street features. When `None`
/// (neighborhood granularity), the benchmark is the city-wide median of
/// `series` itself.
pub fn extract(
    series: &[MonthlyPoint],
    granularity: Granularity,
    window_months: u32,
    benchmark: Option<&[MonthlyPoint]>,
) -> Vec<WindowFeatures> {
    let Some(end) = series.iter().map(|p| p.month).max() else {
        return Vec::new();
    };
    let start = end.minus_months(window_months - 1);
    let in_window = |month: YearMonth| month >= start && month <= end;

    // Benchmark lookups within the same window.
    let bench_points: &[MonthlyPoint] = benchmark.unwrap_or(series);
    let mut bench_by_region: HashMap<&str, Vec<f64>> = HashMap::new();
    let mut bench_all: Vec<f64> = Vec::new();
    for point in bench_points.iter().filter(|p| in_window(p.month)) {
        bench_by_region
            .entry(point.region.as_str())
            .or_default()
            .push(point.ticket_real);
        bench_all.push(point.ticket_real);
    }
    let city_median = median(&bench_all);

    let mut by_region: BTreeMap<&str, Vec<&MonthlyPoint>> = BTreeMap::new();
    for point in series.iter().filter(|p| in_window(p.month)) {
        by_region.entry(point.region.as_str()).or_default().push(point);
    }

    let mut features = Vec::with_capacity(by_region.len());

    for (region, mut points) in by_region {
        points.sort_by_key(|p| p.month);
        let active_months = points.len() as u32;
        let tickets: Vec<f64> = points.iter().map(|p| p.ticket_real).collect();

        // Trend endpoints: median of the first / last 3 active months; with
        // fewer than 3 active months, all available ones.
        let edge = tickets.len().min(3);
        let p0 = median(&tickets[..edge]);
        let p1 = median(&tickets[tickets.len() - edge..]);
        let trend_pct = p1 / p0.max(EPS) - 1.0;
        let trend_norm = norm(trend_pct, -0.20, 0.30);

        let q: u32 = points.iter().map(|p| p.count).sum();
        let liquidity_norm = (f64::from(q).ln_1p() / 120f64.ln_1p()).min(1.0);

        let cv = std_pop(&tickets) / mean(&tickets).max(EPS);
        let stability_norm = 1.0 - (cv / 0.35).min(1.0);

        // Discount vs the parent region's median ticket.
        let neighborhood = points[0].neighborhood.clone();
        let benchmark_ticket = match granularity {
            Granularity::Street => bench_by_region
                .get(neighborhood.as_str())
                .map(|tickets| median(tickets))
                .filter(|m| *m > 0.0)
                .unwrap_or(city_median),
            Granularity::Neighborhood => city_median,
        };
        let discount_pct = if benchmark_ticket > 0.0 {
            (benchmark_ticket - p1) / benchmark_ticket.max(EPS)
        } else {
            0.0
        };
        let discount_norm = norm(discount_pct, 0.0, 0.25);

        // Liquidity momentum: last 6 calendar months vs the 6 before them.
        let split = end.minus_months(5);
        let prev_start = end.minus_months(11);
        let q_last6: u32 = points.iter().filter(|p| p.month >= split).map(|p| p.count).sum();
        let q_prev6: u32 = points
            .iter()
            .filter(|p| p.month >= prev_start && p.month < split)
            .map(|p| p.count)
            .sum();
        let liq_delta_pct = (f64::from(q_last6) - f64::from(q_prev6)) / f64::from(q_prev6.max(1));
        let liq_delta_norm = norm(liq_delta_pct, -0.30, 0.50);

        // Predominant precision across the window, better tier on ties.
        let mut votes: BTreeMap<Precision, usize> = BTreeMap::new();
        for point in &points {
            *votes.entry(point.precision).or_insert(0) += 1;
        }
        let precision = votes
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(p, _)| *p)
            .unwrap_or(Precision::Centroid);

        let confidence = confidence(q, active_months, window_months, precision);

        features.push(WindowFeatures {
            region: region.to_string(),
            neighborhood,
            granularity,
            window_months,
            p0,
            p1,
            trend_pct,
            trend_norm,
            q,
            liquidity_norm,
            cv,
            stability_norm,
            benchmark_ticket,
            discount_pct,
            discount_norm,
            liq_delta_pct,
            liq_delta_norm,
            active_months,
            precision,
            confidence,
            confidence_tier: ConfidenceTier::from_confidence(confidence),
        });
    }

    features
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(region: &str, neighborhood: &str, ym: (i32, u32), count: u32, ticket: f64) -> MonthlyPoint {
        MonthlyPoint {
            region: region.into(),
            neighborhood: neighborhood.into(),
            month: YearMonth::new(ym.0, ym.1).unwrap(),
            count,
            total_real: ticket * f64::from(count),
            ticket_real: ticket,
            precision: Precision::Address,
        }
    }

    /// Twelve active months, tickets rising from 100k to 130k.
    fn rising_series() -> Vec<MonthlyPoint> {
        (1..=12)
            .map(|m| {
                let ticket = if m <= 3 { 100_000.0 } else if m >= 10 { 130_000.0 } else { 110_000.0 };
                point("Rua A — Icaraí", "Icaraí", (2024, m), 4, ticket)
            })
            .collect()
    }

    #[test]
    fn norm_clips_before_rescaling() {
        assert_eq!(norm(5.0, -0.20, 0.30), 1.0);
        assert_eq!(norm(-5.0, -0.20, 0.30), 0.0);
        assert!((norm(0.05, -0.20, 0.30) - 0.5).abs() < 1e-12);
        assert_eq!(norm(1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn thirty_percent_trend_saturates_trend_norm() {
        let features = extract(&rising_series(), Granularity::Street, 12, None);
        let f = &features[0];
        assert!((f.p0 - 100_000.0).abs() < 1e-9);
        assert!((f.p1 - 130_000.0).abs() < 1e-9);
        assert!((f.trend_pct - 0.30).abs() < 1e-9);
        assert!((f.trend_norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn all_normalized_features_stay_in_unit_interval_under_extremes() {
        // One active month with a huge ticket and count: every guard fires.
        let series = vec![point("R — B", "B", (2024, 12), 100_000, 9e12)];
        let features = extract(&series, Granularity::Street, 36, None);
        let f = &features[0];
        for value in [
            f.trend_norm,
            f.liquidity_norm,
            f.stability_norm,
            f.discount_norm,
            f.liq_delta_norm,
        ] {
            assert!((0.0..=1.0).contains(&value), "feature escaped [0,1]: {value}");
        }
        assert_eq!(f.active_months, 1);
        // Single active month: p0 == p1, flat trend.
        assert!((f.trend_pct - 0.0).abs() < 1e-12);
    }

    #[test]
    fn liquidity_delta_compares_last_six_to_prior_six() {
        let series: Vec<MonthlyPoint> = (1..=12)
            .map(|m| {
                let count = if m <= 6 { 2 } else { 4 };
                point("Rua A — Icaraí", "Icaraí", (2024, m), count, 100_000.0)
            })
            .collect();
        let features = extract(&series, Granularity::Street, 12, None);
        let f = &features[0];
        // q_last6 = 24, q_prev6 = 12 → +100%, clipped to the 0.50 hi bound.
        assert!((f.liq_delta_pct - 1.0).abs() < 1e-9);
        assert!((f.liq_delta_norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn street_discount_uses_neighborhood_benchmark() {
        let streets = vec![point("Rua A — Icaraí", "Icaraí", (2024, 12), 10, 75_000.0)];
        let neighborhoods = vec![point("Icaraí", "Icaraí", (2024, 12), 50, 100_000.0)];
        let features = extract(&streets, Granularity::Street, 12, Some(&neighborhoods));
        let f = &features[0];
        assert!((f.benchmark_ticket - 100_000.0).abs() < 1e-9);
        assert!((f.discount_pct - 0.25).abs() < 1e-9);
        assert!((f.discount_norm - 1.0).abs() < 1e-12);
    }

    #[test]
    fn neighborhood_discount_uses_city_median() {
        let series = vec![
            point("Icaraí", "Icaraí", (2024, 12), 10, 100_000.0),
            point("Centro", "Centro", (2024, 12), 10, 60_000.0),
            point("Barreto", "Barreto", (2024, 12), 10, 80_000.0),
        ];
        let features = extract(&series, Granularity::Neighborhood, 12, None);
        let centro = features.iter().find(|f| f.region == "Centro").unwrap();
        // City median ticket is 80k; Centro at 60k trades at a 25% discount.
        assert!((centro.benchmark_ticket - 80_000.0).abs() < 1e-9);
        assert!((centro.discount_pct - 0.25).abs() < 1e-9);
    }

    #[test]
    fn confidence_combines_sample_coverage_and_geo() {
        // q=30 saturates the sample term; full coverage; address precision.
        let c = confidence(30, 12, 12, Precision::Address);
        assert!((c - 1.0).abs() < 1e-12);
        // Centroid precision caps the geo term at 0.4.
        let c = confidence(30, 12, 12, Precision::Centroid);
        assert!((c - (0.5 + 0.3 + 0.2 * 0.4)).abs() < 1e-12);
    }

    #[test]
    fn window_excludes_points_older_than_its_start() {
        let mut series = rising_series();
        // A wildly different point 24 months earlier must not affect W=12.
        series.push(point("Rua A — Icaraí", "Icaraí", (2022, 12), 99, 1.0));
        let features = extract(&series, Granularity::Street, 12, None);
        let f = &features[0];
        assert_eq!(f.active_months, 12);
        assert_eq!(f.q, 48);
    }

    #[test]
    fn tier_labels_follow_thresholds() {
        assert_eq!(ConfidenceTier::from_confidence(0.80), ConfidenceTier::Alta);
        assert_eq!(ConfidenceTier::from_confidence(0.75), ConfidenceTier::Alta);
        assert_eq!(ConfidenceTier::from_confidence(0.60), ConfidenceTier::Media);
        assert_eq!(ConfidenceTier::from_confidence(0.55), ConfidenceTier::Media);
        assert_eq!(ConfidenceTier::from_confidence(0.54), ConfidenceTier::Baixa);
    }
}
