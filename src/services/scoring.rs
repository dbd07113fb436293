//! Scoring engine: valorization and hidden-gem scores over a feature set.
//!
//! All weights and thresholds live in an immutable, versioned
//! [`ScoringFormula`]. Recalibration means minting a new version, never
//! editing literals in place — the version string travels with every
//! exported record so historical outputs stay comparable.

use serde::Serialize;

use crate::services::features::{ConfidenceTier, WindowFeatures};

/// Versioned scoring configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringFormula {
    pub version: &'static str,

    // Valorization weights.
    pub val_trend: f64,
    pub val_liquidity: f64,
    pub val_stability: f64,

    // Hidden-gem weights.
    pub gem_trend: f64,
    pub gem_discount: f64,
    pub gem_liq_delta: f64,
    pub gem_stability: f64,

    // Eligibility gates.
    pub min_transactions: u32,
    pub min_active_months: u32,
    pub min_confidence: f64,
}

/// Formula v0.1.
pub const FORMULA_V0_1: ScoringFormula = ScoringFormula {
    version: "v0.1",
    val_trend: 0.55,
    val_liquidity: 0.25,
    val_stability: 0.20,
    gem_trend: 0.40,
    gem_discount: 0.35,
    gem_liq_delta: 0.15,
    gem_stability: 0.10,
    min_transactions: 20,
    min_active_months: 6,
    min_confidence: 0.55,
};

/// A feature set plus its two scores and eligibility flags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredInsight {
    #[serde(flatten)]
    pub features: WindowFeatures,
    pub valorization_score: f64,
    pub hidden_gem_score: f64,
    pub valorization_eligible: bool,
    pub hidden_gem_eligible: bool,
    pub formula_version: &'static str,
}

impl ScoringFormula {
    /// Score one feature set. Pure: identical inputs yield bit-identical
    /// outputs — no clock, no randomness.
    pub fn score(&self, features: WindowFeatures) -> ScoredInsight {
        let valorization_raw = self.val_trend * features.trend_norm
            + self.val_liquidity * features.liquidity_norm
            + self.val_stability * features.stability_norm;
        let hidden_gem_raw = self.gem_trend * features.trend_norm
            + self.gem_discount * features.discount_norm
            + self.gem_liq_delta * features.liq_delta_norm
            + self.gem_stability * features.stability_norm;

        let valorization_score = round1(100.0 * valorization_raw * features.confidence);
        let hidden_gem_score = round1(100.0 * hidden_gem_raw * features.confidence);

        let base_eligible = features.q >= self.min_transactions
            && features.active_months >= self.min_active_months
            && features.confidence >= self.min_confidence
            && features.confidence_tier != ConfidenceTier::Baixa;
        // A declining or at-par region is never a hidden gem, whatever the
        // score magnitude says.
        let hidden_gem_eligible =
            base_eligible && features.trend_pct > 0.0 && features.discount_pct > 0.0;

        ScoredInsight {
            features,
            valorization_score,
            hidden_gem_score,
            valorization_eligible: base_eligible,
            hidden_gem_eligible,
            formula_version: self.version,
        }
    }

    /// Score a whole feature batch, preserving order.
    pub fn score_all(&self, features: Vec<WindowFeatures>) -> Vec<ScoredInsight> {
        features.into_iter().map(|f| self.score(f)).collect()
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Granularity, Precision};

    fn features(q: u32, active_months: u32, confidence: f64) -> WindowFeatures {
        WindowFeatures {
            region: "Rua A — Icaraí".into(),
            neighborhood: "Icaraí".into(),
            granularity: Granularity::Street,
            window_months: 12,
            p0: 100_000.0,
            p1: 120_000.0,
            trend_pct: 0.20,
            trend_norm: 0.8,
            q,
            liquidity_norm: 0.6,
            cv: 0.1,
            stability_norm: 0.7,
            benchmark_ticket: 130_000.0,
            discount_pct: 0.0769,
            discount_norm: 0.3,
            liq_delta_pct: 0.1,
            liq_delta_norm: 0.5,
            active_months,
            precision: Precision::Address,
            confidence,
            confidence_tier: ConfidenceTier::from_confidence(confidence),
        }
    }

    #[test]
    fn scores_follow_the_v01_weights() {
        let insight = FORMULA_V0_1.score(features(30, 12, 0.8));
        // valorization raw = .55*.8 + .25*.6 + .20*.7 = 0.73 → 100*.73*.8 = 58.4
        assert_eq!(insight.valorization_score, 58.4);
        // gem raw = .40*.8 + .35*.3 + .15*.5 + .10*.7 = 0.57 → 100*.57*.8 = 45.6
        assert_eq!(insight.hidden_gem_score, 45.6);
        assert_eq!(insight.formula_version, "v0.1");
        assert!(insight.valorization_eligible);
        assert!(insight.hidden_gem_eligible);
    }

    #[test]
    fn scoring_is_deterministic() {
        let a = FORMULA_V0_1.score(features(25, 10, 0.71));
        let b = FORMULA_V0_1.score(features(25, 10, 0.71));
        assert_eq!(a, b);
        assert_eq!(a.valorization_score.to_bits(), b.valorization_score.to_bits());
        assert_eq!(a.hidden_gem_score.to_bits(), b.hidden_gem_score.to_bits());
    }

    #[test]
    fn nineteen_transactions_never_pass_the_gate() {
        let insight = FORMULA_V0_1.score(features(19, 12, 0.9));
        assert!(!insight.valorization_eligible);
        assert!(!insight.hidden_gem_eligible);
        // The score itself is still reported for transparency.
        assert!(insight.valorization_score > 0.0);
    }

    #[test]
    fn short_coverage_and_low_confidence_are_ineligible() {
        assert!(!FORMULA_V0_1.score(features(30, 5, 0.9)).valorization_eligible);
        assert!(!FORMULA_V0_1.score(features(30, 12, 0.54)).valorization_eligible);
        // Exactly at the confidence threshold passes.
        assert!(FORMULA_V0_1.score(features(30, 12, 0.55)).valorization_eligible);
    }

    #[test]
    fn declining_region_is_never_a_hidden_gem() {
        let mut f = features(30, 12, 0.8);
        f.trend_pct = -0.01;
        f.discount_pct = 0.15;
        let insight = FORMULA_V0_1.score(f);
        assert!(insight.valorization_eligible);
        assert!(!insight.hidden_gem_eligible);
    }

    #[test]
    fn at_par_pricing_is_never_a_hidden_gem() {
        let mut f = features(30, 12, 0.8);
        f.discount_pct = 0.0;
        let insight = FORMULA_V0_1.score(f);
        assert!(!insight.hidden_gem_eligible);
    }
}
