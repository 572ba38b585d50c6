//! Anomaly classification.
//!
//! Each detection method is a pure function returning an `AnomalyVerdict`
//! (flag, reason and a severity used for ranking). `evaluate` dispatches on
//! the configured `DetectionStrategy`; exactly one method runs per run.

use crate::config::{Combinator, DetectionStrategy};
use crate::models::{AnomalyVerdict, Comparison, ComparisonSet, SeriesStats};

/// Weight applied to absolute differences in the weighted combinator.
pub const WEIGHTED_ABS_DIVISOR: f64 = 10.0;

pub fn weighted_score(pct: f64, abs: f64) -> f64 {
    (pct + abs / WEIGHTED_ABS_DIVISOR) / 2.0
}

/// Triggers one comparison tripped, if it tripped under the combinator.
fn comparison_triggers(
    comparison: &Comparison,
    pct_threshold: f64,
    abs_threshold: f64,
    combinator: Combinator,
    tolerance_pct: f64,
) -> Option<Vec<String>> {
    // Dead-band on magnitude; negative readings give a negative pct_diff.
    if tolerance_pct > 0.0 && comparison.pct_diff.abs() <= tolerance_pct {
        return None;
    }

    let label = comparison.kind.label();
    let pct_exceeded = comparison.pct_diff > pct_threshold;
    let abs_exceeded = comparison.abs_diff > abs_threshold;

    let mut triggers = Vec::new();
    if pct_exceeded {
        triggers.push(format!("{label} {:.1}%", comparison.pct_diff));
    }
    if abs_exceeded {
        triggers.push(format!("{label} {:.1} m³", comparison.abs_diff));
    }

    let tripped = match combinator {
        Combinator::Or => pct_exceeded || abs_exceeded,
        Combinator::And => pct_exceeded && abs_exceeded,
        Combinator::Weighted => {
            let score = weighted_score(comparison.pct_diff, comparison.abs_diff);
            let tripped = score > weighted_score(pct_threshold, abs_threshold);
            if tripped {
                triggers.push(format!("{label} weighted score {score:.1}"));
            }
            tripped
        }
    };

    tripped.then_some(triggers)
}

/// Threshold comparison against every present reference.
///
/// The facility is anomalous when any single comparison trips.
pub fn classify_comparisons(
    comparisons: &ComparisonSet,
    pct_threshold: f64,
    abs_threshold: f64,
    combinator: Combinator,
    tolerance_pct: f64,
) -> AnomalyVerdict {
    let mut reasons = Vec::new();
    let mut severity: f64 = 0.0;

    for comparison in comparisons.present() {
        if let Some(triggers) = comparison_triggers(
            comparison,
            pct_threshold,
            abs_threshold,
            combinator,
            tolerance_pct,
        ) {
            reasons.extend(triggers);
            severity = severity.max(comparison.pct_diff.abs());
        }
    }

    if reasons.is_empty() {
        return AnomalyVerdict::normal();
    }

    AnomalyVerdict {
        is_anomaly: true,
        reason: reasons.join(", "),
        severity,
    }
}

pub fn z_deviation(value: f64, stats: &SeriesStats) -> f64 {
    if stats.count < 2 || stats.std == 0.0 {
        return 0.0;
    }
    (value - stats.mean).abs() / stats.std
}

pub fn classify_zscore(value: f64, stats: &SeriesStats, threshold: f64) -> AnomalyVerdict {
    let deviation = z_deviation(value, stats);
    if deviation <= threshold {
        return AnomalyVerdict::normal();
    }

    AnomalyVerdict {
        is_anomaly: true,
        reason: format!(
            "z-score {deviation:.2} above {threshold:.2} (mean {:.1}, std {:.1})",
            stats.mean, stats.std
        ),
        severity: deviation,
    }
}

pub fn iqr_bounds(stats: &SeriesStats, multiplier: f64) -> (f64, f64) {
    let iqr = stats.q3 - stats.q1;
    (stats.q1 - multiplier * iqr, stats.q3 + multiplier * iqr)
}

pub fn classify_iqr(value: f64, stats: &SeriesStats, multiplier: f64) -> AnomalyVerdict {
    if stats.count < 2 {
        return AnomalyVerdict::normal();
    }

    let (lower, upper) = iqr_bounds(stats, multiplier);
    let (distance, reason) = if value < lower {
        (lower - value, format!("{value:.1} below lower bound {lower:.1}"))
    } else if value > upper {
        (value - upper, format!("{value:.1} above upper bound {upper:.1}"))
    } else {
        return AnomalyVerdict::normal();
    };

    let iqr = stats.q3 - stats.q1;
    AnomalyVerdict {
        is_anomaly: true,
        reason,
        severity: if iqr > 0.0 { distance / iqr } else { distance },
    }
}

pub fn mean_deviation_pct(value: f64, stats: &SeriesStats) -> f64 {
    if stats.count < 2 || stats.mean == 0.0 {
        return 0.0;
    }
    (value - stats.mean).abs() / stats.mean * 100.0
}

pub fn classify_mean_deviation(
    value: f64,
    stats: &SeriesStats,
    threshold_pct: f64,
) -> AnomalyVerdict {
    let deviation = mean_deviation_pct(value, stats);
    if deviation <= threshold_pct {
        return AnomalyVerdict::normal();
    }

    AnomalyVerdict {
        is_anomaly: true,
        reason: format!("{deviation:.1}% from mean {:.1}", stats.mean),
        severity: deviation,
    }
}

/// Runs the configured method for one facility's current value.
///
/// Statistical methods without stats (no series) are never anomalous.
pub fn evaluate(
    strategy: &DetectionStrategy,
    tolerance_pct: f64,
    value: f64,
    comparisons: &ComparisonSet,
    stats: Option<&SeriesStats>,
) -> AnomalyVerdict {
    match (strategy, stats) {
        (
            DetectionStrategy::Threshold {
                pct_threshold,
                abs_threshold,
                combinator,
            },
            _,
        ) => classify_comparisons(
            comparisons,
            *pct_threshold,
            *abs_threshold,
            *combinator,
            tolerance_pct,
        ),
        (DetectionStrategy::ZScore { threshold }, Some(stats)) => {
            classify_zscore(value, stats, *threshold)
        }
        (DetectionStrategy::Iqr { multiplier }, Some(stats)) => {
            classify_iqr(value, stats, *multiplier)
        }
        (DetectionStrategy::MeanDeviation { threshold_pct }, Some(stats)) => {
            classify_mean_deviation(value, stats, *threshold_pct)
        }
        (_, None) => AnomalyVerdict::normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReferenceKind;
    use crate::reference::{compare, series_stats};
    use approx::assert_relative_eq;

    fn previous_only(current: f64, reference: f64) -> ComparisonSet {
        ComparisonSet {
            previous_period: Some(compare(ReferenceKind::PreviousPeriod, current, reference, None)),
            ..ComparisonSet::default()
        }
    }

    #[test]
    fn small_reference_trips_both_triggers_under_or() {
        // raw 100 over 20 days -> 150 normalized, against a reference of 20.
        let set = previous_only(150.0, 20.0);
        let verdict = classify_comparisons(&set, 30.0, 100.0, Combinator::Or, 0.0);

        assert!(verdict.is_anomaly);
        assert!(verdict.reason.contains("650.0%"), "got: {}", verdict.reason);
        assert!(verdict.reason.contains("130.0 m³"), "got: {}", verdict.reason);
        assert!((verdict.severity - 649.97).abs() < 0.01);
    }

    #[test]
    fn percentage_alone_suffices_under_or() {
        // abs diff of exactly 2000 is not strictly greater than 2000.
        let set = previous_only(10_000.0, 8_000.0);
        let verdict = classify_comparisons(&set, 20.0, 2_000.0, Combinator::Or, 0.0);

        assert!(verdict.is_anomaly);
        assert!(verdict.reason.contains('%'));
        assert!(!verdict.reason.contains("m³"), "got: {}", verdict.reason);
    }

    #[test]
    fn and_requires_both_triggers() {
        let set = previous_only(10_000.0, 8_000.0);
        let verdict = classify_comparisons(&set, 20.0, 2_000.0, Combinator::And, 0.0);
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.reason, "Normal");
    }

    #[test]
    fn weighted_uses_fixed_abs_divisor() {
        // pct ~25, abs 2000 -> score ~112.5 against (20 + 200) / 2 = 110.
        let verdict = classify_comparisons(
            &previous_only(10_000.0, 8_000.0),
            20.0,
            2_000.0,
            Combinator::Weighted,
            0.0,
        );
        assert!(verdict.is_anomaly);
        assert!(verdict.reason.contains("weighted score"));

        let verdict = classify_comparisons(
            &previous_only(10_000.0, 8_000.0),
            30.0,
            2_100.0,
            Combinator::Weighted,
            0.0,
        );
        assert!(!verdict.is_anomaly);
    }

    #[test]
    fn any_single_comparison_flags_the_facility() {
        let set = ComparisonSet {
            same_month_last_year: Some(compare(ReferenceKind::SameMonthLastYear, 100.0, 99.0, None)),
            previous_period: Some(compare(ReferenceKind::PreviousPeriod, 100.0, 98.0, None)),
            two_periods_prior: Some(compare(ReferenceKind::TwoPeriodsPrior, 100.0, 40.0, None)),
        };
        let verdict = classify_comparisons(&set, 30.0, 100.0, Combinator::Or, 0.0);
        assert!(verdict.is_anomaly);
        assert!(verdict.reason.starts_with("vs two periods prior"));
    }

    #[test]
    fn empty_comparison_set_is_normal() {
        let verdict = classify_comparisons(&ComparisonSet::default(), 0.0, 0.0, Combinator::Or, 0.0);
        assert_eq!(verdict, AnomalyVerdict::normal());
    }

    #[test]
    fn tolerance_suppresses_small_percentage_swings() {
        // 5% swing on a large consumer: 500 m³ absolute.
        let set = previous_only(10_500.0, 10_000.0);
        assert!(classify_comparisons(&set, 30.0, 100.0, Combinator::Or, 0.0).is_anomaly);
        assert!(!classify_comparisons(&set, 30.0, 100.0, Combinator::Or, 10.0).is_anomaly);
    }

    #[test]
    fn negative_reference_still_trips_absolute_trigger() {
        let set = previous_only(100.0, -50.0);
        let comparison = set.previous_period.as_ref().unwrap();
        assert!(comparison.pct_diff < 0.0);
        assert_relative_eq!(comparison.abs_diff, 150.0);

        let verdict = classify_comparisons(&set, 30.0, 100.0, Combinator::Or, 0.0);
        assert!(verdict.is_anomaly);
        assert!(verdict.reason.contains("150.0 m³"), "got: {}", verdict.reason);
        assert!(!verdict.reason.contains('%'), "got: {}", verdict.reason);
        assert!(verdict.severity > 0.0);
    }

    #[test]
    fn tolerance_applies_to_magnitude_of_negative_swings() {
        // -10500 against -10000: pct_diff is about -5%, abs 500 m³.
        let set = previous_only(-10_500.0, -10_000.0);
        assert!(classify_comparisons(&set, 30.0, 100.0, Combinator::Or, 0.0).is_anomaly);
        assert!(!classify_comparisons(&set, 30.0, 100.0, Combinator::Or, 10.0).is_anomaly);
        assert!(classify_comparisons(&set, 30.0, 100.0, Combinator::Or, 4.0).is_anomaly);
    }

    #[test]
    fn zero_reference_is_biased_not_divided_by_zero() {
        let set = previous_only(30.0, 0.0);
        let verdict = classify_comparisons(&set, 30.0, 100.0, Combinator::Or, 0.0);
        assert!(verdict.is_anomaly);
        assert!(verdict.severity.is_finite());
        assert_relative_eq!(verdict.severity, 3_000_000.0, max_relative = 1e-9);

        let flat = previous_only(0.0, 0.0);
        assert!(!classify_comparisons(&flat, 30.0, 100.0, Combinator::Or, 0.0).is_anomaly);
    }

    #[test]
    fn or_flags_are_monotonic_in_each_threshold() {
        let sets: Vec<ComparisonSet> = [(150.0, 20.0), (10_000.0, 8_000.0), (55.0, 50.0), (0.0, 30.0)]
            .iter()
            .map(|&(c, r)| previous_only(c, r))
            .collect();
        let steps = [0.0, 5.0, 20.0, 50.0, 100.0, 500.0, 2_000.0, 5_000.0];

        for set in &sets {
            for &abs in &steps {
                let mut was_flagged = true;
                for &pct in &steps {
                    let flagged = classify_comparisons(set, pct, abs, Combinator::Or, 0.0).is_anomaly;
                    assert!(was_flagged || !flagged, "raising pct re-flagged a facility");
                    was_flagged = flagged;
                }
            }
            for &pct in &steps {
                let mut was_flagged = true;
                for &abs in &steps {
                    let flagged = classify_comparisons(set, pct, abs, Combinator::Or, 0.0).is_anomaly;
                    assert!(was_flagged || !flagged, "raising abs re-flagged a facility");
                    was_flagged = flagged;
                }
            }
        }
    }

    #[test]
    fn and_flags_are_subset_of_or_flags() {
        let steps = [0.0, 10.0, 25.0, 100.0, 1_000.0];
        for &(c, r) in &[(150.0, 20.0), (10_000.0, 8_000.0), (55.0, 50.0), (30.0, 0.0)] {
            let set = previous_only(c, r);
            for &pct in &steps {
                for &abs in &steps {
                    let and = classify_comparisons(&set, pct, abs, Combinator::And, 0.0).is_anomaly;
                    let or = classify_comparisons(&set, pct, abs, Combinator::Or, 0.0).is_anomaly;
                    assert!(!and || or);
                }
            }
        }
    }

    #[test]
    fn single_record_never_trips_statistical_modes() {
        let stats = series_stats(&[1_000_000.0]).unwrap();
        for threshold in [0.0, 0.5, 1.0, 3.0] {
            assert!(!classify_zscore(1_000_000.0, &stats, threshold).is_anomaly);
            assert!(!classify_mean_deviation(1_000_000.0, &stats, threshold).is_anomaly);
        }
        assert!(!classify_iqr(1_000_000.0, &stats, 0.1).is_anomaly);
    }

    #[test]
    fn zscore_flags_outlier() {
        let values = [100.0, 102.0, 98.0, 101.0, 99.0, 400.0];
        let stats = series_stats(&values).unwrap();
        let verdict = classify_zscore(400.0, &stats, 1.5);
        assert!(verdict.is_anomaly);
        assert!(verdict.severity > 1.5);
        assert!(!classify_zscore(101.0, &stats, 1.5).is_anomaly);
    }

    #[test]
    fn constant_series_has_zero_z_deviation() {
        let stats = series_stats(&[50.0, 50.0, 50.0]).unwrap();
        assert_eq!(z_deviation(50.0, &stats), 0.0);
        assert!(!classify_zscore(50.0, &stats, 1.0).is_anomaly);
    }

    #[test]
    fn iqr_flags_values_outside_bounds() {
        let stats = series_stats(&[10.0, 11.0, 12.0, 13.0, 14.0, 60.0]).unwrap();
        let (lower, upper) = iqr_bounds(&stats, 1.5);
        assert!(lower < 10.0 && upper < 60.0);

        let verdict = classify_iqr(60.0, &stats, 1.5);
        assert!(verdict.is_anomaly);
        assert!(verdict.reason.contains("above upper bound"));
        assert!(!classify_iqr(12.0, &stats, 1.5).is_anomaly);
    }

    #[test]
    fn mean_deviation_guards_zero_mean() {
        let stats = series_stats(&[-5.0, 5.0]).unwrap();
        assert_eq!(mean_deviation_pct(5.0, &stats), 0.0);

        let stats = series_stats(&[100.0, 100.0, 200.0]).unwrap();
        let verdict = classify_mean_deviation(200.0, &stats, 30.0);
        assert!(verdict.is_anomaly);
        assert!((verdict.severity - 50.0).abs() < 1e-9);
    }

    #[test]
    fn evaluate_dispatches_on_strategy() {
        let stats = series_stats(&[100.0, 100.0, 200.0]).unwrap();
        let comparisons = previous_only(200.0, 100.0);

        let threshold = DetectionStrategy::default();
        assert!(evaluate(&threshold, 0.0, 200.0, &comparisons, None).is_anomaly);

        let mean = DetectionStrategy::MeanDeviation { threshold_pct: 30.0 };
        assert!(evaluate(&mean, 0.0, 200.0, &comparisons, Some(&stats)).is_anomaly);
        assert!(!evaluate(&mean, 0.0, 200.0, &comparisons, None).is_anomaly);
    }
}
