//! Reference selection: the baselines a facility's current value is judged against.

use chrono::{Datelike, NaiveDate};

use crate::models::{
    Comparison, ComparisonSet, FacilitySeries, ObservationRecord, ReferenceKind, SeriesStats,
};

/// Bias added to the reference before dividing, so a zero reference never
/// divides by zero. Kept for parity with previously issued reports.
pub const PCT_EPSILON: f64 = 0.001;

pub fn pct_diff(current: f64, reference: f64) -> f64 {
    (current - reference).abs() / (reference + PCT_EPSILON) * 100.0
}

pub fn compare(
    kind: ReferenceKind,
    current: f64,
    reference_value: f64,
    reference_date: Option<NaiveDate>,
) -> Comparison {
    Comparison {
        kind,
        reference_value,
        reference_date,
        abs_diff: (current - reference_value).abs(),
        pct_diff: pct_diff(current, reference_value),
    }
}

/// Builds the comparison set for the series' latest record.
///
/// Same-month-last-year scans the whole series; if several records match
/// (which clean input never produces) the last one encountered wins.
pub fn select_references(series: &FacilitySeries) -> ComparisonSet {
    let records = &series.records;
    let Some(current) = records.last() else {
        return ComparisonSet::default();
    };
    let value = current.normalized_consumption;
    let current_date = current.period.calendar_date;

    let mut same_month = None;
    for record in records {
        let date = record.period.calendar_date;
        if date.month() == current_date.month() && date.year() == current_date.year() - 1 {
            same_month = Some(record);
        }
    }

    let nth_from_end = |n: usize| {
        records
            .len()
            .checked_sub(n + 1)
            .map(|index| &records[index])
    };

    let to_comparison = |kind, record: &ObservationRecord| {
        compare(
            kind,
            value,
            record.normalized_consumption,
            Some(record.period.calendar_date),
        )
    };

    ComparisonSet {
        same_month_last_year: same_month
            .map(|record| to_comparison(ReferenceKind::SameMonthLastYear, record)),
        previous_period: nth_from_end(1)
            .map(|record| to_comparison(ReferenceKind::PreviousPeriod, record)),
        two_periods_prior: nth_from_end(2)
            .map(|record| to_comparison(ReferenceKind::TwoPeriodsPrior, record)),
    }
}

/// Mean, sample standard deviation, extremes and quartiles over every value.
///
/// Returns `None` for an empty slice. With a single value the deviation is 0.
pub fn series_stats(values: &[f64]) -> Option<SeriesStats> {
    if values.is_empty() {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.max(0.0).sqrt()
    } else {
        0.0
    };

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    Some(SeriesStats {
        count: values.len(),
        mean,
        std,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        q1: quantile(&sorted, 0.25),
        q3: quantile(&sorted, 0.75),
    })
}

/// Linear interpolation between closest ranks on already sorted data.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }

    let index = q * (sorted.len() as f64 - 1.0);
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper || upper >= sorted.len() {
        sorted[lower]
    } else {
        let fraction = index - lower as f64;
        sorted[lower] * (1.0 - fraction) + sorted[upper] * fraction
    }
}
