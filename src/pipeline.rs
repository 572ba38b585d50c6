//! One run: ingested table → series → references → verdicts → summary.

use tracing::{debug, info, warn};

use crate::config::{DetectionConfig, DetectionStrategy};
use crate::detect;
use crate::error::ConfigError;
use crate::ingest::{Dataset, DirectTable, Table, WideTable};
use crate::models::{
    ComparisonSet, CurrentValue, FacilityResult, FacilitySeries, IngestDiagnostics, ReferenceKind,
    RunSummary,
};
use crate::normalize::normalize_value;
use crate::reference::{compare, select_references, series_stats};
use crate::report;
use crate::series::build_series;

#[derive(Debug, Clone)]
pub struct Analysis {
    pub method: &'static str,
    pub series: Vec<FacilitySeries>,
    pub results: Vec<FacilityResult>,
    pub diagnostics: IngestDiagnostics,
    pub summary: RunSummary,
}

impl Analysis {
    /// Flagged facilities, most severe first.
    pub fn anomalies(&self) -> Vec<&FacilityResult> {
        report::anomalies_only(&self.results)
    }
}

pub fn run(dataset: Dataset, config: &DetectionConfig) -> Result<Analysis, ConfigError> {
    let Dataset { table, diagnostics } = dataset;

    let (series, results, facility_values) = match table {
        Table::Wide(wide) => evaluate_wide(wide, config),
        Table::Direct(direct) => {
            if config.strategy.needs_series() {
                return Err(ConfigError::Invalid {
                    name: "method",
                    reason: format!(
                        "{} needs a period-labelled series; direct uploads only support {}",
                        config.strategy.name(),
                        DetectionStrategy::default().name()
                    ),
                });
            }
            let (results, values) = evaluate_direct(direct, config);
            (Vec::new(), results, values)
        }
    };

    let summary = report::summarize(&results, &facility_values);
    info!(
        method = config.strategy.name(),
        facilities = summary.evaluated_count,
        anomalies = summary.anomaly_count,
        "detection complete"
    );

    Ok(Analysis {
        method: config.strategy.name(),
        series,
        results,
        diagnostics,
        summary,
    })
}

type FacilityValues = Vec<(String, Vec<f64>)>;

fn evaluate_wide(
    table: WideTable,
    config: &DetectionConfig,
) -> (Vec<FacilitySeries>, Vec<FacilityResult>, FacilityValues) {
    debug!(periods = table.periods.len(), records = table.records.len(), "building series");
    let series = build_series(table.records);
    let mut results = Vec::with_capacity(series.len());
    let mut values = Vec::with_capacity(series.len());

    for facility in &series {
        let Some(latest) = facility.latest() else {
            continue;
        };
        let facility_values = facility.values();
        let comparisons = select_references(facility);
        if comparisons.is_empty() {
            debug!(facility = facility.facility_id.as_str(), "no reference periods available");
        }
        let stats = if config.strategy.needs_series() {
            series_stats(&facility_values)
        } else {
            None
        };

        let verdict = detect::evaluate(
            &config.strategy,
            config.tolerance_pct,
            latest.normalized_consumption,
            &comparisons,
            stats.as_ref(),
        );
        if verdict.is_anomaly {
            debug!(
                facility = facility.facility_id.as_str(),
                reason = verdict.reason.as_str(),
                "anomaly"
            );
        }

        results.push(FacilityResult {
            facility_id: facility.facility_id.clone(),
            current: CurrentValue {
                period_label: latest.period.label.clone(),
                date: Some(latest.period.calendar_date),
                raw: latest.raw_consumption,
                normalized: latest.normalized_consumption,
                days: latest.period.reported_days,
            },
            comparisons,
            stats,
            verdict,
        });
        values.push((facility.facility_id.clone(), facility_values));
    }

    (series, results, values)
}

/// Direct uploads: earlier columns are full periods, the last column covers
/// `measured_period_days`.
fn evaluate_direct(
    table: DirectTable,
    config: &DetectionConfig,
) -> (Vec<FacilityResult>, FacilityValues) {
    let current_label = table.value_labels.last().cloned().unwrap_or_default();
    let days = config.measured_period_days;
    let mut results = Vec::with_capacity(table.rows.len());
    let mut values = Vec::with_capacity(table.rows.len());

    for row in table.rows {
        let Some((Some(raw), references)) = row.values.split_last().map(|(c, r)| (*c, r)) else {
            warn!(facility = row.facility_id.as_str(), "no current value; facility not evaluated");
            continue;
        };
        let normalized = normalize_value(raw, days);

        let kinds: &[ReferenceKind] = match references.len() {
            2 => &[ReferenceKind::SameMonthLastYear, ReferenceKind::PreviousPeriod],
            _ => &[ReferenceKind::PreviousPeriod],
        };
        let mut comparisons = ComparisonSet::default();
        let mut facility_values = Vec::new();

        for (kind, reference) in kinds.iter().zip(references) {
            let Some(reference) = *reference else {
                continue;
            };
            facility_values.push(reference);
            let comparison = compare(*kind, normalized, reference, None);
            match kind {
                ReferenceKind::SameMonthLastYear => {
                    comparisons.same_month_last_year = Some(comparison)
                }
                ReferenceKind::PreviousPeriod => comparisons.previous_period = Some(comparison),
                ReferenceKind::TwoPeriodsPrior => comparisons.two_periods_prior = Some(comparison),
            }
        }
        facility_values.push(normalized);

        let verdict = detect::evaluate(
            &config.strategy,
            config.tolerance_pct,
            normalized,
            &comparisons,
            None,
        );

        results.push(FacilityResult {
            facility_id: row.facility_id.clone(),
            current: CurrentValue {
                period_label: current_label.clone(),
                date: None,
                raw,
                normalized,
                days,
            },
            comparisons,
            stats: None,
            verdict,
        });
        values.push((row.facility_id, facility_values));
    }

    (results, values)
}
