use std::fmt::Write;

use crate::models::{Comparison, FacilityResult, FacilitySummary, RunSummary};
use crate::pipeline::Analysis;
use crate::reference::series_stats;

pub fn summarize(results: &[FacilityResult], facility_values: &[(String, Vec<f64>)]) -> RunSummary {
    let evaluated_count = results.len();
    let anomaly_count = results.iter().filter(|r| r.verdict.is_anomaly).count();

    let mut facilities: Vec<FacilitySummary> = facility_values
        .iter()
        .filter_map(|(facility_id, values)| {
            series_stats(values).map(|stats| FacilitySummary {
                facility_id: facility_id.clone(),
                count: stats.count,
                mean: stats.mean,
                min: stats.min,
                max: stats.max,
                std: stats.std,
            })
        })
        .collect();
    facilities.sort_by(|a, b| a.facility_id.cmp(&b.facility_id));

    RunSummary {
        observation_count: facility_values.iter().map(|(_, values)| values.len()).sum(),
        evaluated_count,
        anomaly_count,
        normal_count: evaluated_count - anomaly_count,
        anomaly_ratio: if evaluated_count == 0 {
            0.0
        } else {
            anomaly_count as f64 / evaluated_count as f64
        },
        facilities,
    }
}

/// Flagged results sorted by severity, highest first; ties by facility id.
pub fn anomalies_only(results: &[FacilityResult]) -> Vec<&FacilityResult> {
    let mut anomalies: Vec<&FacilityResult> =
        results.iter().filter(|r| r.verdict.is_anomaly).collect();
    anomalies.sort_by(|a, b| {
        b.verdict
            .severity
            .partial_cmp(&a.verdict.severity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.facility_id.cmp(&b.facility_id))
    });
    anomalies
}

/// Reference value with the signed change of the current value against it.
fn reference_cell(current: f64, comparison: Option<&Comparison>) -> String {
    match comparison {
        Some(c) => {
            let pct = if current < c.reference_value {
                -c.pct_diff
            } else {
                c.pct_diff
            };
            format!("{:.1} ({:+.1}%)", c.reference_value, pct)
        }
        None => "-".to_string(),
    }
}

pub fn build_report(input: &str, analysis: &Analysis) -> String {
    let summary = &analysis.summary;
    let diagnostics = &analysis.diagnostics;
    let mut output = String::new();

    let _ = writeln!(output, "# Water Consumption Anomaly Report");
    let _ = writeln!(
        output,
        "Generated for {} using {} detection",
        input, analysis.method
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Facilities evaluated: {}", summary.evaluated_count);
    let _ = writeln!(output, "- Observations: {}", summary.observation_count);
    let _ = writeln!(output, "- Anomalies: {}", summary.anomaly_count);
    let _ = writeln!(output, "- Normal: {}", summary.normal_count);
    let _ = writeln!(
        output,
        "- Anomaly ratio: {:.1}%",
        summary.anomaly_ratio * 100.0
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Quality");
    if diagnostics.excluded_periods.is_empty() && diagnostics.dropped_cells() == 0 {
        let _ = writeln!(output, "No columns or cells were excluded.");
    } else {
        if !diagnostics.excluded_periods.is_empty() {
            let _ = writeln!(
                output,
                "- Excluded period columns: {}",
                diagnostics.excluded_periods.join(", ")
            );
        }
        let _ = writeln!(output, "- \"No data\" cells: {}", diagnostics.sentinel_cells);
        let _ = writeln!(output, "- Non-numeric cells: {}", diagnostics.unparseable_cells);
        let _ = writeln!(output, "- Empty cells: {}", diagnostics.empty_cells);
    }
    if diagnostics.blank_facility_rows > 0 {
        let _ = writeln!(
            output,
            "- Rows without a facility id: {}",
            diagnostics.blank_facility_rows
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Anomalies");
    let anomalies = analysis.anomalies();
    if anomalies.is_empty() {
        let _ = writeln!(output, "No anomalies detected.");
    } else {
        let _ = writeln!(
            output,
            "| Facility | Period | Current (30d) | Same month last year | Previous period | Reason |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|");
        for result in anomalies {
            let _ = writeln!(
                output,
                "| {} | {} | {:.2} | {} | {} | {} |",
                result.facility_id,
                result.current.period_label,
                result.current.normalized,
                reference_cell(
                    result.current.normalized,
                    result.comparisons.same_month_last_year.as_ref()
                ),
                reference_cell(
                    result.current.normalized,
                    result.comparisons.previous_period.as_ref()
                ),
                result.verdict.reason
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Facility Statistics");
    if summary.facilities.is_empty() {
        let _ = writeln!(output, "No facilities with usable readings.");
    } else {
        let _ = writeln!(output, "| Facility | Count | Mean | Min | Max | Std |");
        let _ = writeln!(output, "|---|---|---|---|---|---|");
        for facility in &summary.facilities {
            let _ = writeln!(
                output,
                "| {} | {} | {:.1} | {:.1} | {:.1} | {:.1} |",
                facility.facility_id,
                facility.count,
                facility.mean,
                facility.min,
                facility.max,
                facility.std
            );
        }
    }

    output
}
