//! Export of the flagged result table.
//!
//! CSV exports write one file per sheet into a directory; JSON exports
//! write a single workbook document keyed by sheet name. Values are
//! written unrounded.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::models::{Comparison, FacilityResult, FacilitySummary};
use crate::pipeline::Analysis;

pub const ANOMALIES_FILE: &str = "anomalies.csv";
pub const ALL_DATA_FILE: &str = "all_data.csv";
pub const SUMMARY_FILE: &str = "summary.csv";
pub const FACILITY_STATS_FILE: &str = "facility_stats.csv";
pub const OBSERVATIONS_FILE: &str = "observations.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

/// One row of the "All Data" and "Anomalies" sheets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub facility_id: String,
    pub period: String,
    pub current_date: Option<NaiveDate>,
    pub current_days: u32,
    pub current_raw: f64,
    pub current_normalized: f64,
    pub last_year_value: Option<f64>,
    pub last_year_date: Option<NaiveDate>,
    pub last_year_abs_diff: Option<f64>,
    pub last_year_pct_diff: Option<f64>,
    pub previous_value: Option<f64>,
    pub previous_date: Option<NaiveDate>,
    pub previous_abs_diff: Option<f64>,
    pub previous_pct_diff: Option<f64>,
    pub two_prior_value: Option<f64>,
    pub two_prior_date: Option<NaiveDate>,
    pub two_prior_abs_diff: Option<f64>,
    pub two_prior_pct_diff: Option<f64>,
    pub series_mean: Option<f64>,
    pub series_std: Option<f64>,
    pub series_q1: Option<f64>,
    pub series_q3: Option<f64>,
    pub is_anomaly: bool,
    pub severity: f64,
    pub reason: String,
}

impl From<&FacilityResult> for ResultRow {
    fn from(result: &FacilityResult) -> Self {
        let parts = |c: Option<&Comparison>| {
            (
                c.map(|c| c.reference_value),
                c.and_then(|c| c.reference_date),
                c.map(|c| c.abs_diff),
                c.map(|c| c.pct_diff),
            )
        };
        let (last_year_value, last_year_date, last_year_abs_diff, last_year_pct_diff) =
            parts(result.comparisons.same_month_last_year.as_ref());
        let (previous_value, previous_date, previous_abs_diff, previous_pct_diff) =
            parts(result.comparisons.previous_period.as_ref());
        let (two_prior_value, two_prior_date, two_prior_abs_diff, two_prior_pct_diff) =
            parts(result.comparisons.two_periods_prior.as_ref());

        ResultRow {
            facility_id: result.facility_id.clone(),
            period: result.current.period_label.clone(),
            current_date: result.current.date,
            current_days: result.current.days,
            current_raw: result.current.raw,
            current_normalized: result.current.normalized,
            last_year_value,
            last_year_date,
            last_year_abs_diff,
            last_year_pct_diff,
            previous_value,
            previous_date,
            previous_abs_diff,
            previous_pct_diff,
            two_prior_value,
            two_prior_date,
            two_prior_abs_diff,
            two_prior_pct_diff,
            series_mean: result.stats.map(|s| s.mean),
            series_std: result.stats.map(|s| s.std),
            series_q1: result.stats.map(|s| s.q1),
            series_q3: result.stats.map(|s| s.q3),
            is_anomaly: result.verdict.is_anomaly,
            severity: result.verdict.severity,
            reason: result.verdict.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub metric: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityStatsRow {
    pub facility_id: String,
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

impl From<&FacilitySummary> for FacilityStatsRow {
    fn from(summary: &FacilitySummary) -> Self {
        FacilityStatsRow {
            facility_id: summary.facility_id.clone(),
            count: summary.count,
            mean: summary.mean,
            min: summary.min,
            max: summary.max,
            std: summary.std,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub facility_id: String,
    pub period: String,
    pub date: NaiveDate,
    pub reported_days: u32,
    pub raw_consumption: f64,
    pub normalized_consumption: f64,
}

/// Every sheet of one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheets {
    #[serde(rename = "Anomalies")]
    pub anomalies: Vec<ResultRow>,
    #[serde(rename = "All Data")]
    pub all_data: Vec<ResultRow>,
    #[serde(rename = "Summary")]
    pub summary: Vec<SummaryRow>,
    #[serde(rename = "Facility Stats")]
    pub facility_stats: Vec<FacilityStatsRow>,
    #[serde(rename = "Observations")]
    pub observations: Vec<ObservationRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    pub sheets: Sheets,
}

fn summary_rows(analysis: &Analysis) -> Vec<SummaryRow> {
    let summary = &analysis.summary;
    let diagnostics = &analysis.diagnostics;
    let row = |metric: &str, value: String| SummaryRow {
        metric: metric.to_string(),
        value,
    };

    vec![
        row("method", analysis.method.to_string()),
        row("facilities_evaluated", summary.evaluated_count.to_string()),
        row("observations", summary.observation_count.to_string()),
        row("anomalies", summary.anomaly_count.to_string()),
        row("normal", summary.normal_count.to_string()),
        row("anomaly_ratio", summary.anomaly_ratio.to_string()),
        row(
            "excluded_period_columns",
            diagnostics.excluded_periods.join(" | "),
        ),
        row("no_data_cells", diagnostics.sentinel_cells.to_string()),
        row("non_numeric_cells", diagnostics.unparseable_cells.to_string()),
        row("empty_cells", diagnostics.empty_cells.to_string()),
        row(
            "rows_without_facility_id",
            diagnostics.blank_facility_rows.to_string(),
        ),
    ]
}

pub fn build_sheets(analysis: &Analysis) -> Sheets {
    Sheets {
        anomalies: analysis
            .anomalies()
            .into_iter()
            .map(ResultRow::from)
            .collect(),
        all_data: analysis.results.iter().map(ResultRow::from).collect(),
        summary: summary_rows(analysis),
        facility_stats: analysis
            .summary
            .facilities
            .iter()
            .map(FacilityStatsRow::from)
            .collect(),
        observations: analysis
            .series
            .iter()
            .flat_map(|series| series.records.iter())
            .map(|record| ObservationRow {
                facility_id: record.facility_id.clone(),
                period: record.period.label.clone(),
                date: record.period.calendar_date,
                reported_days: record.period.reported_days,
                raw_consumption: record.raw_consumption,
                normalized_consumption: record.normalized_consumption,
            })
            .collect(),
    }
}

fn write_sheet<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes every sheet as a CSV file into `dir`, creating it if needed.
pub fn write_csv_dir(dir: &Path, analysis: &Analysis) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let sheets = build_sheets(analysis);

    let paths = [
        ANOMALIES_FILE,
        ALL_DATA_FILE,
        SUMMARY_FILE,
        FACILITY_STATS_FILE,
        OBSERVATIONS_FILE,
    ]
    .map(|name| dir.join(name));

    write_sheet(&paths[0], &sheets.anomalies)?;
    write_sheet(&paths[1], &sheets.all_data)?;
    write_sheet(&paths[2], &sheets.summary)?;
    write_sheet(&paths[3], &sheets.facility_stats)?;
    write_sheet(&paths[4], &sheets.observations)?;

    info!(dir = %dir.display(), anomalies = sheets.anomalies.len(), "wrote CSV export");
    Ok(paths.to_vec())
}

pub fn write_json(path: &Path, analysis: &Analysis) -> Result<()> {
    let workbook = Workbook {
        sheets: build_sheets(analysis),
    };
    let json = serde_json::to_string_pretty(&workbook)?;
    fs::write(path, json)?;
    info!(path = %path.display(), "wrote JSON export");
    Ok(())
}

/// Reads an exported "All Data" sheet back.
pub fn read_all_data(path: &Path) -> Result<Vec<ResultRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<ResultRow>() {
        rows.push(result?);
    }
    Ok(rows)
}
