use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One spreadsheet cell as read from the upload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub facility_id: String,
    pub period_label: String,
    pub raw_value: String,
}

/// A usable period column: the label plus what it decodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub label: String,
    pub calendar_date: NaiveDate,
    pub reported_days: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub facility_id: String,
    pub period: Period,
    pub raw_consumption: f64,
    pub normalized_consumption: f64,
}

/// Chronologically sorted records for a single facility.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilitySeries {
    pub facility_id: String,
    pub records: Vec<ObservationRecord>,
}

impl FacilitySeries {
    pub fn latest(&self) -> Option<&ObservationRecord> {
        self.records.last()
    }

    pub fn values(&self) -> Vec<f64> {
        self.records
            .iter()
            .map(|record| record.normalized_consumption)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    SameMonthLastYear,
    PreviousPeriod,
    TwoPeriodsPrior,
}

impl ReferenceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ReferenceKind::SameMonthLastYear => "vs same month last year",
            ReferenceKind::PreviousPeriod => "vs previous period",
            ReferenceKind::TwoPeriodsPrior => "vs two periods prior",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub kind: ReferenceKind,
    pub reference_value: f64,
    pub reference_date: Option<NaiveDate>,
    pub abs_diff: f64,
    pub pct_diff: f64,
}

/// Reference points for one facility's current value. Absent references stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonSet {
    pub same_month_last_year: Option<Comparison>,
    pub previous_period: Option<Comparison>,
    pub two_periods_prior: Option<Comparison>,
}

impl ComparisonSet {
    /// Present comparisons in evaluation order.
    pub fn present(&self) -> impl Iterator<Item = &Comparison> {
        [
            self.same_month_last_year.as_ref(),
            self.previous_period.as_ref(),
            self.two_periods_prior.as_ref(),
        ]
        .into_iter()
        .flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

/// Whole-series statistics used by the Z-score, IQR and mean-deviation modes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    pub reason: String,
    pub severity: f64,
}

impl AnomalyVerdict {
    pub fn normal() -> Self {
        Self {
            is_anomaly: false,
            reason: "Normal".to_string(),
            severity: 0.0,
        }
    }
}

/// The value being judged for one facility.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentValue {
    pub period_label: String,
    pub date: Option<NaiveDate>,
    pub raw: f64,
    pub normalized: f64,
    pub days: u32,
}

/// One row of the flagged result table.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityResult {
    pub facility_id: String,
    pub current: CurrentValue,
    pub comparisons: ComparisonSet,
    pub stats: Option<SeriesStats>,
    pub verdict: AnomalyVerdict,
}

/// Counts of data points dropped during ingest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestDiagnostics {
    pub excluded_periods: Vec<String>,
    pub sentinel_cells: usize,
    pub unparseable_cells: usize,
    pub empty_cells: usize,
    pub blank_facility_rows: usize,
}

impl IngestDiagnostics {
    pub fn dropped_cells(&self) -> usize {
        self.sentinel_cells + self.unparseable_cells + self.empty_cells
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacilitySummary {
    pub facility_id: String,
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub observation_count: usize,
    pub evaluated_count: usize,
    pub anomaly_count: usize,
    pub normal_count: usize,
    pub anomaly_ratio: f64,
    pub facilities: Vec<FacilitySummary>,
}
