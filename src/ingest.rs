use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use csv::{ByteRecord, ReaderBuilder, Trim};
use tracing::{debug, info, warn};

use crate::error::{DataError, Result};
use crate::models::{IngestDiagnostics, ObservationRecord, Period, RawReading};
use crate::normalize::{self, Dropped};
use crate::periods;

/// How the upload's columns are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Layout {
    /// Decide from the header row.
    Auto,
    /// Facility id followed by one column per period label.
    Wide,
    /// Facility id followed by two or three consumption columns, oldest first.
    Direct,
}

/// One facility row of a direct-comparison upload.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectRow {
    pub facility_id: String,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub periods: Vec<Period>,
    pub records: Vec<ObservationRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectTable {
    pub value_labels: Vec<String>,
    pub rows: Vec<DirectRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Table {
    Wide(WideTable),
    Direct(DirectTable),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub table: Table,
    pub diagnostics: IngestDiagnostics,
}

pub fn load(path: &Path, layout: Layout, sentinels: &[String]) -> Result<Dataset> {
    if !path.exists() {
        return Err(DataError::FileNotFound(path.display().to_string()));
    }
    let file = std::fs::File::open(path)?;
    let dataset = load_from_reader(file, layout, sentinels)?;
    info!(
        path = %path.display(),
        dropped_cells = dataset.diagnostics.dropped_cells(),
        excluded_periods = dataset.diagnostics.excluded_periods.len(),
        "loaded upload"
    );
    Ok(dataset)
}

pub fn load_from_reader<R: Read>(
    source: R,
    layout: Layout,
    sentinels: &[String],
) -> Result<Dataset> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(source);

    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(DataError::Malformed(format!(
            "expected an id column and at least one value column, found {} column(s)",
            headers.len()
        )));
    }

    let mut rows = Vec::new();
    for result in reader.byte_records() {
        let record = result?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        rows.push(record);
    }
    if rows.is_empty() {
        return Err(DataError::EmptyDataset);
    }

    let value_headers: Vec<&str> = headers.iter().skip(1).collect();
    let resolved = match layout {
        Layout::Auto => detect_layout(&value_headers)?,
        other => other,
    };
    debug!(?resolved, columns = value_headers.len(), "resolved upload layout");

    match resolved {
        Layout::Direct => read_direct(&value_headers, &rows, sentinels),
        _ => read_wide(&value_headers, &rows, sentinels),
    }
}

fn detect_layout(value_headers: &[&str]) -> Result<Layout> {
    if value_headers
        .iter()
        .any(|label| periods::parse_period(label).is_some())
    {
        return Ok(Layout::Wide);
    }
    if (2..=3).contains(&value_headers.len()) {
        return Ok(Layout::Direct);
    }
    Err(DataError::Malformed(format!(
        "none of the {} value columns is a day.month.year period label",
        value_headers.len()
    )))
}

/// One data cell as text. A missing trailing cell reads as empty; bytes
/// that are not UTF-8 make the cell unparseable.
fn cell(row: &ByteRecord, index: usize) -> std::result::Result<&str, Dropped> {
    match row.get(index) {
        Some(bytes) => std::str::from_utf8(bytes)
            .map(str::trim)
            .map_err(|_| Dropped::Unparseable),
        None => Ok(""),
    }
}

/// Facility id from the first cell, counting blanks and warning on repeats.
fn facility_id<'a>(
    row: &'a ByteRecord,
    seen: &mut HashSet<String>,
    diagnostics: &mut IngestDiagnostics,
) -> Option<&'a str> {
    let Ok(id) = cell(row, 0) else {
        warn!(
            line = row.position().map(|p| p.line()),
            "facility id is not valid UTF-8; row skipped"
        );
        diagnostics.blank_facility_rows += 1;
        return None;
    };
    if id.is_empty() {
        diagnostics.blank_facility_rows += 1;
        return None;
    }
    if !seen.insert(id.to_string()) {
        warn!(facility = id, "facility appears on more than one row; merging");
    }
    Some(id)
}

fn count_drop(diagnostics: &mut IngestDiagnostics, dropped: Dropped) {
    match dropped {
        Dropped::Empty => diagnostics.empty_cells += 1,
        Dropped::Sentinel => diagnostics.sentinel_cells += 1,
        Dropped::Unparseable => diagnostics.unparseable_cells += 1,
    }
}

fn read_wide(
    value_headers: &[&str],
    rows: &[ByteRecord],
    sentinels: &[String],
) -> Result<Dataset> {
    let mut diagnostics = IngestDiagnostics::default();
    let (indexed_periods, excluded) = periods::parse_periods(value_headers.iter().copied());

    if indexed_periods.is_empty() {
        return Err(DataError::Malformed(
            "no column header is a usable day.month.year period label".to_string(),
        ));
    }
    for label in &excluded {
        warn!(
            label = label.as_str(),
            "period column excluded: label has no valid date or day count"
        );
    }
    diagnostics.excluded_periods = excluded;

    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for row in rows {
        let Some(id) = facility_id(row, &mut seen, &mut diagnostics) else {
            continue;
        };

        for (column, period) in &indexed_periods {
            let raw_value = match cell(row, column + 1) {
                Ok(text) => text.to_string(),
                Err(dropped) => {
                    debug!(facility = id, period = period.label.as_str(), "cell is not UTF-8");
                    count_drop(&mut diagnostics, dropped);
                    continue;
                }
            };
            let reading = RawReading {
                facility_id: id.to_string(),
                period_label: period.label.clone(),
                raw_value,
            };
            match normalize::normalize_reading(&reading, period, sentinels) {
                Ok(record) => records.push(record),
                Err(dropped) => {
                    debug!(
                        facility = id,
                        period = reading.period_label.as_str(),
                        ?dropped,
                        "cell dropped"
                    );
                    count_drop(&mut diagnostics, dropped);
                }
            }
        }
    }

    Ok(Dataset {
        table: Table::Wide(WideTable {
            periods: indexed_periods.into_iter().map(|(_, period)| period).collect(),
            records,
        }),
        diagnostics,
    })
}

fn read_direct(
    value_headers: &[&str],
    rows: &[ByteRecord],
    sentinels: &[String],
) -> Result<Dataset> {
    if !(2..=3).contains(&value_headers.len()) {
        return Err(DataError::Malformed(format!(
            "direct comparison needs 2 or 3 consumption columns, found {}",
            value_headers.len()
        )));
    }

    let mut diagnostics = IngestDiagnostics::default();
    let mut seen = HashSet::new();
    let mut direct_rows = Vec::new();

    for row in rows {
        let Some(id) = facility_id(row, &mut seen, &mut diagnostics) else {
            continue;
        };

        let values = (0..value_headers.len())
            .map(|column| {
                match cell(row, column + 1).and_then(|text| parse_cell(text, sentinels)) {
                    Ok(value) => Some(value),
                    Err(dropped) => {
                        count_drop(&mut diagnostics, dropped);
                        None
                    }
                }
            })
            .collect();

        direct_rows.push(DirectRow {
            facility_id: id.to_string(),
            values,
        });
    }

    Ok(Dataset {
        table: Table::Direct(DirectTable {
            value_labels: value_headers.iter().map(|s| s.to_string()).collect(),
            rows: direct_rows,
        }),
        diagnostics,
    })
}

fn parse_cell(cell: &str, sentinels: &[String]) -> std::result::Result<f64, Dropped> {
    if normalize::is_sentinel(cell, sentinels) {
        return Err(Dropped::Sentinel);
    }
    if cell.is_empty() {
        return Err(Dropped::Empty);
    }
    normalize::coerce_number(cell).ok_or(Dropped::Unparseable)
}
