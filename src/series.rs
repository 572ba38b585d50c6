//! Series building.
//!
//! `build_series` takes the flat list of `ObservationRecord`s produced by
//! ingest and organizes them into one chronologically sorted
//! `FacilitySeries` per facility. A facility missing from a period column
//! simply has no record for it; nothing is interpolated or carried forward.

use std::collections::BTreeMap;

use crate::models::{FacilitySeries, ObservationRecord};

/// Groups records by facility id and sorts each group by calendar date.
///
/// The sort is stable, so two records for the same date keep their
/// column order. Facilities come back ordered by id.
pub fn build_series(records: Vec<ObservationRecord>) -> Vec<FacilitySeries> {
    let mut grouped: BTreeMap<String, Vec<ObservationRecord>> = BTreeMap::new();

    for record in records {
        grouped
            .entry(record.facility_id.clone())
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .filter(|(_, records)| !records.is_empty())
        .map(|(facility_id, mut records)| {
            records.sort_by_key(|record| record.period.calendar_date);
            FacilitySeries {
                facility_id,
                records,
            }
        })
        .collect()
}
