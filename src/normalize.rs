//! Raw cell → 30-day-equivalent consumption.

use crate::models::{ObservationRecord, Period, RawReading};

pub const NORMALIZED_DAYS: f64 = 30.0;

/// Why a cell produced no record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dropped {
    Empty,
    Sentinel,
    Unparseable,
}

pub fn normalize_value(raw: f64, reported_days: u32) -> f64 {
    raw / reported_days as f64 * NORMALIZED_DAYS
}

/// Numeric coercion of one cell.
///
/// A single decimal comma is accepted when no dot is present, unless exactly
/// three digits follow it: `1,234` is ambiguous with a thousands separator
/// and is rejected rather than read as 1.234.
pub fn coerce_number(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    let value = match cell.parse::<f64>() {
        Ok(value) => value,
        Err(_) => {
            let (_, fraction) = cell.split_once(',')?;
            let thousands = fraction.len() == 3 && fraction.bytes().all(|b| b.is_ascii_digit());
            if cell.contains('.') || fraction.contains(',') || thousands {
                return None;
            }
            cell.replacen(',', ".", 1).parse::<f64>().ok()?
        }
    };
    value.is_finite().then_some(value)
}

pub fn is_sentinel(cell: &str, sentinels: &[String]) -> bool {
    sentinels
        .iter()
        .any(|token| !token.is_empty() && cell.contains(token.as_str()))
}

pub fn normalize_reading(
    reading: &RawReading,
    period: &Period,
    sentinels: &[String],
) -> Result<ObservationRecord, Dropped> {
    let cell = reading.raw_value.trim();

    if is_sentinel(cell, sentinels) {
        return Err(Dropped::Sentinel);
    }
    if cell.is_empty() {
        return Err(Dropped::Empty);
    }
    let raw = coerce_number(cell).ok_or(Dropped::Unparseable)?;

    Ok(ObservationRecord {
        facility_id: reading.facility_id.clone(),
        period: period.clone(),
        raw_consumption: raw,
        normalized_consumption: normalize_value(raw, period.reported_days),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn sentinels() -> Vec<String> {
        vec!["#YOK".to_string(), "#N/A".to_string()]
    }

    fn period(days: u32) -> Period {
        Period {
            label: format!("{days}.11.2025"),
            calendar_date: NaiveDate::from_ymd_opt(2025, 11, days).unwrap(),
            reported_days: days,
        }
    }

    fn reading(value: &str) -> RawReading {
        RawReading {
            facility_id: "F-100".to_string(),
            period_label: "20.11.2025".to_string(),
            raw_value: value.to_string(),
        }
    }

    #[test]
    fn scales_to_thirty_days() {
        let record = normalize_reading(&reading("100"), &period(20), &sentinels())
            .expect("numeric cell should normalize");
        assert_relative_eq!(record.normalized_consumption, 150.0);
        assert_relative_eq!(record.raw_consumption, 100.0);
    }

    #[test]
    fn normalization_is_exact_for_every_day_count() {
        for days in 1..=30u32 {
            let raw = 1234.5;
            assert_eq!(normalize_value(raw, days), raw / days as f64 * 30.0);
        }
    }

    #[test]
    fn sentinel_cells_are_dropped() {
        assert_eq!(
            normalize_reading(&reading("#YOK"), &period(20), &sentinels()),
            Err(Dropped::Sentinel)
        );
        assert_eq!(
            normalize_reading(&reading("=#YOK!"), &period(20), &sentinels()),
            Err(Dropped::Sentinel)
        );
    }

    #[test]
    fn non_numeric_cells_are_dropped_not_zero_filled() {
        assert_eq!(
            normalize_reading(&reading("n/a"), &period(20), &sentinels()),
            Err(Dropped::Unparseable)
        );
        assert_eq!(
            normalize_reading(&reading("NaN"), &period(20), &sentinels()),
            Err(Dropped::Unparseable)
        );
        assert_eq!(
            normalize_reading(&reading("  "), &period(20), &sentinels()),
            Err(Dropped::Empty)
        );
    }

    #[test]
    fn negative_and_zero_values_propagate() {
        let record = normalize_reading(&reading("-15"), &period(15), &sentinels()).unwrap();
        assert_relative_eq!(record.normalized_consumption, -30.0);

        let record = normalize_reading(&reading("0"), &period(15), &sentinels()).unwrap();
        assert_eq!(record.normalized_consumption, 0.0);
    }

    #[test]
    fn decimal_comma_is_accepted() {
        assert_eq!(coerce_number("12,5"), Some(12.5));
        assert_eq!(coerce_number("649,97"), Some(649.97));
        assert_eq!(coerce_number("1,234,5"), None);
        assert_eq!(coerce_number("inf"), None);
    }

    #[test]
    fn thousands_separated_values_are_dropped_not_misread() {
        assert_eq!(coerce_number("1,234"), None);
        assert_eq!(coerce_number("12,000"), None);
        assert_eq!(coerce_number("1,234.5"), None);
        assert_eq!(
            normalize_reading(&reading("1,234"), &period(20), &sentinels()),
            Err(Dropped::Unparseable)
        );
    }
}
