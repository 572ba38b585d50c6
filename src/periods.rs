//! Period column labels such as `24.11.2025`.
//!
//! The label carries two things: the calendar date of the reading and,
//! in its leading token, the number of days the reading covers. A label
//! that cannot produce both is excluded rather than defaulted.

use chrono::NaiveDate;
use crate::models::Period;

// Two-digit years first: `%Y` would read "25" as year 25.
const LABEL_FORMATS: [&str; 2] = ["%d.%m.%y", "%d.%m.%Y"];

pub fn parse_label_date(label: &str) -> Option<NaiveDate> {
    let label = label.trim();
    // Spreadsheet exports sometimes append a midnight time to date headers.
    let date_part = label.split_whitespace().next()?;
    LABEL_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
}

/// Leading integer before the first `.`; must be positive.
pub fn parse_reported_days(label: &str) -> Option<u32> {
    let token = label.trim().split('.').next()?;
    match token.trim().parse::<u32>() {
        Ok(days) if days > 0 => Some(days),
        _ => None,
    }
}

pub fn parse_period(label: &str) -> Option<Period> {
    let calendar_date = parse_label_date(label)?;
    let reported_days = parse_reported_days(label)?;
    Some(Period {
        label: label.trim().to_string(),
        calendar_date,
        reported_days,
    })
}

/// Parses every label, keeping its column position. Returns the usable
/// periods and the labels that were excluded.
pub fn parse_periods<'a, I>(labels: I) -> (Vec<(usize, Period)>, Vec<String>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut periods = Vec::new();
    let mut excluded = Vec::new();

    for (index, label) in labels.into_iter().enumerate() {
        match parse_period(label) {
            Some(period) => periods.push((index, period)),
            None => excluded.push(label.to_string()),
        }
    }

    (periods, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_month_year_label() {
        let period = parse_period("24.11.2025").expect("label should parse");
        assert_eq!(
            period.calendar_date,
            NaiveDate::from_ymd_opt(2025, 11, 24).unwrap()
        );
        assert_eq!(period.reported_days, 24);
        assert_eq!(period.label, "24.11.2025");
    }

    #[test]
    fn day_first_is_not_confused_with_month_first() {
        let period = parse_period("05.11.2025").expect("label should parse");
        assert_eq!(period.calendar_date.format("%m").to_string(), "11");
        assert_eq!(period.reported_days, 5);
    }

    #[test]
    fn accepts_trailing_time_and_whitespace() {
        let period = parse_period(" 30.09.2024 00:00:00 ").expect("label should parse");
        assert_eq!(
            period.calendar_date,
            NaiveDate::from_ymd_opt(2024, 9, 30).unwrap()
        );
        assert_eq!(period.reported_days, 30);
    }

    #[test]
    fn zero_days_excludes_period() {
        assert_eq!(parse_reported_days("0.11.2025"), None);
        assert!(parse_period("0.11.2025").is_none());
    }

    #[test]
    fn invalid_dates_are_excluded() {
        assert!(parse_period("31.02.2025").is_none());
        assert!(parse_period("Notes").is_none());
        assert!(parse_period("2025-11-24").is_none());
        assert!(parse_period("").is_none());
    }

    #[test]
    fn parse_periods_keeps_positions_and_reports_exclusions() {
        let (periods, excluded) =
            parse_periods(["30.09.2025", "bad", "31.10.2025", "0.11.2025"]);

        let positions: Vec<usize> = periods.iter().map(|(i, _)| *i).collect();
        assert_eq!(positions, vec![0, 2]);
        assert_eq!(excluded, vec!["bad".to_string(), "0.11.2025".to_string()]);
    }
}
