use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parses an ISO 8601 timestamp into UTC. Inputs without an offset are taken to be UTC.
///
/// Only four-digit years are accepted, which keeps period arithmetic well inside
/// chrono's range.
pub fn parse_time_string(value: &str) -> Option<DateTime<Utc>> {
    parse_any_year(value).filter(|parsed| (1..=9999).contains(&parsed.year()))
}

fn parse_any_year(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&parsed));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Monday 00:00 UTC of the week containing `timestamp`.
pub fn week_start(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let date = timestamp.date_naive();
    let offset = i64::from(date.weekday().num_days_from_monday());
    midnight(date - Duration::days(offset))
}

/// First day of the month containing `timestamp`, at 00:00 UTC.
pub fn month_start(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let date = timestamp.date_naive();
    midnight(date.with_day(1).unwrap_or(date))
}

pub fn next_week(start: DateTime<Utc>) -> DateTime<Utc> {
    start + Duration::days(7)
}

pub fn next_month(start: DateTime<Utc>) -> DateTime<Utc> {
    start.checked_add_months(Months::new(1)).unwrap_or(start)
}

pub fn is_midnight(timestamp: DateTime<Utc>) -> bool {
    timestamp.time() == chrono::NaiveTime::MIN
}

pub fn is_monday(timestamp: DateTime<Utc>) -> bool {
    timestamp.weekday() == chrono::Weekday::Mon
}

pub fn is_first_of_month(timestamp: DateTime<Utc>) -> bool {
    timestamp.day() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(value: &str) -> DateTime<Utc> {
        parse_time_string(value).expect("valid timestamp")
    }

    #[test]
    fn parses_zulu_and_offsets_to_utc() {
        assert_eq!(
            utc("2013-04-01T00:00:00Z"),
            Utc.with_ymd_and_hms(2013, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            utc("2013-04-01T02:00:00+02:00"),
            Utc.with_ymd_and_hms(2013, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            utc("2013-04-01T02:00:00+0200"),
            Utc.with_ymd_and_hms(2013, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            utc("2013-04-01T12:30:00"),
            Utc.with_ymd_and_hms(2013, 4, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn rejects_garbage_and_impossible_dates() {
        assert!(parse_time_string("not a date").is_none());
        assert!(parse_time_string("2013-02-30T00:00:00Z").is_none());
    }

    #[test]
    fn rejects_expanded_years() {
        assert!(parse_time_string("-262143-01-01T00:00:00+00:00").is_none());
        assert!(parse_time_string("+262142-12-31T00:00:00+00:00").is_none());
        assert!(parse_time_string("10000-01-01T00:00:00Z").is_none());

        let last = utc("9999-12-31T00:00:00Z");
        assert_eq!(
            next_week(week_start(last)),
            Utc.with_ymd_and_hms(10000, 1, 3, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn week_start_is_previous_monday_midnight() {
        // 2013-04-03 is a Wednesday.
        let start = week_start(utc("2013-04-03T15:20:00Z"));
        assert_eq!(start, utc("2013-04-01T00:00:00Z"));
        assert!(is_monday(start));
        assert!(is_midnight(start));

        let monday = utc("2013-04-01T00:00:00Z");
        assert_eq!(week_start(monday), monday);
    }

    #[test]
    fn month_start_is_first_day_midnight() {
        assert_eq!(
            month_start(utc("2013-04-30T23:59:59Z")),
            utc("2013-04-01T00:00:00Z")
        );
        assert!(is_first_of_month(month_start(utc("2012-02-29T10:00:00Z"))));
    }

    #[test]
    fn period_ends_follow_calendar() {
        assert_eq!(
            next_month(utc("2013-01-01T00:00:00Z")),
            utc("2013-02-01T00:00:00Z")
        );
        assert_eq!(
            next_week(utc("2013-04-01T00:00:00Z")),
            utc("2013-04-08T00:00:00Z")
        );
    }
}
