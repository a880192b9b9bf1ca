use chrono::{DateTime, Utc};

/// Renders a UTC instant in a clinic's local time as
/// `"Monday, January 2 at 3:04 PM EST"`, the format used by the payment
/// confirmation and deposit-link SMS bodies. The clinic's UTC offset and
/// timezone abbreviation are supplied by the caller (via the clinic
/// configuration collaborator) rather than resolved from a tz database,
/// since this repo carries no IANA timezone table.
pub fn format_friendly_datetime(at: DateTime<Utc>, utc_offset_hours: i64, tz_abbr: &str) -> String {
    let local = at + chrono::Duration::hours(utc_offset_hours);
    format!("{} at {} {}", local.format("%A, %B %-d"), local.format("%-I:%M %p"), tz_abbr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_in_clinic_local_time() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 20, 4, 0).unwrap();
        let rendered = format_friendly_datetime(at, -5, "EST");
        assert_eq!(rendered, "Thursday, January 2 at 3:04 PM EST");
    }
}
