use regex::Regex;
use std::sync::OnceLock;

use crate::models::TimePreferences;

/// Monday = 1 .. Sunday = 7, matching `chrono::Weekday::number_from_monday`.
fn day_number(name: &str) -> Option<u8> {
    match name {
        "monday" | "mon" => Some(1),
        "tuesday" | "tue" | "tues" => Some(2),
        "wednesday" | "wed" => Some(3),
        "thursday" | "thu" | "thurs" => Some(4),
        "friday" | "fri" => Some(5),
        "saturday" | "sat" => Some(6),
        "sunday" | "sun" => Some(7),
        _ => None,
    }
}

const DAY_WORD: &str = r"(mon(?:day)?|tue(?:s(?:day)?)?|wed(?:nesday)?|thu(?:rs(?:day)?)?|fri(?:day)?|sat(?:urday)?|sun(?:day)?)";

fn day_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(&format!(r"{DAY_WORD}\s*(?:-|through|to)\s*{DAY_WORD}")).unwrap())
}

fn day_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DAY_WORD).unwrap())
}

/// Expands a day name, an inclusive range ("tue-thu"), `weekdays`,
/// `weekends`, or `any day` into the set of Monday=1..Sunday=7 numbers
/// the patient is willing to be seen on. An empty result means "no day
/// constraint", not "no days accepted".
fn extract_days(lower: &str) -> Vec<u8> {
    if lower.contains("any day") || lower.contains("anyday") || lower.contains("whenever") {
        return Vec::new();
    }
    if lower.contains("weekday") {
        return vec![1, 2, 3, 4, 5];
    }
    if lower.contains("weekend") {
        return vec![6, 7];
    }

    if let Some(caps) = day_range_re().captures(lower) {
        let start = day_number(&caps[1]).unwrap_or(1);
        let end = day_number(&caps[2]).unwrap_or(start);
        if end >= start {
            return (start..=end).collect();
        }
        return vec![start, end];
    }

    let mut days: Vec<u8> = day_word_re()
        .find_iter(lower)
        .filter_map(|m| day_number(m.as_str()))
        .collect();
    days.sort_unstable();
    days.dedup();
    days
}

fn meridiem_hour(hour: u32, meridiem: Option<&str>) -> u32 {
    match meridiem {
        Some(m) if m.starts_with('p') => {
            if hour == 12 {
                12
            } else {
                hour + 12
            }
        }
        Some(m) if m.starts_with('a') => {
            if hour == 12 {
                0
            } else {
                hour
            }
        }
        _ => hour,
    }
}

fn hhmm(hour: u32, minute: u32) -> String {
    format!("{hour:02}:{minute:02}")
}

fn time_keyword_re(keyword: &str) -> Regex {
    Regex::new(&format!(r"{keyword}\s+(\d{{1,2}})(?::(\d{{2}}))?\s*([ap])\.?m?\.?")).unwrap()
}

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:between\s+)?(\d{1,2})(?::(\d{2}))?\s*([ap])?\.?m?\.?\s*(?:-|and|to)\s*(\d{1,2})(?::(\d{2}))?\s*([ap])?\.?m?\.?")
            .unwrap()
    })
}

fn bare_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})(?::(\d{2}))?\s*([ap])\.?m?\.?\b").unwrap())
}

/// Extracts `after`/`before` "HH:MM" thresholds from free text. Priority:
/// explicit `after`/`before` keywords, then an explicit range
/// ("5-6pm", "between 3 and 5pm"), then a bare time-of-day phrase
/// (morning/afternoon/evening), then a single bare time (treated as
/// "after").
fn extract_time_thresholds(lower: &str) -> (Option<String>, Option<String>) {
    let mut after = None;
    let mut before = None;

    if let Some(caps) = time_keyword_re("after").captures(lower) {
        let hour: u32 = caps[1].parse().unwrap_or(0);
        let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        after = Some(hhmm(meridiem_hour(hour, Some(&caps[3])), minute));
    }
    if let Some(caps) = time_keyword_re("before").captures(lower) {
        let hour: u32 = caps[1].parse().unwrap_or(0);
        let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        before = Some(hhmm(meridiem_hour(hour, Some(&caps[3])), minute));
    }

    if after.is_some() || before.is_some() {
        return (after, before);
    }

    if let Some(caps) = range_re().captures(lower) {
        let start_hour: u32 = caps[1].parse().unwrap_or(0);
        let start_min: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        let end_hour: u32 = caps[4].parse().unwrap_or(0);
        let end_min: u32 = caps.get(5).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);

        let end_meridiem = caps.get(6).map(|m| m.as_str());
        // A bare start number ("between 3 and 5pm") inherits the end's
        // meridiem when the start hour is smaller and has none of its own.
        let start_meridiem = caps.get(3).map(|m| m.as_str()).or(end_meridiem);

        let start = meridiem_hour(start_hour, start_meridiem);
        let end = meridiem_hour(end_hour, end_meridiem);
        return (Some(hhmm(start, start_min)), Some(hhmm(end, end_min)));
    }

    if lower.contains("morning") {
        before = Some("12:00".to_string());
    } else if lower.contains("evening") {
        after = Some("17:00".to_string());
    } else if lower.contains("afternoon") {
        after = Some("12:00".to_string());
    } else if let Some(caps) = bare_time_re().captures(lower) {
        let hour: u32 = caps[1].parse().unwrap_or(0);
        let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
        after = Some(hhmm(meridiem_hour(hour, Some(&caps[3])), minute));
    }

    (after, before)
}

pub fn extract_time_preferences(text: &str) -> TimePreferences {
    let lower = text.to_lowercase();
    let days_of_week = extract_days(&lower);
    let (after_time, before_time) = extract_time_thresholds(&lower);

    TimePreferences {
        days_of_week,
        after_time,
        before_time,
        raw_text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_range_and_after_time() {
        let prefs = extract_time_preferences("tuesday-thursday after 3pm");
        assert_eq!(prefs.days_of_week, vec![2, 3, 4]);
        assert_eq!(prefs.after_time.as_deref(), Some("15:00"));
        assert_eq!(prefs.before_time, None);
    }

    #[test]
    fn parses_mon_through_fri_as_weekdays() {
        let prefs = extract_time_preferences("mon through fri");
        assert_eq!(prefs.days_of_week, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn recognizes_weekdays_keyword() {
        let prefs = extract_time_preferences("any time on weekdays");
        assert_eq!(prefs.days_of_week, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn recognizes_weekends_keyword() {
        let prefs = extract_time_preferences("weekends work best");
        assert_eq!(prefs.days_of_week, vec![6, 7]);
    }

    #[test]
    fn any_day_clears_day_constraint() {
        let prefs = extract_time_preferences("any day is fine");
        assert!(prefs.days_of_week.is_empty());
    }

    #[test]
    fn parses_explicit_time_range() {
        let prefs = extract_time_preferences("does 5-6pm work?");
        assert_eq!(prefs.after_time.as_deref(), Some("17:00"));
        assert_eq!(prefs.before_time.as_deref(), Some("18:00"));
    }

    #[test]
    fn parses_between_phrasing_range() {
        let prefs = extract_time_preferences("between 3 and 5pm");
        assert_eq!(prefs.after_time.as_deref(), Some("15:00"));
        assert_eq!(prefs.before_time.as_deref(), Some("17:00"));
    }

    #[test]
    fn morning_means_before_noon() {
        let prefs = extract_time_preferences("mornings are best for me");
        assert_eq!(prefs.before_time.as_deref(), Some("12:00"));
        assert_eq!(prefs.after_time, None);
    }

    #[test]
    fn afternoon_means_after_noon() {
        let prefs = extract_time_preferences("afternoon works");
        assert_eq!(prefs.after_time.as_deref(), Some("12:00"));
    }

    #[test]
    fn evening_means_after_five_pm() {
        let prefs = extract_time_preferences("evening only please");
        assert_eq!(prefs.after_time.as_deref(), Some("17:00"));
    }

    #[test]
    fn bare_time_is_treated_as_after() {
        let prefs = extract_time_preferences("2pm would work");
        assert_eq!(prefs.after_time.as_deref(), Some("14:00"));
        assert_eq!(prefs.before_time, None);
    }
}
