use std::sync::OnceLock;

use chrono::{Datelike, Timelike};
use regex::Regex;

use crate::models::{PresentedSlot, TimePreferences};

fn refinement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(more|other|different|another)\s+(time|option|day)s?\b|\b(later|earlier)\b|\banything else\b")
            .unwrap()
    })
}

fn explicit_index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:option|choice|number|#)\s*(\d{1,2})\b").unwrap())
}

const ORDINALS: &[(&str, u32)] = &[
    ("first", 1),
    ("1st", 1),
    ("second", 2),
    ("2nd", 2),
    ("third", 3),
    ("3rd", 3),
    ("fourth", 4),
    ("4th", 4),
    ("fifth", 5),
    ("5th", 5),
    ("sixth", 6),
    ("6th", 6),
];

fn month_day_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2}\b|\b\d{1,2}/\d{1,2}\b")
            .unwrap()
    })
}

fn ordinal_one_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\s+one\b").unwrap())
}

fn meridiem_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap])\.?m?\.?\b").unwrap())
}

fn bare_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\D*(\d{1,2})\D*$").unwrap())
}

fn weekday_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(mon(?:day)?|tue(?:s(?:day)?)?|wed(?:nesday)?|thu(?:rs(?:day)?)?|fri(?:day)?|sat(?:urday)?|sun(?:day)?)\b")
            .unwrap()
    })
}

fn the_nth_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bthe\s+(\d{1,2})(?:st|nd|rd|th)\b").unwrap())
}

fn month_number(abbr: &str) -> Option<u32> {
    match &abbr.to_lowercase()[..3.min(abbr.len())] {
        "jan" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" => Some(12),
        _ => None,
    }
}

fn weekday_number(name: &str) -> Option<u32> {
    match &name.to_lowercase()[..3.min(name.len())] {
        "mon" => Some(1),
        "tue" => Some(2),
        "wed" => Some(3),
        "thu" => Some(4),
        "fri" => Some(5),
        "sat" => Some(6),
        "sun" => Some(7),
        _ => None,
    }
}

fn meridiem_hour(hour: u32, meridiem: char) -> u32 {
    if meridiem == 'p' {
        if hour == 12 { 12 } else { hour + 12 }
    } else if hour == 12 {
        0
    } else {
        hour
    }
}

fn disambiguate_by_prefs(candidates: Vec<&PresentedSlot>, prefs: &TimePreferences) -> Option<PresentedSlot> {
    if candidates.len() == 1 {
        return candidates.first().map(|s| (*s).clone());
    }

    let filtered: Vec<&PresentedSlot> = candidates
        .iter()
        .filter(|slot| {
            let minutes = slot.datetime.time().hour() as i32 * 60 + slot.datetime.time().minute() as i32;
            let after_ok = prefs
                .after_time
                .as_ref()
                .map(|t| minutes > hhmm_to_minutes(t))
                .unwrap_or(true);
            let before_ok = prefs
                .before_time
                .as_ref()
                .map(|t| minutes < hhmm_to_minutes(t))
                .unwrap_or(true);
            after_ok && before_ok
        })
        .copied()
        .collect();

    if filtered.len() == 1 {
        return filtered.first().map(|s| (*s).clone());
    }

    None
}

fn hhmm_to_minutes(hhmm: &str) -> i32 {
    let mut parts = hhmm.splitn(2, ':');
    let h: i32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let m: i32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    h * 60 + m
}

/// Maps the patient's free-text reply onto a presented slot. Checked in
/// priority order; the first rule that produces a verdict (including
/// "this is a refinement, not a selection" -> `None`) wins.
pub fn detect_time_selection(reply: &str, slots: &[PresentedSlot], prefs: &TimePreferences) -> Option<PresentedSlot> {
    if slots.is_empty() {
        return None;
    }

    let lower = reply.trim().to_lowercase();

    if refinement_re().is_match(&lower) {
        return None;
    }

    if let Some(caps) = explicit_index_re().captures(&lower) {
        let n: usize = caps[1].parse().ok()?;
        return slots.iter().find(|s| s.index as usize == n).cloned();
    }

    let has_month_day = month_day_re().is_match(&lower);

    if !has_month_day {
        if let Some(caps) = ordinal_one_re().captures(&lower) {
            let n: usize = caps[1].parse().ok()?;
            if let Some(slot) = slots.iter().find(|s| s.index as usize == n) {
                return Some(slot.clone());
            }
        }
        for (word, n) in ORDINALS {
            if lower.contains(word) {
                if let Some(slot) = slots.iter().find(|s| s.index as usize == *n as usize) {
                    return Some(slot.clone());
                }
            }
        }
    }

    if let Some(caps) = meridiem_time_re().captures(&lower) {
        let hour: u32 = caps[1].parse().ok()?;
        let meridiem = caps[3].chars().next().unwrap_or('a');
        let target_hour = meridiem_hour(hour, meridiem);
        let explicit_minute: Option<u32> = caps.get(2).and_then(|m| m.as_str().parse().ok());

        let matches: Vec<&PresentedSlot> = slots
            .iter()
            .filter(|s| {
                let t = s.datetime.time();
                t.hour() == target_hour && explicit_minute.map(|m| t.minute() == m).unwrap_or(true)
            })
            .collect();
        if let Some(slot) = disambiguate_by_prefs(matches, prefs) {
            return Some(slot);
        }
    }

    let date_matches: Vec<&PresentedSlot> = if let Some(caps) = month_day_re().captures(&lower) {
        let month_day_numeric = Regex::new(r"(?i)\b(\d{1,2})/(\d{1,2})\b").unwrap();
        if let Some(nc) = month_day_numeric.captures(&lower) {
            let month: u32 = nc[1].parse().unwrap_or(0);
            let day: u32 = nc[2].parse().unwrap_or(0);
            slots.iter().filter(|s| s.datetime.month() == month && s.datetime.day() == day).collect()
        } else {
            let full = caps.get(0).map(|m| m.as_str()).unwrap_or("");
            let parts: Vec<&str> = full.split_whitespace().collect();
            let month = parts.first().and_then(|m| month_number(m));
            let day: Option<u32> = parts.get(1).and_then(|d| d.trim_matches(|c: char| !c.is_ascii_digit()).parse().ok());
            match (month, day) {
                (Some(month), Some(day)) => slots.iter().filter(|s| s.datetime.month() == month && s.datetime.day() == day).collect(),
                _ => Vec::new(),
            }
        }
    } else if let Some(caps) = the_nth_re().captures(&lower) {
        let day: u32 = caps[1].parse().unwrap_or(0);
        slots.iter().filter(|s| s.datetime.day() == day).collect()
    } else if let Some(caps) = weekday_name_re().captures(&lower) {
        if let Some(wd) = weekday_number(&caps[1]) {
            slots.iter().filter(|s| s.datetime.weekday().number_from_monday() == wd).collect()
        } else {
            Vec::new()
        }
    } else {
        Vec::new()
    };

    if !date_matches.is_empty() {
        if date_matches.len() == 1 {
            return date_matches.first().map(|s| (*s).clone());
        }
        if let Some(slot) = disambiguate_by_prefs(date_matches.clone(), prefs) {
            return Some(slot);
        }
        return date_matches.first().map(|s| (*s).clone());
    }

    if let Some(caps) = bare_number_re().captures(&lower) {
        let n: usize = caps[1].parse().ok()?;
        if n >= 1 && n <= slots.len() {
            return slots.iter().find(|s| s.index as usize == n).cloned();
        }

        let target = (n % 12) as u32;
        let matches: Vec<&PresentedSlot> = slots.iter().filter(|s| s.datetime.time().hour() % 12 == target).collect();
        return disambiguate_by_prefs(matches, prefs);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn slot(index: u32, hour: u32, minute: u32) -> PresentedSlot {
        PresentedSlot {
            index,
            datetime: Utc.with_ymd_and_hms(2025, 2, 3, hour, minute, 0).unwrap(),
            display_string: format!("Mon 2/3 {hour}:{minute:02}"),
            service: "botox".to_string(),
            available: true,
        }
    }

    #[test]
    fn refinement_request_returns_none() {
        let slots = vec![slot(1, 10, 0), slot(2, 14, 0)];
        let prefs = TimePreferences::default();
        assert!(detect_time_selection("any other times?", &slots, &prefs).is_none());
    }

    #[test]
    fn explicit_option_keyword_selects_by_index() {
        let slots = vec![slot(1, 10, 0), slot(2, 14, 0)];
        let prefs = TimePreferences::default();
        assert_eq!(detect_time_selection("option 2", &slots, &prefs).unwrap().index, 2);
    }

    #[test]
    fn ordinal_word_selects_by_position() {
        let slots = vec![slot(1, 10, 0), slot(2, 14, 0)];
        let prefs = TimePreferences::default();
        assert_eq!(detect_time_selection("the second one works", &slots, &prefs).unwrap().index, 2);
    }

    #[test]
    fn ordinal_suppressed_when_month_day_present() {
        let slots = vec![slot(1, 10, 0), slot(2, 14, 0)];
        let prefs = TimePreferences::default();
        // "first" would normally mean index 1, but the explicit date wins.
        assert!(detect_time_selection("the first week of Feb 3", &slots, &prefs).is_some());
    }

    #[test]
    fn meridiem_time_matches_hour_and_minute() {
        let slots = vec![slot(1, 10, 0), slot(2, 14, 0)];
        let prefs = TimePreferences::default();
        assert_eq!(detect_time_selection("2pm works great", &slots, &prefs).unwrap().index, 2);
    }

    #[test]
    fn bare_number_in_range_is_index() {
        let slots = vec![slot(1, 10, 0), slot(2, 14, 0)];
        let prefs = TimePreferences::default();
        assert_eq!(detect_time_selection("1", &slots, &prefs).unwrap().index, 1);
    }

    #[test]
    fn bare_number_out_of_range_disambiguates_by_hour_with_prefs() {
        let slots = vec![slot(1, 6, 0), slot(2, 18, 0)];
        let mut prefs = TimePreferences::default();
        prefs.after_time = Some("15:00".to_string());
        assert_eq!(detect_time_selection("6", &slots, &prefs).unwrap().index, 2);
    }

    #[test]
    fn bare_number_ambiguous_without_prefs_returns_none() {
        let slots = vec![slot(1, 6, 0), slot(2, 18, 0)];
        let prefs = TimePreferences::default();
        assert!(detect_time_selection("6", &slots, &prefs).is_none());
    }

    #[test]
    fn bare_number_with_no_matching_hour_returns_none() {
        let slots = vec![slot(1, 10, 0), slot(2, 14, 0), slot(3, 18, 0)];
        let prefs = TimePreferences::default();
        assert!(detect_time_selection("5", &slots, &prefs).is_none());
    }
}
