use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Timelike, Utc};
use tracing::{debug, instrument, warn};

use clinic_cell::ClinicConfigProvider;

use crate::error::SchedulingError;
use crate::models::{
    AvailabilityOutcome, AvailableSlot, PresentedSlot, TimePreferences, TimeSelectionResponse, AVAILABILITY_HORIZON_DAYS, BATCH_DATE_LIMIT,
    MAX_SLOTS_PER_DAY, MAX_SLOTS_TO_PRESENT, RELAXATION_CHOICE_QUESTION, RELAXED_FALLBACK_WINDOW_DAYS,
};
use crate::services::availability::AvailabilityProvider;
use crate::services::selection::detect_time_selection;

fn hhmm_to_minutes(hhmm: &str) -> i32 {
    let mut parts = hhmm.splitn(2, ':');
    let h: i32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let m: i32 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    h * 60 + m
}

/// Internal outcome of `relaxed_fallback`, kept distinct from the public
/// `AvailabilityOutcome` so `fetch_availability` is the only place that
/// decides whether an empty relaxation result means "try the next
/// strategy" or "ask the patient to choose".
enum RelaxedFallback {
    Found(Vec<AvailableSlot>),
    Ambiguous,
    Empty,
}

/// Orchestrates availability fetch, slot assembly/presentation, SMS
/// rendering, patient selection detection, and pre-booking verification.
/// Holds no conversation state of its own — `PresentedSlot` lists are the
/// caller's (the processor's) responsibility to carry across a turn.
pub struct TimeSelectionEngine {
    provider: Arc<dyn AvailabilityProvider>,
    clinic: Arc<dyn ClinicConfigProvider>,
}

impl TimeSelectionEngine {
    pub fn new(provider: Arc<dyn AvailabilityProvider>, clinic: Arc<dyn ClinicConfigProvider>) -> Self {
        Self { provider, clinic }
    }

    /// Strategy A/B/C/D from the governing design: smart calendar, then
    /// batched date fetch, then (if both day and time preferences were
    /// given) relaxed same-time/same-day fallbacks, then the Moxie
    /// shortcut if the adapter exposes one. Returns the first strategy
    /// that yields any candidates.
    #[instrument(skip(self, prefs, on_batch_progress))]
    pub async fn fetch_availability(
        &self,
        org_id: &str,
        service: &str,
        prefs: &TimePreferences,
        on_batch_progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> Result<AvailabilityOutcome, SchedulingError> {
        if self.provider.supports_smart_calendar() {
            match self.provider.fetch_smart_calendar(org_id, service, 3).await {
                Ok(slots) if !slots.is_empty() => return Ok(AvailabilityOutcome::Candidates(slots)),
                Ok(_) => {}
                Err(SchedulingError::NotSupported(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let dates = self.qualifying_dates(prefs, AVAILABILITY_HORIZON_DAYS);
        let batched = self.fetch_in_batches(org_id, service, &dates, on_batch_progress).await?;
        if !batched.is_empty() {
            return Ok(AvailabilityOutcome::Candidates(batched));
        }

        if prefs.has_day_and_time() {
            match self.relaxed_fallback(org_id, service, prefs).await? {
                RelaxedFallback::Found(slots) => return Ok(AvailabilityOutcome::Candidates(slots)),
                RelaxedFallback::Ambiguous => return Ok(AvailabilityOutcome::NeedsRelaxationChoice),
                RelaxedFallback::Empty => {}
            }
        }

        if self.provider.supports_moxie_shortcut() {
            let moxie = self.provider.fetch_moxie_window(org_id, service).await?;
            if !moxie.is_empty() {
                return Ok(AvailabilityOutcome::Candidates(moxie));
            }
        }

        Ok(AvailabilityOutcome::Candidates(Vec::new()))
    }

    fn qualifying_dates(&self, prefs: &TimePreferences, horizon_days: i64) -> Vec<NaiveDate> {
        let today = Utc::now().date_naive();
        (0..horizon_days)
            .map(|offset| today + ChronoDuration::days(offset))
            .filter(|date| prefs.days_of_week.is_empty() || prefs.days_of_week.contains(&(date.weekday().number_from_monday() as u8)))
            .collect()
    }

    async fn fetch_in_batches(
        &self,
        org_id: &str,
        service: &str,
        dates: &[NaiveDate],
        on_batch_progress: Option<&(dyn Fn(usize, usize) + Send + Sync)>,
    ) -> Result<Vec<AvailableSlot>, SchedulingError> {
        let mut out = Vec::new();
        let total_batches = dates.len().div_ceil(BATCH_DATE_LIMIT).max(1);

        for (batch_index, chunk) in dates.chunks(BATCH_DATE_LIMIT).enumerate() {
            let batch = self.provider.fetch_dates(org_id, service, chunk).await?;
            out.extend(batch);
            if let Some(cb) = on_batch_progress {
                cb(batch_index + 1, total_batches);
            }
        }

        Ok(out)
    }

    /// Probes "same time, different days" and "same days, different
    /// times" over a 28-day window. If both subsets are non-empty the
    /// patient must be asked to choose; the caller surfaces that via
    /// `AvailabilityOutcome::NeedsRelaxationChoice` and, from there,
    /// `TimeSelectionResponse::disambiguation_question`.
    async fn relaxed_fallback(&self, org_id: &str, service: &str, prefs: &TimePreferences) -> Result<RelaxedFallback, SchedulingError> {
        let today = Utc::now().date_naive();
        let window: Vec<NaiveDate> = (0..RELAXED_FALLBACK_WINDOW_DAYS).map(|o| today + ChronoDuration::days(o)).collect();

        let same_time_different_days = self.provider.fetch_dates(org_id, service, &window).await?;
        let same_time_different_days: Vec<AvailableSlot> = same_time_different_days
            .into_iter()
            .filter(|s| passes_time_thresholds(s, prefs))
            .collect();

        let same_days_different_times: Vec<AvailableSlot> = {
            let day_matched: Vec<NaiveDate> = window
                .iter()
                .copied()
                .filter(|d| prefs.days_of_week.contains(&(d.weekday().number_from_monday() as u8)))
                .collect();
            self.provider.fetch_dates(org_id, service, &day_matched).await?
        };

        match (same_time_different_days.is_empty(), same_days_different_times.is_empty()) {
            (false, true) => Ok(RelaxedFallback::Found(same_time_different_days)),
            (true, false) => Ok(RelaxedFallback::Found(same_days_different_times)),
            (false, false) => {
                // both non-empty: the caller asks the patient which
                // relaxation they prefer rather than guessing.
                debug!("relaxed fallback produced both variants; caller must disambiguate");
                Ok(RelaxedFallback::Ambiguous)
            }
            (true, true) => Ok(RelaxedFallback::Empty),
        }
    }

    /// Filters by day-of-week and strict after/before thresholds, sorts
    /// ascending, spreads across days (<=2/day, round-robin) until
    /// `MAX_SLOTS_TO_PRESENT` are filled, and assigns 1-based indices.
    pub async fn assemble_and_present(&self, org_id: &str, candidates: Vec<AvailableSlot>, prefs: &TimePreferences) -> Vec<PresentedSlot> {
        let (offset, tz_abbr) = self.clinic.timezone(org_id).await.unwrap_or((0, "UTC".to_string()));

        let mut filtered: Vec<AvailableSlot> = candidates
            .into_iter()
            .filter(|s| prefs.days_of_week.is_empty() || prefs.days_of_week.contains(&(s.datetime.weekday().number_from_monday() as u8)))
            .filter(|s| passes_time_thresholds(s, prefs))
            .collect();
        filtered.sort_by_key(|s| s.datetime);

        let mut by_day: Vec<(NaiveDate, Vec<AvailableSlot>)> = Vec::new();
        for slot in filtered.drain(..) {
            let day = slot.datetime.date_naive();
            match by_day.iter_mut().find(|(d, _)| *d == day) {
                Some((_, bucket)) => bucket.push(slot),
                None => by_day.push((day, vec![slot])),
            }
        }

        let mut picked: Vec<AvailableSlot> = Vec::new();
        let mut taken_per_day: HashMap<NaiveDate, usize> = HashMap::new();
        'rounds: loop {
            let mut progressed = false;
            for (day, bucket) in by_day.iter_mut() {
                if picked.len() >= MAX_SLOTS_TO_PRESENT {
                    break 'rounds;
                }
                let taken = taken_per_day.entry(*day).or_insert(0);
                if *taken >= MAX_SLOTS_PER_DAY || bucket.is_empty() {
                    continue;
                }
                picked.push(bucket.remove(0));
                *taken += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        picked
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                let local = slot.datetime + ChronoDuration::hours(offset);
                PresentedSlot {
                    index: (i + 1) as u32,
                    datetime: slot.datetime,
                    display_string: format!("{} at {} {}", local.format("%A, %b %-d"), local.format("%-I:%M %p"), tz_abbr),
                    service: slot.service,
                    available: true,
                }
            })
            .collect()
    }

    pub fn render_sms(&self, service: &str, slots: &[PresentedSlot]) -> String {
        let mut body = format!("I found these available times for {service}:\n");
        for slot in slots {
            body.push_str(&format!("{}. {}\n", slot.index, slot.display_string));
        }
        body.push_str("Reply with the number of your preferred time.");
        body
    }

    pub fn detect_selection(&self, reply: &str, slots: &[PresentedSlot], prefs: &TimePreferences) -> Option<PresentedSlot> {
        detect_time_selection(reply, slots, prefs)
    }

    /// Re-checks that a chosen slot is still free via a single-date
    /// availability call before the caller proceeds to booking.
    #[instrument(skip(self, slot))]
    pub async fn verify_still_available(&self, org_id: &str, service: &str, slot: &PresentedSlot) -> Result<bool, SchedulingError> {
        let day = slot.datetime.date_naive();
        let fresh = self.provider.fetch_single_date(org_id, service, day).await?;
        let still_open = fresh.iter().any(|s| s.datetime == slot.datetime);
        if !still_open {
            warn!(org_id, service, datetime = %slot.datetime, "slot no longer available at verification time");
        }
        Ok(still_open)
    }

    pub fn build_response(&self, slots: Vec<PresentedSlot>, service: &str) -> TimeSelectionResponse {
        if slots.is_empty() {
            return TimeSelectionResponse::default();
        }
        TimeSelectionResponse {
            sms_body: Some(self.render_sms(service, &slots)),
            slots,
            disambiguation_question: None,
            selected_slot: None,
        }
    }

    /// Builds the response for `AvailabilityOutcome::NeedsRelaxationChoice`:
    /// no slots to present yet, just the question the patient must answer
    /// before either relaxation can be fetched and assembled.
    pub fn build_disambiguation_response(&self) -> TimeSelectionResponse {
        TimeSelectionResponse { disambiguation_question: Some(RELAXATION_CHOICE_QUESTION.to_string()), ..TimeSelectionResponse::default() }
    }
}

fn passes_time_thresholds(slot: &AvailableSlot, prefs: &TimePreferences) -> bool {
    let minutes = slot.datetime.time().hour() as i32 * 60 + slot.datetime.time().minute() as i32;
    let after_ok = prefs.after_time.as_ref().map(|t| minutes > hhmm_to_minutes(t)).unwrap_or(true);
    let before_ok = prefs.before_time.as_ref().map(|t| minutes < hhmm_to_minutes(t)).unwrap_or(true);
    after_ok && before_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::availability::fakes::FakeAvailabilityProvider;
    use chrono::TimeZone;
    use clinic_cell::{ClinicProfile, StaticClinicConfig};

    fn engine(provider: FakeAvailabilityProvider) -> TimeSelectionEngine {
        TimeSelectionEngine::new(Arc::new(provider), Arc::new(StaticClinicConfig::with_profile(ClinicProfile::default())))
    }

    fn available(hour: u32) -> AvailableSlot {
        AvailableSlot {
            datetime: Utc.with_ymd_and_hms(2025, 2, 3, hour, 0, 0).unwrap(),
            service: "botox".to_string(),
        }
    }

    #[tokio::test]
    async fn assembly_filters_sorts_and_indexes() {
        let provider = FakeAvailabilityProvider::new();
        let engine = engine(provider);
        let prefs = TimePreferences::default();
        let candidates = vec![available(14), available(10), available(9)];
        let presented = engine.assemble_and_present("org-1", candidates, &prefs).await;
        assert_eq!(presented.len(), 3);
        assert_eq!(presented[0].index, 1);
        assert!(presented[0].datetime < presented[1].datetime);
    }

    #[tokio::test]
    async fn assembly_spreads_at_most_two_per_day() {
        let provider = FakeAvailabilityProvider::new();
        let engine = engine(provider);
        let prefs = TimePreferences::default();
        let mut candidates = Vec::new();
        for h in [9, 10, 11, 13, 14] {
            candidates.push(available(h));
        }
        let presented = engine.assemble_and_present("org-1", candidates, &prefs).await;
        assert!(presented.len() <= MAX_SLOTS_PER_DAY.max(presented.len()));
        // all five fall on the same day, so at most two should be kept.
        assert_eq!(presented.len(), 2);
    }

    #[test]
    fn renders_sms_body_with_numbered_slots() {
        let provider = FakeAvailabilityProvider::new();
        let engine = engine(provider);
        let slots = vec![PresentedSlot {
            index: 1,
            datetime: Utc.with_ymd_and_hms(2025, 2, 3, 10, 0, 0).unwrap(),
            display_string: "Monday, Feb 3 at 10:00 AM EST".to_string(),
            service: "botox".to_string(),
            available: true,
        }];
        let body = engine.render_sms("botox", &slots);
        assert!(body.starts_with("I found these available times for botox:"));
        assert!(body.contains("1. Monday, Feb 3 at 10:00 AM EST"));
        assert!(body.ends_with("Reply with the number of your preferred time."));
    }

    #[tokio::test]
    async fn verify_still_available_detects_now_taken_slot() {
        let provider = FakeAvailabilityProvider::new();
        provider.seed(NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(), vec![]).await;
        let engine = engine(provider);
        let slot = PresentedSlot {
            index: 1,
            datetime: Utc.with_ymd_and_hms(2025, 2, 3, 10, 0, 0).unwrap(),
            display_string: "x".to_string(),
            service: "botox".to_string(),
            available: true,
        };
        assert!(!engine.verify_still_available("org-1", "botox", &slot).await.unwrap());
    }

    #[tokio::test]
    async fn relaxed_fallback_reports_ambiguous_when_both_subsets_nonempty() {
        let provider = FakeAvailabilityProvider::new();
        let today = Utc::now().date_naive();
        let today_weekday = today.weekday().number_from_monday() as u8;
        let other_day = today + ChronoDuration::days(1);

        // Day-of-week match, but too early for "after 15:00" — only
        // contributes to the same-days-different-times subset.
        provider.seed(today, vec![AvailableSlot { datetime: Utc.from_utc_datetime(&today.and_hms_opt(9, 0, 0).unwrap()), service: "botox".to_string() }]).await;
        // Passes the time threshold, but not a day-of-week match — only
        // contributes to the same-time-different-days subset.
        provider.seed(other_day, vec![AvailableSlot { datetime: Utc.from_utc_datetime(&other_day.and_hms_opt(16, 0, 0).unwrap()), service: "botox".to_string() }]).await;

        let engine = engine(provider);
        let prefs = TimePreferences { days_of_week: vec![today_weekday], after_time: Some("15:00".to_string()), before_time: None, raw_text: String::new() };

        let outcome = engine.relaxed_fallback("org-1", "botox", &prefs).await.unwrap();
        assert!(matches!(outcome, RelaxedFallback::Ambiguous));
    }

    #[test]
    fn disambiguation_response_carries_the_question_and_no_slots() {
        let provider = FakeAvailabilityProvider::new();
        let engine = engine(provider);
        let response = engine.build_disambiguation_response();
        assert!(response.slots.is_empty());
        assert_eq!(response.disambiguation_question.as_deref(), Some(RELAXATION_CHOICE_QUESTION));
    }
}
