use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::SchedulingError;
use crate::models::AvailableSlot;

/// Bridge to the external booking platform's availability calendar. No
/// concrete wire protocol (Moxie GraphQL, Square, etc.) ships here — this
/// trait is the seam the engine calls through; a real deployment wires a
/// provider-specific adapter behind it.
///
/// The three `supports_*`/`fetch_*` capability pairs let one adapter
/// expose whichever strategies its upstream platform actually offers
/// without forcing every adapter to implement all of them: the engine
/// tries each in the order specified (smart calendar, batched dates,
/// Moxie shortcut) and falls through to the next when a capability flag
/// is false or the call returns `NotSupported`.
#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    fn supports_smart_calendar(&self) -> bool {
        false
    }

    async fn fetch_smart_calendar(&self, _org_id: &str, _service: &str, _months: u32) -> Result<Vec<AvailableSlot>, SchedulingError> {
        Err(SchedulingError::NotSupported("smart calendar".into()))
    }

    fn supports_moxie_shortcut(&self) -> bool {
        false
    }

    async fn fetch_moxie_window(&self, _org_id: &str, _service: &str) -> Result<Vec<AvailableSlot>, SchedulingError> {
        Err(SchedulingError::NotSupported("moxie shortcut".into()))
    }

    /// Batched date fetch: the engine calls this once per batch of up to
    /// `BATCH_DATE_LIMIT` dates.
    async fn fetch_dates(&self, org_id: &str, service: &str, dates: &[NaiveDate]) -> Result<Vec<AvailableSlot>, SchedulingError>;

    /// Single-date fetch used by the relaxed fallback probes and by final
    /// slot verification.
    async fn fetch_single_date(&self, org_id: &str, service: &str, date: NaiveDate) -> Result<Vec<AvailableSlot>, SchedulingError> {
        self.fetch_dates(org_id, service, std::slice::from_ref(&date)).await
    }
}

/// Stand-in shipped until a clinic's real calendar adapter (Moxie, Square,
/// a practice-management API) is wired in. Reports no capability flags and
/// returns an empty slot list for every date, so a deployment with no
/// booking platform configured degrades to "no availability found" rather
/// than failing to compile or panicking.
pub struct PlaceholderAvailabilityProvider;

#[async_trait]
impl AvailabilityProvider for PlaceholderAvailabilityProvider {
    async fn fetch_dates(&self, _org_id: &str, _service: &str, _dates: &[NaiveDate]) -> Result<Vec<AvailableSlot>, SchedulingError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// In-memory availability adapter for tests: returns whatever slots
    /// were seeded for a given date, keyed by `service`.
    #[derive(Default)]
    pub struct FakeAvailabilityProvider {
        pub by_date: Mutex<HashMap<NaiveDate, Vec<AvailableSlot>>>,
    }

    impl FakeAvailabilityProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn seed(&self, date: NaiveDate, slots: Vec<AvailableSlot>) {
            self.by_date.lock().await.insert(date, slots);
        }
    }

    #[async_trait]
    impl AvailabilityProvider for FakeAvailabilityProvider {
        async fn fetch_dates(&self, _org_id: &str, service: &str, dates: &[NaiveDate]) -> Result<Vec<AvailableSlot>, SchedulingError> {
            let by_date = self.by_date.lock().await;
            Ok(dates
                .iter()
                .flat_map(|d| by_date.get(d).cloned().unwrap_or_default())
                .filter(|s| s.service == service)
                .collect())
        }
    }
}
