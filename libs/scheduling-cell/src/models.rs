use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Natural-language scheduling preferences extracted from a patient's
/// reply. `days_of_week` uses `chrono`'s Monday = 1 .. Sunday = 7
/// numbering so it lines up directly with `Weekday::number_from_monday`.
/// `after_time`/`before_time` are `"HH:MM"` 24-hour strings; thresholds
/// are applied strictly (`>` / `<`) by the slot-assembly step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePreferences {
    pub days_of_week: Vec<u8>,
    pub after_time: Option<String>,
    pub before_time: Option<String>,
    pub raw_text: String,
}

impl TimePreferences {
    pub fn is_empty(&self) -> bool {
        self.days_of_week.is_empty() && self.after_time.is_none() && self.before_time.is_none()
    }

    pub fn has_day_and_time(&self) -> bool {
        !self.days_of_week.is_empty() && (self.after_time.is_some() || self.before_time.is_some())
    }
}

/// A raw availability candidate returned by an `AvailabilityProvider`,
/// before it has been filtered, sorted, spread across days, or indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub datetime: DateTime<Utc>,
    pub service: String,
}

/// An appointment time offered to the patient, with the 1-based index
/// they reply with. Presented slots are scoped to one conversation turn:
/// they are discarded on successful booking or a context reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentedSlot {
    pub index: u32,
    pub datetime: DateTime<Utc>,
    pub display_string: String,
    pub service: String,
    pub available: bool,
}

/// Output of one pass through the time-selection engine: either a list
/// of slots with rendered SMS copy, a disambiguation question (the
/// relaxed-fallback case where both "same time different days" and "same
/// days different times" produced results), or — once the patient has
/// picked — the slot they selected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSelectionResponse {
    pub slots: Vec<PresentedSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disambiguation_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_slot: Option<PresentedSlot>,
}

/// Result of one `fetch_availability` pass. The relaxed-fallback strategy
/// (§4.10.B.3) can turn up two non-overlapping relaxations at once — same
/// time on different days, and same days at different times — in which
/// case there is nothing to present yet: the patient has to say which
/// relaxation to pursue before slots can be assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityOutcome {
    Candidates(Vec<AvailableSlot>),
    NeedsRelaxationChoice,
}

/// Fixed copy for the "which relaxation do you want" disambiguation turn.
pub const RELAXATION_CHOICE_QUESTION: &str =
    "I found some times on your preferred days (different hours) and some at your preferred time (different days) — which would you like to see?";

pub const MAX_SLOTS_TO_PRESENT: usize = 6;
pub const MAX_SLOTS_PER_DAY: usize = 2;
pub const AVAILABILITY_HORIZON_DAYS: i64 = 90;
pub const RELAXED_FALLBACK_WINDOW_DAYS: i64 = 28;
pub const BATCH_DATE_LIMIT: usize = 31;
