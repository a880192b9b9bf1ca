use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// One telemetry event for a leak-guard trip or supervisor action,
/// scoped down from `security-cell`'s `AuditEntry` to the handful of
/// fields the reply pipeline actually needs to record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub conversation_id: String,
    pub reason: String,
}

impl TelemetryEvent {
    pub fn new(kind: impl Into<String>, conversation_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind: kind.into(),
            conversation_id: conversation_id.into(),
            reason: reason.into(),
        }
    }
}

fn ssn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{3}-?\d{2}-?\d{4}\b").unwrap())
}

fn card_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}[\s\-]?\d{4}[\s\-]?\d{4}[\s\-]?\d{4}\b").unwrap())
}

/// Outcome of scanning a draft reply for sensitive patterns. `clean_text`
/// is either the original text (nothing found), a redacted version (the
/// leak was salvageable by substitution), or `None` when the text should
/// be replaced wholesale with the canned fallback.
pub struct LeakGuardResult {
    pub clean_text: Option<String>,
    pub reasons: Vec<String>,
}

impl LeakGuardResult {
    pub fn leaked(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Bounded, explicitly-scoped sensitive-data scanner — SSN-shaped and
/// card-number-shaped patterns only. Not a general PHI/redaction
/// subsystem; that remains out of scope for this core.
pub struct OutputLeakGuard;

impl OutputLeakGuard {
    pub fn new() -> Self {
        Self
    }

    pub fn scan(&self, text: &str) -> LeakGuardResult {
        let mut reasons = Vec::new();
        let mut sanitized = text.to_string();

        if ssn_re().is_match(&sanitized) {
            reasons.push("ssn_pattern".to_string());
            sanitized = ssn_re().replace_all(&sanitized, "[redacted]").to_string();
        }
        if card_re().is_match(&sanitized) {
            reasons.push("card_number_pattern".to_string());
            sanitized = card_re().replace_all(&sanitized, "[redacted]").to_string();
        }

        if reasons.is_empty() {
            LeakGuardResult { clean_text: Some(text.to_string()), reasons }
        } else {
            LeakGuardResult { clean_text: Some(sanitized), reasons }
        }
    }

    /// Scans and logs a telemetry event per reason when a leak is found.
    /// Returns the substituted text, or `None` to signal "unsalvageable,
    /// use the canned fallback" — in the current pattern set, every match
    /// is salvageable by substitution, so this never returns `None`; the
    /// hook exists so a future pattern (e.g. one spanning a whole
    /// sentence) can opt into the fallback path without changing callers.
    pub fn scan_and_sanitize(&self, text: &str, conversation_id: &str) -> Option<String> {
        let result = self.scan(text);
        for reason in &result.reasons {
            warn!(conversation_id, reason, "output leak guard trip");
        }
        result.clean_text
    }
}

impl Default for OutputLeakGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_passes_through_unchanged() {
        let guard = OutputLeakGuard::new();
        let result = guard.scan("Your appointment is confirmed for 3pm.");
        assert!(!result.leaked());
        assert_eq!(result.clean_text.as_deref(), Some("Your appointment is confirmed for 3pm."));
    }

    #[test]
    fn redacts_ssn_shaped_sequence() {
        let guard = OutputLeakGuard::new();
        let result = guard.scan("Your SSN on file is 123-45-6789, confirmed.");
        assert!(result.leaked());
        assert!(result.clean_text.unwrap().contains("[redacted]"));
    }

    #[test]
    fn redacts_card_shaped_sequence() {
        let guard = OutputLeakGuard::new();
        let result = guard.scan("Card ending 4111 1111 1111 1111 was charged.");
        assert!(result.leaked());
    }
}
