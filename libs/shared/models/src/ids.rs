use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// A conversation's identity: `(org_id, channel, normalized_phone)` rendered
/// as `"{channel}:{org}:{digits}"`. Digits are E.164 without the leading
/// `+`. This is the wire format every component that keys state by
/// conversation (job store, transcript store, deposit preloader cache)
/// agrees on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(channel: &str, org_id: &str, digits: &str) -> Self {
        Self(format!("{channel}:{org_id}:{digits}"))
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let parts: Vec<&str> = raw.splitn(3, ':').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(AppError::ValidationError(format!(
                "malformed conversation id: {raw}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn channel(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    pub fn org_id(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    pub fn digits(&self) -> &str {
        self.0.split(':').nth(2).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_wire_format() {
        let id = ConversationId::new("sms", "org-1", "15551234567");
        assert_eq!(id.as_str(), "sms:org-1:15551234567");
        let parsed = ConversationId::parse(id.as_str()).unwrap();
        assert_eq!(parsed.channel(), "sms");
        assert_eq!(parsed.org_id(), "org-1");
        assert_eq!(parsed.digits(), "15551234567");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(ConversationId::parse("sms:org-1").is_err());
        assert!(ConversationId::parse("").is_err());
    }
}
