use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::RwLock;
use tracing::instrument;

use shared_database::PlatformClient;

use crate::error::ConversationError;

/// Whether a lead has opted out of receiving messages on a channel. The
/// reply pipeline (step 3) and the payment confirmation/failure SMS both
/// consult this before sending anything.
#[async_trait]
pub trait OptOutRegistry: Send + Sync {
    async fn is_opted_out(&self, org_id: &str, phone: &str) -> Result<bool, ConversationError>;
}

/// REST-backed registry, following `patient-cell`'s CRUD-over-REST shape:
/// a filtered `GET` against a table, non-empty result means opted out.
pub struct PlatformOptOutRegistry {
    client: Arc<PlatformClient>,
}

impl PlatformOptOutRegistry {
    pub fn new(client: Arc<PlatformClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OptOutRegistry for PlatformOptOutRegistry {
    #[instrument(skip(self))]
    async fn is_opted_out(&self, org_id: &str, phone: &str) -> Result<bool, ConversationError> {
        let path = format!("/rest/v1/opt_outs?org_id=eq.{org_id}&phone=eq.{phone}");
        let rows: Vec<serde_json::Value> = self
            .client
            .request_lenient(Method::GET, &path, None)
            .await
            .map_err(|e| ConversationError::Transport(e.to_string()))?;
        Ok(!rows.is_empty())
    }
}

/// In-process fake for tests; also usable as a standalone deployment
/// without a platform table wired in.
#[derive(Default)]
pub struct InMemoryOptOutRegistry {
    opted_out: Arc<RwLock<HashSet<(String, String)>>>,
}

impl InMemoryOptOutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn opt_out(&self, org_id: &str, phone: &str) {
        self.opted_out.write().await.insert((org_id.to_string(), phone.to_string()));
    }
}

#[async_trait]
impl OptOutRegistry for InMemoryOptOutRegistry {
    async fn is_opted_out(&self, org_id: &str, phone: &str) -> Result<bool, ConversationError> {
        Ok(self.opted_out.read().await.contains(&(org_id.to_string(), phone.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_not_opted_out() {
        let registry = InMemoryOptOutRegistry::new();
        assert!(!registry.is_opted_out("org-1", "+15551234567").await.unwrap());
    }

    #[tokio::test]
    async fn recognizes_opted_out_lead() {
        let registry = InMemoryOptOutRegistry::new();
        registry.opt_out("org-1", "+15551234567").await;
        assert!(registry.is_opted_out("org-1", "+15551234567").await.unwrap());
    }
}
