use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::checkout_provider::CheckoutProvider;

const PRELOAD_BACKGROUND_TIMEOUT: Duration = Duration::from_secs(10);
const PRELOAD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// `Preloaded Checkout` from the data model. Created pending, completed
/// exactly once by the background task, and consumed exactly once by the
/// deposit dispatcher.
#[derive(Debug, Clone)]
pub struct PreloadedCheckout {
    pub pre_payment_id: String,
    pub url: Option<String>,
    pub provider_id: Option<String>,
    pub amount_cents: u64,
    pub generated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl PreloadedCheckout {
    fn pending(pre_payment_id: String, amount_cents: u64) -> Self {
        Self { pre_payment_id, url: None, provider_id: None, amount_cents, generated_at: Utc::now(), error: None }
    }

    fn is_complete(&self) -> bool {
        self.url.is_some() || self.error.is_some()
    }
}

const AFFIRMATIVE_KEYWORDS: &[&str] = &["yes", "yeah", "yep", "sure", "ok", "okay", "sounds good", "let's do it", "i'll pay", "i will pay"];
const DEPOSIT_KEYWORDS: &[&str] = &["deposit", "pay", "payment", "charge", "book it", "reserve"];
const NEGATIVE_KEYWORDS: &[&str] = &["no", "not yet", "don't", "do not", "wait", "hold off", "cancel"];

/// Speculative checkout-link builder: hides checkout-creation latency
/// behind the LLM call by starting early whenever the patient's message
/// reads like deposit agreement.
pub struct DepositPreloader<P> {
    provider: Arc<P>,
    cache: Arc<RwLock<HashMap<String, PreloadedCheckout>>>,
}

impl<P: CheckoutProvider + 'static> DepositPreloader<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self { provider, cache: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Affirmative keyword ∧ deposit-related keyword ∧ ¬negative keyword.
    pub fn should_preload_deposit(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        let affirmative = AFFIRMATIVE_KEYWORDS.iter().any(|k| lower.contains(k));
        let deposit_related = DEPOSIT_KEYWORDS.iter().any(|k| lower.contains(k));
        let negative = NEGATIVE_KEYWORDS.iter().any(|k| lower.contains(k));
        affirmative && deposit_related && !negative
    }

    pub async fn start_preload(&self, conversation_id: &str, org_id: &str, lead_id: &str, amount_cents: u64, success_url: &str, cancel_url: &str, description: &str) {
        let pre_payment_id = Uuid::new_v4().to_string();
        self.cache.write().await.insert(conversation_id.to_string(), PreloadedCheckout::pending(pre_payment_id.clone(), amount_cents));

        let provider = self.provider.clone();
        let cache = self.cache.clone();
        let conversation_id = conversation_id.to_string();
        let org_id = org_id.to_string();
        let lead_id = lead_id.to_string();
        let success_url = success_url.to_string();
        let cancel_url = cancel_url.to_string();
        let description = description.to_string();

        tokio::spawn(async move {
            let result = tokio::time::timeout(PRELOAD_BACKGROUND_TIMEOUT, provider.create_checkout(&org_id, &lead_id, amount_cents, &success_url, &cancel_url, &description)).await;
            let mut cache = cache.write().await;
            let Some(entry) = cache.get_mut(&conversation_id) else { return };
            match result {
                Ok(Ok(link)) => {
                    entry.url = Some(link.url);
                    entry.provider_id = Some(link.provider_payment_id);
                }
                Ok(Err(err)) => {
                    warn!(conversation_id, error = %err, "deposit preload failed");
                    entry.error = Some(err.to_string());
                }
                Err(_) => {
                    warn!(conversation_id, "deposit preload timed out");
                    entry.error = Some("preload timed out".to_string());
                }
            }
        });
    }

    /// Polls every 50ms up to `timeout`; returns the completed entry
    /// (whether success or error) or `None` if it never completed in time.
    pub async fn wait_for_preloaded(&self, conversation_id: &str, timeout: Duration) -> Option<PreloadedCheckout> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticker = interval(PRELOAD_POLL_INTERVAL);
        loop {
            if let Some(entry) = self.cache.read().await.get(conversation_id) {
                if entry.is_complete() {
                    return Some(entry.clone());
                }
            } else {
                return None;
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            ticker.tick().await;
        }
    }

    /// Consume-once: removes and returns the cached entry, if any.
    pub async fn clear_preloaded(&self, conversation_id: &str) -> Option<PreloadedCheckout> {
        let entry = self.cache.write().await.remove(conversation_id);
        if entry.is_some() {
            info!(conversation_id, "consumed preloaded checkout");
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::checkout_provider::fakes::FakeCheckoutProvider;

    #[test]
    fn recognizes_deposit_agreement() {
        assert!(DepositPreloader::<FakeCheckoutProvider>::should_preload_deposit("yes I'll pay the deposit"));
    }

    #[test]
    fn rejects_negative_reply() {
        assert!(!DepositPreloader::<FakeCheckoutProvider>::should_preload_deposit("no, not yet, I need to check my calendar"));
    }

    #[test]
    fn rejects_affirmative_without_deposit_keyword() {
        assert!(!DepositPreloader::<FakeCheckoutProvider>::should_preload_deposit("sure, Tuesday works for me"));
    }

    #[tokio::test]
    async fn start_then_wait_returns_completed_link() {
        let preloader = DepositPreloader::new(Arc::new(FakeCheckoutProvider::default()));
        preloader.start_preload("sms:org-1:1", "org-1", "lead-1", 5000, "https://ok", "https://cancel", "deposit").await;
        let entry = preloader.wait_for_preloaded("sms:org-1:1", Duration::from_secs(1)).await;
        assert!(entry.is_some());
        assert!(entry.unwrap().url.is_some());
    }

    #[tokio::test]
    async fn wait_on_unknown_conversation_returns_none() {
        let preloader = DepositPreloader::new(Arc::new(FakeCheckoutProvider::default()));
        let entry = preloader.wait_for_preloaded("sms:org-1:missing", Duration::from_millis(100)).await;
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn clear_preloaded_is_consume_once() {
        let preloader = DepositPreloader::new(Arc::new(FakeCheckoutProvider::default()));
        preloader.start_preload("sms:org-1:1", "org-1", "lead-1", 5000, "https://ok", "https://cancel", "deposit").await;
        preloader.wait_for_preloaded("sms:org-1:1", Duration::from_secs(1)).await;
        let first = preloader.clear_preloaded("sms:org-1:1").await;
        assert!(first.is_some());
        let second = preloader.clear_preloaded("sms:org-1:1").await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn preload_failure_is_reported_rather_than_hanging() {
        let preloader = DepositPreloader::new(Arc::new(FakeCheckoutProvider { fail: true, ..Default::default() }));
        preloader.start_preload("sms:org-1:1", "org-1", "lead-1", 5000, "https://ok", "https://cancel", "deposit").await;
        let entry = preloader.wait_for_preloaded("sms:org-1:1", Duration::from_secs(1)).await.unwrap();
        assert!(entry.error.is_some());
    }
}
