use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PaymentsError;
use crate::models::CheckoutLink;

/// Wire protocol to the payment provider (Stripe, Square, or whichever a
/// clinic is configured for) is out of scope here; this trait is the
/// contract the deposit dispatcher and preloader consume.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_checkout(&self, org_id: &str, lead_id: &str, amount_cents: u64, success_url: &str, cancel_url: &str, description: &str) -> Result<CheckoutLink, PaymentsError>;
}

/// Stand-in shipped until a clinic's real processor (Stripe, Square) is
/// wired in. Builds a deterministic link off `success_url` rather than
/// calling out anywhere, so a deployment with no payment provider
/// configured still produces a link shaped like the real thing.
pub struct PlaceholderCheckoutProvider;

#[async_trait]
impl CheckoutProvider for PlaceholderCheckoutProvider {
    async fn create_checkout(&self, org_id: &str, lead_id: &str, amount_cents: u64, success_url: &str, _cancel_url: &str, _description: &str) -> Result<CheckoutLink, PaymentsError> {
        let provider_payment_id = format!("pi_{}", Uuid::new_v4());
        let separator = if success_url.contains('?') { '&' } else { '?' };
        let url = format!("{success_url}{separator}org={org_id}&lead={lead_id}&amount={amount_cents}&pi={provider_payment_id}");
        Ok(CheckoutLink { url, provider_payment_id })
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    pub struct FakeCheckoutProvider {
        counter: AtomicU64,
        pub fail: bool,
    }

    #[async_trait]
    impl CheckoutProvider for FakeCheckoutProvider {
        async fn create_checkout(&self, _org_id: &str, _lead_id: &str, amount_cents: u64, _success_url: &str, _cancel_url: &str, _description: &str) -> Result<CheckoutLink, PaymentsError> {
            if self.fail {
                return Err(PaymentsError::CheckoutProvider("provider unavailable".into()));
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(CheckoutLink { url: format!("https://pay.example.com/c/{n}?amount={amount_cents}"), provider_payment_id: format!("pi_{n}") })
        }
    }
}
