use std::collections::HashMap;
use std::env;

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use shared_models::error::AppError;
use tracing::warn;

/// Everything downstream components (the deposit dispatcher, the payment
/// handler, the time-selection engine) need to know about a single
/// clinic, without depending on the wire protocol of whatever booking
/// platform backs it (Moxie, Square, a generic calendar). Concrete
/// providers (a real Moxie/Square-backed implementation) stay behind this
/// trait; only a static/env-seeded reference implementation ships here.
#[async_trait]
pub trait ClinicConfigProvider: Send + Sync {
    async fn clinic_name(&self, org_id: &str) -> Result<String, AppError>;
    /// Offset from UTC in hours, and an abbreviation for display ("EST").
    async fn timezone(&self, org_id: &str) -> Result<(i64, String), AppError>;
    async fn deposit_amount_cents(&self, org_id: &str) -> Result<u64, AppError>;
    /// Base URL the deposit checkout link's success/cancel redirects are
    /// built from — used by the preloader, which has to guess a
    /// destination before the processor has chosen one.
    async fn booking_url(&self, org_id: &str) -> Result<String, AppError>;
    async fn booking_platform(&self, org_id: &str) -> Result<BookingPlatform, AppError>;
    async fn service_menu_item_id(&self, org_id: &str, service: &str) -> Result<Option<String>, AppError>;
    async fn provider_id(&self, org_id: &str, provider_name: &str) -> Result<Option<String>, AppError>;
    /// "Monday around 10 AM" when closed, "shortly" during business hours,
    /// falling back to "within 24 hours" — used in the generic payment
    /// confirmation SMS when no scheduled time is known.
    async fn callback_time_phrase(&self, org_id: &str) -> Result<String, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingPlatform {
    Moxie,
    Generic,
}

#[derive(Debug, Clone)]
pub struct ClinicProfile {
    pub name: String,
    pub utc_offset_hours: i64,
    pub tz_abbr: String,
    pub deposit_amount_cents: u64,
    pub booking_url: String,
    pub platform: BookingPlatform,
    pub service_menu: HashMap<String, String>,
    pub providers: HashMap<String, String>,
    pub business_open_hour: u32,
    pub business_close_hour: u32,
}

impl Default for ClinicProfile {
    fn default() -> Self {
        Self {
            name: "the clinic".to_string(),
            utc_offset_hours: -5,
            tz_abbr: "EST".to_string(),
            deposit_amount_cents: 5_000,
            booking_url: "https://booking.example.com/checkout".to_string(),
            platform: BookingPlatform::Generic,
            service_menu: HashMap::new(),
            providers: HashMap::new(),
            business_open_hour: 9,
            business_close_hour: 18,
        }
    }
}

/// Env-seeded, single-tenant reference implementation. Real multi-tenant
/// deployments would look this up per `org_id` from the platform; this
/// repo carries one profile and ignores `org_id` beyond validating it is
/// non-empty, matching the scope of the core this crate supports.
pub struct StaticClinicConfig {
    profile: ClinicProfile,
}

impl StaticClinicConfig {
    pub fn from_env() -> Self {
        let mut profile = ClinicProfile::default();

        if let Ok(name) = env::var("CLINIC_NAME") {
            profile.name = name;
        } else {
            warn!("CLINIC_NAME not set, using default clinic name");
        }

        if let Ok(cents) = env::var("CLINIC_DEPOSIT_CENTS") {
            match cents.parse() {
                Ok(v) => profile.deposit_amount_cents = v,
                Err(_) => warn!("CLINIC_DEPOSIT_CENTS is not a valid integer, using default"),
            }
        }

        if let Ok(url) = env::var("CLINIC_BOOKING_URL") {
            profile.booking_url = url;
        } else {
            warn!("CLINIC_BOOKING_URL not set, using default booking URL");
        }

        if let Ok(platform) = env::var("CLINIC_BOOKING_PLATFORM") {
            profile.platform = match platform.to_ascii_lowercase().as_str() {
                "moxie" => BookingPlatform::Moxie,
                _ => BookingPlatform::Generic,
            };
        }

        Self { profile }
    }

    pub fn with_profile(profile: ClinicProfile) -> Self {
        Self { profile }
    }

    fn check_org(&self, org_id: &str) -> Result<(), AppError> {
        if org_id.is_empty() {
            return Err(AppError::ValidationError("org_id must not be empty".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClinicConfigProvider for StaticClinicConfig {
    async fn clinic_name(&self, org_id: &str) -> Result<String, AppError> {
        self.check_org(org_id)?;
        Ok(self.profile.name.clone())
    }

    async fn timezone(&self, org_id: &str) -> Result<(i64, String), AppError> {
        self.check_org(org_id)?;
        Ok((self.profile.utc_offset_hours, self.profile.tz_abbr.clone()))
    }

    async fn deposit_amount_cents(&self, org_id: &str) -> Result<u64, AppError> {
        self.check_org(org_id)?;
        Ok(self.profile.deposit_amount_cents)
    }

    async fn booking_url(&self, org_id: &str) -> Result<String, AppError> {
        self.check_org(org_id)?;
        Ok(self.profile.booking_url.clone())
    }

    async fn booking_platform(&self, org_id: &str) -> Result<BookingPlatform, AppError> {
        self.check_org(org_id)?;
        Ok(self.profile.platform)
    }

    async fn service_menu_item_id(&self, org_id: &str, service: &str) -> Result<Option<String>, AppError> {
        self.check_org(org_id)?;
        Ok(self.profile.service_menu.get(service).cloned())
    }

    async fn provider_id(&self, org_id: &str, provider_name: &str) -> Result<Option<String>, AppError> {
        self.check_org(org_id)?;
        Ok(self.profile.providers.get(provider_name).cloned())
    }

    async fn callback_time_phrase(&self, org_id: &str) -> Result<String, AppError> {
        self.check_org(org_id)?;
        let local = Utc::now() + chrono::Duration::hours(self.profile.utc_offset_hours);
        let hour = local.hour();
        let is_open = hour >= self.profile.business_open_hour && hour < self.profile.business_close_hour;
        let is_weekday = local.weekday().number_from_monday() <= 5;

        if is_open && is_weekday {
            return Ok("shortly".to_string());
        }

        // Closed: point to the next business morning.
        Ok(if is_weekday && hour < self.profile.business_open_hour {
            "this morning".to_string()
        } else {
            "Monday around 10 AM".to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_org_id() {
        let config = StaticClinicConfig::with_profile(ClinicProfile::default());
        assert!(config.clinic_name("").await.is_err());
    }

    #[tokio::test]
    async fn returns_configured_deposit_amount() {
        let mut profile = ClinicProfile::default();
        profile.deposit_amount_cents = 7_500;
        let config = StaticClinicConfig::with_profile(profile);
        assert_eq!(config.deposit_amount_cents("org-1").await.unwrap(), 7_500);
    }

    #[tokio::test]
    async fn looks_up_service_menu_items() {
        let mut profile = ClinicProfile::default();
        profile.service_menu.insert("botox".to_string(), "svc-123".to_string());
        let config = StaticClinicConfig::with_profile(profile);
        assert_eq!(config.service_menu_item_id("org-1", "botox").await.unwrap(), Some("svc-123".to_string()));
        assert_eq!(config.service_menu_item_id("org-1", "filler").await.unwrap(), None);
    }
}
