use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// How the reply delivery pipeline treats a supervisor action of `block`
/// or `edit` (see `conversation-cell`'s reply pipeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorMode {
    /// Log the supervisor's verdict but never mutate or suppress the reply.
    Warn,
    /// Apply edits; replace blocked replies with the canned fallback.
    Block,
    /// Apply edits; fall back to `allow` on anything else (including block).
    Edit,
}

impl FromStr for SupervisorMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warn" => Ok(SupervisorMode::Warn),
            "block" => Ok(SupervisorMode::Block),
            "edit" => Ok(SupervisorMode::Edit),
            _ => Err(()),
        }
    }
}

/// Runtime knobs for the queue worker pool and the pipeline it drives.
/// Mirrors the environment-provided knobs enumerated in the governing
/// specification: `worker_count`, `receive_batch_size`, `receive_wait_seconds`,
/// `supervisor_mode`, `job_ttl`. Numeric knobs are clamped here, once, at
/// construction time rather than re-validated at every call site.
#[derive(Debug, Clone)]
pub struct ClinicRuntimeConfig {
    pub redis_url: String,
    pub worker_count: usize,
    pub receive_batch_size: u32,
    pub receive_wait_seconds: u32,
    pub supervisor_mode: SupervisorMode,
    pub job_ttl: Duration,
    pub deposit_preload_wait: Duration,
    pub deposit_preload_budget: Duration,
    pub messenger_send_timeout: Duration,
}

impl ClinicRuntimeConfig {
    pub fn from_env() -> Self {
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| {
            warn!("REDIS_URL not set, using local default");
            "redis://127.0.0.1:6379".to_string()
        });

        let worker_count = env_usize("WORKER_COUNT", 2);
        let receive_batch_size = env_usize("RECEIVE_BATCH_SIZE", 5).clamp(1, 10) as u32;
        let receive_wait_seconds = env_usize("RECEIVE_WAIT_SECONDS", 2).clamp(0, 20) as u32;

        let supervisor_mode = env::var("SUPERVISOR_MODE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| {
                warn!("SUPERVISOR_MODE not set or invalid, defaulting to warn");
                SupervisorMode::Warn
            });

        let job_ttl_hours = env_usize("JOB_TTL_HOURS", 72);

        Self {
            redis_url,
            worker_count: worker_count.max(1),
            receive_batch_size,
            receive_wait_seconds,
            supervisor_mode,
            job_ttl: Duration::from_secs(job_ttl_hours as u64 * 3600),
            deposit_preload_wait: Duration::from_millis(2_000),
            deposit_preload_budget: Duration::from_millis(10_000),
            messenger_send_timeout: Duration::from_secs(5),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{key} is not a valid integer ({raw:?}), using default {default}");
            default
        }),
        Err(_) => default,
    }
}

/// Connection details for the REST-backed platform store (job store,
/// payment intent repository, outbox, transcript store, opt-out registry,
/// etc. when run against a real PostgREST-style backend rather than an
/// in-memory fake).
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub service_key: String,
}

impl PlatformConfig {
    pub fn from_env() -> Self {
        let config = Self {
            base_url: env::var("PLATFORM_URL").unwrap_or_else(|_| {
                warn!("PLATFORM_URL not set, using empty value");
                String::new()
            }),
            service_key: env::var("PLATFORM_SERVICE_KEY").unwrap_or_else(|_| {
                warn!("PLATFORM_SERVICE_KEY not set, using empty value");
                String::new()
            }),
        };

        if !config.is_configured() {
            warn!("platform store not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.service_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_mode_parses_known_values() {
        assert_eq!("warn".parse::<SupervisorMode>().unwrap(), SupervisorMode::Warn);
        assert_eq!("BLOCK".parse::<SupervisorMode>().unwrap(), SupervisorMode::Block);
        assert!("nonsense".parse::<SupervisorMode>().is_err());
    }
}
