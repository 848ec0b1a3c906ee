//! Tunables for the synchronization protocol.

use std::time::Duration;

/// Byte budget for a single create/extend/upload request.
pub const MAX_BUNDLE_SIZE: usize = 4_000_000;

/// Upload + check rounds before giving up on missing files.
pub const UPLOAD_ATTEMPTS: usize = 5;

/// Fresh-create retries after the server reports the parent bundle expired.
pub const MAX_BUNDLE_RETRIES: usize = 3;

pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(100);
pub const POLL_DELAY: Duration = Duration::from_millis(1000);

/// Delay between in-progress checks while waiting for another cycle.
pub const WAIT_DELAY: Duration = Duration::from_millis(200);

/// Runtime configuration shared by the protocol and the coordinator.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Prefix for progress texts, e.g. `"resync: Uploading files..."`.
    pub presentable_name: String,
    pub max_bundle_size: usize,
    pub upload_attempts: usize,
    pub max_bundle_retries: usize,
    pub analysis_timeout: Duration,
    pub poll_delay: Duration,
    pub wait_delay: Duration,
    /// Lowest severity the server should report (1..=3).
    pub min_severity: u8,
    pub use_linter: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            presentable_name: "resync".to_string(),
            max_bundle_size: MAX_BUNDLE_SIZE,
            upload_attempts: UPLOAD_ATTEMPTS,
            max_bundle_retries: MAX_BUNDLE_RETRIES,
            analysis_timeout: ANALYSIS_TIMEOUT,
            poll_delay: POLL_DELAY,
            wait_delay: WAIT_DELAY,
            min_severity: 1,
            use_linter: false,
        }
    }
}

impl SyncConfig {
    /// Build a config from `RESYNC_*` environment variables, falling back to
    /// the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("RESYNC_PRESENTABLE_NAME") {
            if !name.trim().is_empty() {
                config.presentable_name = name.trim().to_string();
            }
        }
        if let Some(severity) = env_parse::<u8>("RESYNC_MIN_SEVERITY") {
            config.min_severity = severity.clamp(1, 3);
        }
        if let Some(ms) = env_parse::<u64>("RESYNC_POLL_DELAY_MS") {
            config.poll_delay = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = env_parse::<u64>("RESYNC_ANALYSIS_TIMEOUT_SECS") {
            config.analysis_timeout = Duration::from_secs(secs.max(1));
        }
        config.use_linter = env_flag("RESYNC_USE_LINTER", config.use_linter);
        config
    }

    /// Number of polling attempts that fit into the analysis timeout.
    pub fn poll_attempts(&self) -> usize {
        let delay_ms = self.poll_delay.as_millis().max(1);
        (self.analysis_timeout.as_millis() / delay_ms) as usize
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            !matches!(v.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => default,
    }
}
