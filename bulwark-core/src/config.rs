//! Configuration (environment variables):
//!
//!   BULWARK_MASTER_KEY               - 32-byte master key, hex. If absent, a
//!                                      fresh key is generated and ciphertext
//!                                      from prior runs cannot be decrypted.
//!   BULWARK_MASTER_IV                - 16-byte IV, hex. Reserved; every wrap
//!                                      still draws a fresh per-call IV.
//!   BULWARK_ANOMALY_MAX_OPS          - operations per window before the
//!                                      high-volume detector fires (default: 20)
//!   BULWARK_ANOMALY_WINDOW_SECS      - sliding window length (default: 60)
//!   BULWARK_ANOMALY_FAILURE_RATIO    - failed/total ratio threshold (default: 0.30)
//!   BULWARK_ANOMALY_REVOKED_ATTEMPTS - revoked-key attempts threshold (default: 2)
//!   BULWARK_WORKING_HOURS_START      - local hour, inclusive (default: 7)
//!   BULWARK_WORKING_HOURS_END        - local hour, exclusive (default: 22)

use std::time::Duration;

use crate::anomaly::AnomalyConfig;
use crate::error::CoreError;

/// Core configuration. Anomaly thresholds carry the documented defaults;
/// the master key is optional here and resolved by [`crate::master::MasterKey`].
#[derive(Clone, Debug)]
pub struct CoreConfig {
    pub master_key_hex: Option<String>,
    /// Reserved. Wrapping always uses a fresh per-call IV.
    pub master_iv_hex: Option<String>,
    pub anomaly: AnomalyConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            master_key_hex: None,
            master_iv_hex: None,
            anomaly: AnomalyConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut anomaly = AnomalyConfig::default();
        if let Some(n) = env_parse::<usize>("BULWARK_ANOMALY_MAX_OPS") {
            anomaly.max_ops_per_window = n;
        }
        if let Some(secs) = env_parse::<u64>("BULWARK_ANOMALY_WINDOW_SECS") {
            anomaly.window = Duration::from_secs(secs);
        }
        if let Some(ratio) = env_parse::<f64>("BULWARK_ANOMALY_FAILURE_RATIO") {
            anomaly.failure_ratio_threshold = ratio;
        }
        if let Some(n) = env_parse::<usize>("BULWARK_ANOMALY_REVOKED_ATTEMPTS") {
            anomaly.revoked_key_attempts_threshold = n;
        }
        if let Some(h) = env_parse::<u32>("BULWARK_WORKING_HOURS_START") {
            anomaly.working_hours.0 = h;
        }
        if let Some(h) = env_parse::<u32>("BULWARK_WORKING_HOURS_END") {
            anomaly.working_hours.1 = h;
        }

        Self {
            master_key_hex: std::env::var("BULWARK_MASTER_KEY").ok(),
            master_iv_hex: std::env::var("BULWARK_MASTER_IV").ok(),
            anomaly,
        }
    }

    /// Decode the configured master key, if any. A present-but-invalid value
    /// is an error rather than a silent fallback to generation.
    pub fn master_key_bytes(&self) -> Result<Option<[u8; 32]>, CoreError> {
        let Some(hex_str) = &self.master_key_hex else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_str)
            .map_err(|_| CoreError::ConfigMissing("BULWARK_MASTER_KEY is not valid hex".into()))?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::ConfigMissing("BULWARK_MASTER_KEY must be 32 bytes".into())
        })?;
        Ok(Some(key))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}
