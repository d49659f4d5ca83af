use std::{path::PathBuf, time::Duration};

use handoff::{RetryPolicy, supabase::SupabaseConfig};

pub const DATA_DIR_VAR: &str = "EXQUIZITE_DATA_DIR";
pub const MAX_RETRIES_VAR: &str = "EXQUIZITE_MAX_RETRIES";
pub const RETRY_DELAY_VAR: &str = "EXQUIZITE_RETRY_DELAY_MS";
pub const DEFAULT_DATA_DIR: &str = ".exquizite";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a whole number, got `{value}`")]
    NotANumber { var: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClientConfig {
    pub data_dir: PathBuf,
    /// `None` when the service is not configured; only guest mode works then.
    pub supabase: Option<SupabaseConfig>,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let number = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(var)
                .map(|value| {
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ConfigError::NotANumber { var, value })
                })
                .transpose()
        };

        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = number(MAX_RETRIES_VAR)? {
            retry.max_retries = max_retries.try_into().unwrap_or(u32::MAX);
        }
        if let Some(delay) = number(RETRY_DELAY_VAR)? {
            retry.delay = Duration::from_millis(delay);
        }

        let supabase = match SupabaseConfig::from_lookup(&lookup) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Remote sync disabled: {e}");
                None
            }
        };

        Ok(Self {
            data_dir: lookup(DATA_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            supabase,
            retry,
        })
    }
}
