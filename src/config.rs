use crate::models::Identity;
use crate::responder::HistoryMode;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const ENV_USER_ID: &str = "LUMI_USER_ID";
const ENV_WEBHOOK_URL: &str = "LUMI_WEBHOOK_URL";
const ENV_WEBHOOK_HISTORY: &str = "LUMI_WEBHOOK_HISTORY";
const ENV_DATA_DIR: &str = "LUMI_DATA_DIR";
const ENV_REVEAL_MS: &str = "LUMI_REVEAL_MS";

const DEFAULT_REVEAL_MS: u64 = 15;
const DB_FILE_NAME: &str = "lumi.sqlite";

/// Runtime settings, read from the environment.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Signed-in user; `None` runs in guest mode.
    pub identity: Option<Identity>,
    /// Chat webhook; the keyword responder is used when unset.
    pub webhook_url: Option<String>,
    pub history_mode: HistoryMode,
    pub data_dir: PathBuf,
    pub reveal_step: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let identity = var(ENV_USER_ID).map(|user_id| Identity { user_id });

        let history_mode = match var(ENV_WEBHOOK_HISTORY).as_deref() {
            None | Some("latest") => HistoryMode::LatestOnly,
            Some("full") => HistoryMode::Full,
            Some(other) => {
                return Err(anyhow::anyhow!(
                    "Unsupported {} value '{}', expected 'latest' or 'full'",
                    ENV_WEBHOOK_HISTORY,
                    other
                ))
            }
        };

        let data_dir = match var(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_local_dir()
                .context("Could not determine the local data directory; set LUMI_DATA_DIR")?
                .join("lumi"),
        };

        let reveal_ms = match var(ENV_REVEAL_MS) {
            Some(raw) => raw
                .parse::<u64>()
                .context(format!("Failed to parse {} '{}' as milliseconds", ENV_REVEAL_MS, raw))?,
            None => DEFAULT_REVEAL_MS,
        };

        let webhook_url = var(ENV_WEBHOOK_URL);
        log::debug!(
            "Config loaded: signed_in={}, webhook={:?}, data_dir={}",
            identity.is_some(),
            webhook_url,
            data_dir.display()
        );

        Ok(Self {
            identity,
            webhook_url,
            history_mode,
            data_dir,
            reveal_step: Duration::from_millis(reveal_ms),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }
}
