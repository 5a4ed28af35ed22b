use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, messaging::throttled::ThrottleConfig, Result};

/// Process-level configuration, read once from the environment (and `.env`).
///
/// Everything an operator edits while the bot runs lives in the settings
/// file instead (see `settings`).
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,

    /// Hot-reloaded JSON settings file.
    pub settings_path: PathBuf,
    pub settings_poll_interval: Duration,

    // Delivery log
    pub delivery_log_path: PathBuf,
    pub delivery_log_json: bool,

    // AI rewrite
    pub rewrite_api_key: Option<String>,
    pub rewrite_timeout: Duration,

    // Outbound throttling
    pub throttle: ThrottleConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let settings_path = env_path("FWD_SETTINGS_PATH").unwrap_or_else(|| "bot_config.json".into());
        let settings_poll_interval =
            Duration::from_millis(env_u64("FWD_SETTINGS_POLL_MS").unwrap_or(2000).max(100));

        let delivery_log_path = env_path("FWD_DELIVERY_LOG_PATH")
            .unwrap_or_else(|| PathBuf::from("/tmp/fwd-delivery.log"));
        let delivery_log_json = env_bool("FWD_DELIVERY_LOG_JSON").unwrap_or(true);

        let rewrite_api_key = env_str("DEEPSEEK_API_KEY").and_then(non_empty);
        let rewrite_timeout =
            Duration::from_millis(env_u64("FWD_REWRITE_TIMEOUT_MS").unwrap_or(30_000));

        let defaults = ThrottleConfig::default();
        let throttle = ThrottleConfig {
            global_min_interval: env_u64("FWD_THROTTLE_GLOBAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.global_min_interval),
            per_chat_min_interval: env_u64("FWD_THROTTLE_PER_CHAT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.per_chat_min_interval),
        };

        if let Some(parent) = delivery_log_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            telegram_bot_token,
            settings_path,
            settings_poll_interval,
            delivery_log_path,
            delivery_log_json,
            rewrite_api_key,
            rewrite_timeout,
            throttle,
        })
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return &val[1..val.len() - 1];
    }
    val
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
