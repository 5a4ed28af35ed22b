//! Hot-reloadable forwarding settings.
//!
//! The settings file is JSON (`bot_config.json` by default) and keeps the
//! layout the bot has always used: `source_channels`, `target_channels`,
//! `forward_settings`, `notification_settings`, `paraphrase_rules` and
//! `deepseek_settings`. Missing keys take defaults; unknown keys are ignored.
//!
//! Every dispatch works on an `Arc<Settings>` snapshot. Reloading swaps the
//! whole snapshot, so a batch in flight never sees a half-applied edit.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    classify::ContentType,
    domain::{ChatId, UserId},
    Result,
};

const DEFAULT_REWRITE_PROMPT: &str = "You are a professional text rewriting assistant. \
Rewrite the user's text so it keeps the original meaning but uses different wording. \
Keep the original language. Return only the rewritten text without any explanation.";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub admins: Vec<UserId>,
    #[serde(rename = "source_channels")]
    pub sources: Vec<ChatId>,
    /// Destinations, in delivery order.
    #[serde(rename = "target_channels")]
    pub targets: Vec<ChatId>,
    #[serde(rename = "forward_settings")]
    pub forwarding: ForwardOptions,
    #[serde(rename = "notification_settings")]
    pub notifications: NotificationSettings,
    #[serde(rename = "paraphrase_rules", with = "ordered_rules")]
    pub substitutions: Vec<SubstitutionRule>,
    #[serde(rename = "deepseek_settings")]
    pub rewrite: RewriteSettings,
}

impl Settings {
    /// Whether captions must be rebuilt. When false, items are copied verbatim.
    pub fn needs_transform(&self) -> bool {
        self.rewrite.enabled || !self.substitutions.is_empty() || self.forwarding.add_source_info
    }

    pub fn is_source(&self, chat_id: ChatId) -> bool {
        self.sources.contains(&chat_id)
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admins.contains(&user_id)
    }

    /// Drop repeated destinations, keeping first occurrence order.
    fn normalized(mut self) -> Self {
        let mut seen = Vec::with_capacity(self.targets.len());
        self.targets.retain(|t| {
            if seen.contains(t) {
                return false;
            }
            seen.push(*t);
            true
        });
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardOptions {
    pub preserve_sender: bool,
    pub add_source_info: bool,
    pub filter_content_types: Vec<ContentType>,
    pub keyword_filter: Vec<String>,
    pub delay_seconds: f64,
    /// Debounce window for media groups, in seconds.
    pub media_group_timeout: f64,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self {
            preserve_sender: true,
            add_source_info: true,
            filter_content_types: Vec::new(),
            keyword_filter: Vec::new(),
            delay_seconds: 0.0,
            media_group_timeout: 3.0,
        }
    }
}

impl ForwardOptions {
    pub fn forward_delay(&self) -> Duration {
        seconds(self.delay_seconds)
    }

    pub fn group_debounce_window(&self) -> Duration {
        seconds(self.media_group_timeout)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub notify_admin_on_error: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            notify_admin_on_error: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubstitutionRule {
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteSettings {
    pub enabled: bool,
    /// Ignored when `DEEPSEEK_API_KEY` is set in the environment.
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for RewriteSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            system_prompt: DEFAULT_REWRITE_PROMPT.to_string(),
            max_tokens: 2000,
            temperature: 0.7,
        }
    }
}

fn seconds(v: f64) -> Duration {
    if !v.is_finite() || v <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(v).unwrap_or(Duration::ZERO)
}

/// `paraphrase_rules` is a JSON object whose key order is significant
/// (rules apply in sequence), so it is read entry by entry instead of
/// through a sorted map.
mod ordered_rules {
    use std::fmt;

    use serde::{
        de::{MapAccess, Visitor},
        ser::SerializeMap,
        Deserializer, Serializer,
    };

    use super::SubstitutionRule;

    #[allow(clippy::ptr_arg)]
    pub fn serialize<S: Serializer>(
        rules: &Vec<SubstitutionRule>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(rules.len()))?;
        for r in rules {
            map.serialize_entry(&r.from, &r.to)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Vec<SubstitutionRule>, D::Error> {
        struct RulesVisitor;

        impl<'de> Visitor<'de> for RulesVisitor {
            type Value = Vec<SubstitutionRule>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping text to its replacement")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some((from, to)) = access.next_entry::<String, String>()? {
                    out.push(SubstitutionRule { from, to });
                }
                Ok(out)
            }
        }

        d.deserialize_map(RulesVisitor)
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    let raw = fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&raw)?;
    Ok(settings.normalized())
}

pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    let data = serde_json::to_string_pretty(settings)?;
    fs::write(path, data)?;
    Ok(())
}

/// Holder of the current settings snapshot.
pub struct SettingsStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<Settings>>,
    last_modified: Mutex<Option<SystemTime>>,
}

impl SettingsStore {
    /// A store that is never reloaded from disk.
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(settings.normalized())),
            last_modified: Mutex::new(None),
        }
    }

    /// Load `path`, writing a default file first if it does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            info!(path = %path.display(), "settings file missing, writing defaults");
            write_settings(&path, &Settings::default())?;
        }

        let settings = load_settings(&path)?;
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();

        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(settings)),
            last_modified: Mutex::new(modified),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace(&self, settings: Settings) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(settings.normalized());
    }

    /// Re-read the settings file unconditionally.
    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let settings = load_settings(path)?;
        self.replace(settings);
        Ok(())
    }

    /// Re-read the settings file if its mtime moved. A file that fails to
    /// parse leaves the previous snapshot in place.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let modified = fs::metadata(path)?.modified()?;

        let mut last = self.last_modified.lock().unwrap_or_else(|e| e.into_inner());
        if *last == Some(modified) {
            return Ok(false);
        }

        // Only a successful parse marks the mtime as seen, so a file caught
        // mid-write is retried on the next poll.
        self.reload()?;
        *last = Some(modified);
        Ok(true)
    }

    /// Poll the settings file until `cancel` fires.
    pub fn spawn_watcher(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        match store.reload_if_changed() {
                            Ok(true) => info!("settings file changed, snapshot reloaded"),
                            Ok(false) => {}
                            Err(e) => warn!(error = %e, "settings reload failed, keeping previous snapshot"),
                        }
                    }
                }
            }
        })
    }
}
