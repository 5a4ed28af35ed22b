use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::warn;

use crate::{
    batch::BatchMetadata,
    dispatch::DestinationResult,
    domain::{ChatId, MessageId},
    errors::Error,
    utils::{iso_timestamp_utc, truncate_text},
    Result,
};

const LOG_MAX_TEXT: usize = 500;

/// Sink for one row per (batch, destination) outcome.
///
/// Implementations must swallow their own failures: a broken log never
/// affects delivery.
pub trait DeliveryLog: Send + Sync {
    fn record(&self, result: &DestinationResult, meta: &BatchMetadata);
}

#[derive(Clone, Debug, Serialize)]
pub struct DeliveryRecord {
    pub timestamp: String,
    pub source_chat_id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    pub destination: ChatId,
    pub success: bool,
    pub delivered: usize,
    pub item_ids: Vec<MessageId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forwarded_ids: Vec<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub content_types: String,
    pub is_media_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryRecord {
    pub fn new(result: &DestinationResult, meta: &BatchMetadata) -> Self {
        let content_types = meta
            .content_types
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",");
        Self {
            timestamp: iso_timestamp_utc(),
            source_chat_id: meta.source_chat_id,
            source_title: meta.source_title.clone(),
            destination: result.destination,
            success: result.success,
            delivered: result.delivered,
            item_ids: meta.item_ids.clone(),
            forwarded_ids: result.forwarded_ids.clone(),
            group_id: meta.group_id.clone(),
            content_types,
            is_media_group: meta.is_media_group,
            error: result.error.as_deref().map(|e| truncate_text(e, LOG_MAX_TEXT)),
        }
    }
}

/// Append-only delivery log: JSON lines, or a readable block per row.
#[derive(Clone, Debug)]
pub struct FileDeliveryLog {
    path: PathBuf,
    json: bool,
}

impl FileDeliveryLog {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, record: &DeliveryRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(record)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "delivery record is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

impl DeliveryLog for FileDeliveryLog {
    fn record(&self, result: &DestinationResult, meta: &BatchMetadata) {
        if let Err(e) = self.write(&DeliveryRecord::new(result, meta)) {
            warn!(path = %self.path.display(), error = %e, "failed to write delivery log");
        }
    }
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}
