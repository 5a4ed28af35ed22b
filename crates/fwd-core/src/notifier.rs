use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{domain::ChatId, messaging::types::SourceChat, utils::display_timestamp};

/// A failed delivery, as reported to administrators.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryAlert {
    pub source: SourceChat,
    pub destination: ChatId,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryAlert {
    pub fn render(&self) -> String {
        format!(
            "❌ Forwarding failed\n\n📢 Source: {}\n🎯 Destination: {}\n⚠️ Error: {}\n⏰ Time: {}",
            self.source.display_name(),
            self.destination,
            self.error,
            display_timestamp(self.timestamp),
        )
    }
}

/// Best-effort administrator alerts. Implementations log and swallow their
/// own failures.
#[async_trait]
pub trait AdminNotifier: Send + Sync {
    async fn notify_error(&self, alert: &DeliveryAlert);
}
