use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::{prelude::*, types::Message};
use tracing::{info, warn};

use fwd_core::{
    domain::UserId,
    settings::Settings,
    stats::{ContentTypeCount, StatsSnapshot},
};

use crate::router::AppState;

const HELP_TEXT: &str = "🤖 Channel forwarding bot\n\n\
Relays posts from the configured source chats to every target chat.\n\
Albums are kept together; captions can be rewritten and tagged with their source.\n\n\
📋 Commands:\n\
/start - Show this help message\n\
/help - Show this help message\n\
/getid - Show user and chat ids (reply to a forwarded post to get its origin)\n\
/status - Show forwarding counters and settings\n\
/stats - Show forwards per content type and the success rate (admins only)\n\
/reload - Re-read the settings file (admins only)\n\n\
💡 Sources, targets, filters and rewrite options live in the settings file.";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        return format!("{days}d {hours}h {mins}m");
    }
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}

fn on_off(v: bool) -> &'static str {
    if v {
        "✅"
    } else {
        "❌"
    }
}

fn status_text(
    stats: &StatsSnapshot,
    settings: &Settings,
    is_admin: bool,
    now: DateTime<Utc>,
) -> String {
    let uptime = format_duration((now - stats.started_at).num_seconds());
    [
        "📊 Bot status".to_string(),
        String::new(),
        format!("🕐 Uptime: {uptime}"),
        format!("📥 Received: {}", stats.received),
        format!("🚫 Filtered: {}", stats.filtered),
        format!("📤 Forwarded: {}", stats.forwarded),
        format!("🖼️ Media groups: {}", stats.media_groups),
        format!("❌ Failed: {}", stats.failed),
        String::new(),
        format!("📢 Sources: {}", settings.sources.len()),
        format!("🎯 Targets: {}", settings.targets.len()),
        format!("👥 Admins: {}", settings.admins.len()),
        String::new(),
        "⚙️ Settings:".to_string(),
        format!("• Delay: {}s", settings.forwarding.delay_seconds),
        format!("• Source info: {}", on_off(settings.forwarding.add_source_info)),
        format!("• AI rewrite: {}", on_off(settings.rewrite.enabled)),
        String::new(),
        format!("👤 You are admin: {}", on_off(is_admin)),
    ]
    .join("\n")
}

fn stats_text(counts: &[ContentTypeCount]) -> String {
    let mut lines = vec!["📈 Forwarding by content type".to_string(), String::new()];
    for c in counts {
        lines.push(format!(
            "• {}: {} forwarded, {} failed",
            c.content_type, c.forwarded, c.failed
        ));
    }

    let total: u64 = counts.iter().map(ContentTypeCount::total).sum();
    if total == 0 {
        lines.truncate(1);
        lines.push(String::new());
        lines.push("📭 Nothing forwarded yet".to_string());
        return lines.join("\n");
    }

    let forwarded: u64 = counts.iter().map(|c| c.forwarded).sum();
    lines.push(String::new());
    lines.push(format!(
        "✅ Success rate: {:.1}%",
        forwarded as f64 * 100.0 / total as f64
    ));
    lines.join("\n")
}

fn getid_text(msg: &Message) -> String {
    let mut lines = vec!["🆔 IDs".to_string(), String::new()];
    if let Some(user) = msg.from() {
        lines.push(format!("👤 Your user id: {}", user.id.0));
    }
    lines.push(format!("💬 This chat id: {}", msg.chat.id.0));

    if let Some(replied) = msg.reply_to_message() {
        if let Some(chat) = replied.forward_from_chat() {
            lines.push(String::new());
            lines.push("📤 Forwarded from:".to_string());
            lines.push(format!("• Chat id: {}", chat.id.0));
            lines.push(format!("• Title: {}", chat.title().unwrap_or("unknown")));
        } else if let Some(user) = replied.forward_from_user() {
            lines.push(String::new());
            lines.push("📤 Forwarded from:".to_string());
            lines.push(format!("• User id: {}", user.id.0));
            lines.push(format!("• Name: {}", user.full_name()));
        }
        if let Some(sender) = replied.from() {
            lines.push(String::new());
            lines.push(format!("📨 Replied message sender: {} ({})", sender.id.0, sender.full_name()));
        }
    }

    lines.push(String::new());
    lines.push("💡 Reply to a forwarded post with /getid to get its origin chat id.".to_string());
    lines.join("\n")
}

pub async fn handle_command(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));
    let (cmd, _arg) = parse_command(text);

    let reply = match cmd.as_str() {
        "start" | "help" => HELP_TEXT.to_string(),
        "getid" => getid_text(&msg),
        "status" => {
            let settings = state.settings.snapshot();
            let is_admin = user_id.is_some_and(|u| settings.is_admin(u));
            status_text(&state.stats.snapshot(), &settings, is_admin, Utc::now())
        }
        "stats" => {
            let settings = state.settings.snapshot();
            if !user_id.is_some_and(|u| settings.is_admin(u)) {
                "⛔ Only admins can view statistics.".to_string()
            } else {
                stats_text(&state.stats.by_content_type())
            }
        }
        "reload" => {
            let settings = state.settings.snapshot();
            if !user_id.is_some_and(|u| settings.is_admin(u)) {
                "⛔ Only admins can reload settings.".to_string()
            } else {
                match state.settings.reload() {
                    Ok(()) => {
                        let s = state.settings.snapshot();
                        info!(sources = s.sources.len(), targets = s.targets.len(), "settings reloaded by command");
                        format!(
                            "✅ Settings reloaded: {} sources, {} targets.",
                            s.sources.len(),
                            s.targets.len()
                        )
                    }
                    Err(e) => {
                        warn!(error = %e, "settings reload failed");
                        format!("❌ Reload failed, keeping previous settings: {e}")
                    }
                }
            }
        }
        _ => return Ok(()),
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}
