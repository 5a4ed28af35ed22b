//! Telegram update handlers.
//!
//! Messages and channel posts from configured source chats are mapped into
//! `IncomingItem`s and handed to the relay. Commands are answered here and
//! never relayed.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};
use tracing::debug;

use fwd_core::domain::ChatId;

use crate::router::AppState;

mod commands;
mod incoming;

pub use incoming::to_incoming;

fn is_command(msg: &Message) -> bool {
    msg.text().is_some_and(|t| t.starts_with('/'))
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if is_command(&msg) {
        return commands::handle_command(bot, msg, state).await;
    }
    relay_if_source(&msg, &state).await;
    Ok(())
}

pub async fn handle_channel_post(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if is_command(&msg) {
        return Ok(());
    }
    relay_if_source(&msg, &state).await;
    Ok(())
}

async fn relay_if_source(msg: &Message, state: &AppState) {
    let chat_id = ChatId(msg.chat.id.0);
    if !state.settings.snapshot().is_source(chat_id) {
        return;
    }

    let item = to_incoming(msg);
    let item_id = item.item_id;
    let outcome = state.relay.submit(item).await;
    debug!(source = %chat_id, item_id = %item_id, outcome = ?outcome, "item submitted");
}
