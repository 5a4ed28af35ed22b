use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fwd_core::{
    config::Config,
    delivery_log::{DeliveryLog, FileDeliveryLog},
    dispatch::ForwardDispatcher,
    messaging::{
        port::ForwardSender,
        throttled::ThrottledSender,
    },
    notifier::AdminNotifier,
    relay::{run_dispatch_loop, Relay},
    settings::SettingsStore,
    stats::ForwardStats,
    text::TextProcessor,
};
use fwd_openai::ChatRewriter;

use crate::handlers;
use crate::{TelegramAdminNotifier, TelegramSender};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub relay: Arc<Relay>,
    pub stats: Arc<ForwardStats>,
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot started"),
        Err(e) => warn!(error = %e, "get_me failed; continuing"),
    }

    let settings = Arc::new(SettingsStore::load(&cfg.settings_path)?);
    {
        let snap = settings.snapshot();
        info!(
            path = %cfg.settings_path.display(),
            sources = snap.sources.len(),
            targets = snap.targets.len(),
            admins = snap.admins.len(),
            "settings loaded"
        );
        if snap.sources.is_empty() || snap.targets.is_empty() {
            warn!("no source or target chats configured; nothing will be forwarded");
        }
    }

    // Throttle outbound sends to reduce 429s when a batch fans out to many
    // destinations. The Telegram sender still retries once on RetryAfter.
    let raw_sender: Arc<dyn ForwardSender> = Arc::new(TelegramSender::new(bot.clone()));
    let sender: Arc<dyn ForwardSender> = Arc::new(ThrottledSender::new(raw_sender, cfg.throttle));
    let rewriter: Arc<dyn TextProcessor> = Arc::new(ChatRewriter::new(
        cfg.rewrite_api_key.clone(),
        cfg.rewrite_timeout,
    )?);
    let log: Arc<dyn DeliveryLog> = Arc::new(FileDeliveryLog::new(
        cfg.delivery_log_path.clone(),
        cfg.delivery_log_json,
    ));
    let notifier: Arc<dyn AdminNotifier> =
        Arc::new(TelegramAdminNotifier::new(bot.clone(), settings.clone()));
    let stats = Arc::new(ForwardStats::new());

    let dispatcher = Arc::new(
        ForwardDispatcher::new(sender, rewriter, log, notifier, stats.clone())
            .with_rewrite_timeout(cfg.rewrite_timeout),
    );
    let (relay, batches) = Relay::new(settings.clone(), stats.clone());

    let cancel = CancellationToken::new();
    let watcher = settings.spawn_watcher(cfg.settings_poll_interval, cancel.clone());
    let worker = tokio::spawn(run_dispatch_loop(
        batches,
        dispatcher,
        settings.clone(),
        cancel.clone(),
    ));

    let state = Arc::new(AppState {
        settings,
        relay: Arc::new(relay),
        stats,
    });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_channel_post().endpoint(handlers::handle_channel_post));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    cancel.cancel();
    let _ = watcher.await;
    let _ = worker.await;
    info!("bot stopped");
    Ok(())
}
