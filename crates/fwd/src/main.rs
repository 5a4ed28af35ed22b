use std::sync::Arc;

use fwd_core::config::Config;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), fwd_core::Error> {
    fwd_core::logging::init("fwd")?;

    let cfg = Arc::new(Config::load()?);
    info!(
        settings = %cfg.settings_path.display(),
        delivery_log = %cfg.delivery_log_path.display(),
        "starting relay"
    );

    fwd_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| fwd_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
