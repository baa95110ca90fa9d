use anyhow::Result;
use std::sync::Arc;
use ticker_stream::{StreamClient, StreamConfig, utils};
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = StreamConfig::from_env()?;
    tracing::info!(
        url = %config.ws_url,
        instruments = ?config.tracked_instruments,
        quote = %config.quote_asset,
        "[INIT] ticker-stream starting"
    );

    let exhausted = Arc::new(Notify::new());
    let mut client = {
        let exhausted = Arc::clone(&exhausted);
        StreamClient::new(config)?.on_exhausted(move |attempts| {
            tracing::error!(attempts, "[FEED] reconnect attempts exhausted");
            exhausted.notify_one();
        })
    };

    client.start(|update| match serde_json::to_string(&update) {
        Ok(json) => tracing::info!(update = %json, "[TICK]"),
        Err(e) => tracing::warn!(error = %e, "[TICK] failed to serialize update"),
    })?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("[INIT] interrupt received, shutting down");
        }
        _ = exhausted.notified() => {}
    }

    client.stop();
    Ok(())
}
