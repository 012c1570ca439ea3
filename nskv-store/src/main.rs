use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nskv_store::StoreConfig;

/// Usage: `nskv-store [config.json]`
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {path}"))?;
            StoreConfig::from_json(&text).with_context(|| format!("invalid config {path}"))?
        }
        None => StoreConfig::default(),
    };

    nskv_store::run(config, async {
        tokio::signal::ctrl_c().await.ok();
        info!("received ctrl-c");
    })
    .await
    .context("store failed")
}
