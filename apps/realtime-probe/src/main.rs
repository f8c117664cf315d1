//! Realtime probe entry point.
//!
//! Usage: `realtime-probe [CONFIG]`. Without an argument the config is read
//! from the platform config directory.

mod app;

use std::path::PathBuf;

use learnhub_realtime::RealtimeConfig;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,learnhub_realtime=debug")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting realtime probe");

    let path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => learnhub_realtime::config::default_config_path()
            .ok_or_else(|| anyhow::anyhow!("no config directory; pass a config path"))?,
    };
    let config = RealtimeConfig::load(&path)?;
    tracing::info!(path = %path.display(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("realtime probe shut down cleanly");
    Ok(())
}
