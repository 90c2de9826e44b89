//! Wideband Monitor - Main Entry Point

use anyhow::Context;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wbl_monitor::{init_logging, MonitorConfig, OutputFormat, Snapshot};
use wbl_provider::{new_provider, LambdaProvider, ProviderState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let cfg = MonitorConfig::load(path.as_deref()).context("loading configuration")?;
    init_logging(&cfg.log_level, cfg.log_format);

    info!("=== WBL Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let Some(mut provider) = new_provider(&cfg.provider, None, cancel.clone())
        .await
        .context("starting wideband provider")?
    else {
        info!("No external wideband configured ({}), nothing to monitor", cfg.provider.vendor);
        return Ok(());
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_millis(cfg.interval_ms.max(10)));

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                match cfg.output {
                    OutputFormat::Text => println!("{}", provider.describe()),
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string(&Snapshot::capture(provider.as_ref()))?)
                    }
                }
                if provider.state() == ProviderState::Stopped {
                    warn!("{} provider stopped", provider.vendor());
                    break;
                }
            }
        }
    }

    cancel.cancel();
    provider.stop().await;
    Ok(())
}
