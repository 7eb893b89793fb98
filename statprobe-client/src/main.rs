#![forbid(unsafe_code)]

use log::LevelFilter;
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

use crate::{config::PollerConfig, fetch::HttpStatsSource, poller::Poller};

mod config;
mod fetch;
mod http_util;
mod poller;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;

    let cfg = PollerConfig::default();
    log::debug!("Poller config: {cfg:#?}");

    let source = HttpStatsSource::try_new(&cfg.url, cfg.timeout)?;
    let mut poller = Poller::new(source, &cfg);

    let shutdown_token = CancellationToken::new();
    tokio::spawn({
        let shutdown_token = shutdown_token.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::warn!("failed to listen for ctrl-c: {e}");
                return;
            }
            log::info!("received ctrl-c, shutting down");
            shutdown_token.cancel();
        }
    });

    log::info!("polling {} every {:?}", cfg.url, cfg.interval);
    poller.run(shutdown_token).await;

    Ok(())
}
