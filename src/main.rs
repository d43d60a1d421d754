/// Main entry point for the candle feed
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use candlefeed::{
    config::load_config,
    data::{ManagerOptions, MarketDataManager},
    feed::{spawn_state_mirror, DataFeedService, FeedStatus},
    scheduler::IntervalScheduler,
    utils::parse_timezone,
    FeedConfig,
};

/// Application state
pub struct FeedApp {
    feed: Arc<DataFeedService>,
    manager: Option<Arc<MarketDataManager>>,
    scheduler: IntervalScheduler,
}

impl FeedApp {
    pub fn new(config: &FeedConfig) -> anyhow::Result<Self> {
        let feed = Arc::new(DataFeedService::from_config(config).context("failed to build market data feed")?);

        // Persisted candle state only when a path is configured
        let manager = match &config.persist_path {
            Some(path) => {
                let manager = MarketDataManager::new(ManagerOptions {
                    symbol: config.symbol.clone(),
                    timeframes: config.timeframes.clone(),
                    history_limit: config.history_limit,
                    timezone: parse_timezone(&config.timezone)?,
                    persist_path: Some(path.clone()),
                })?;
                info!("State manager persisting to {}", path.display());
                Some(Arc::new(manager))
            }
            None => None,
        };

        Ok(FeedApp {
            feed,
            manager,
            scheduler: IntervalScheduler::new(Duration::from_secs(config.refresh_interval_secs)),
        })
    }

    /// Run until Ctrl+C or until the feed stops on its own
    pub async fn run(&self) -> anyhow::Result<()> {
        self.feed.start().await.context("market data feed failed to start")?;

        if let Some(manager) = &self.manager {
            spawn_state_mirror(&self.feed, Arc::clone(manager))?;
            manager.attach_scheduler(&self.scheduler);
            self.scheduler.start();
        }

        let mut status = self.feed.status_changes();
        let outcome = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received - initiating graceful shutdown");
                signal.context("failed to listen for Ctrl+C")
            }
            _ = status.wait_for(|s| *s == FeedStatus::Stopped) => {
                let reason = self.feed.last_error().unwrap_or_else(|| "unknown".to_string());
                error!("Market data feed stopped: {}", reason);
                Err(anyhow!("market data feed stopped: {}", reason))
            }
        };

        self.shutdown().await;
        outcome
    }

    async fn shutdown(&self) {
        info!("Starting shutdown sequence...");
        self.scheduler.shutdown().await;
        self.feed.stop().await;
        if let Some(manager) = &self.manager {
            manager.refresh_higher_timeframes();
        }
        info!("Shutdown sequence completed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("candlefeed={},info", config.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !config.enabled {
        info!("Market data feed disabled by configuration");
        return Ok(());
    }

    info!("Starting candle feed for {} ({})", config.symbol, config.provider);
    let app = FeedApp::new(&config)?;
    app.run().await
}
