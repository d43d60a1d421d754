/// Live market data feed: backfill, streaming ingestion and snapshots
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono_tz::Tz;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::data::{OhlcvAggregator, TickBuffer};
use crate::error::{FeedError, Result};
use crate::provider::{create_provider_with_limiter, DataProvider, TradeStream};
use crate::types::{FeedConfig, OhlcvCandle, Timeframe, TradeTick};
use crate::utils::time::{parse_timezone, DEFAULT_TIMEZONE};
use crate::utils::RateLimiter;

const TICK_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub symbol: String,
    pub timeframes: Vec<Timeframe>,
    /// Candles backfilled and retained per timeframe
    pub history_limit: usize,
    pub tick_buffer_size: usize,
    pub timezone: Tz,
}

impl Default for FeedOptions {
    fn default() -> Self {
        FeedOptions {
            symbol: "BTCUSDT".to_string(),
            timeframes: Timeframe::all().to_vec(),
            history_limit: 500,
            tick_buffer_size: 1000,
            timezone: DEFAULT_TIMEZONE,
        }
    }
}

impl FeedOptions {
    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        Ok(FeedOptions {
            symbol: config.symbol.trim().to_uppercase(),
            timeframes: config.timeframes.clone(),
            history_limit: config.history_limit,
            tick_buffer_size: config.tick_buffer_size,
            timezone: parse_timezone(&config.timezone)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Stopped,
    Starting,
    Running,
}

/// Point-in-time copy of the feed
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    pub symbol: String,
    pub latest_tick: Option<TradeTick>,
    pub recent_ticks: Vec<TradeTick>,
    pub ohlcv: BTreeMap<Timeframe, Vec<OhlcvCandle>>,
}

struct FeedState {
    aggregator: OhlcvAggregator,
    ticks: TickBuffer,
    latest: Option<TradeTick>,
}

impl FeedState {
    fn apply(&mut self, tick: TradeTick) -> Result<TradeTick> {
        let tick = tick.with_timezone(self.aggregator.timezone());
        self.aggregator.update(&tick)?;
        self.latest = Some(tick.clone());
        self.ticks.push(tick.clone());
        Ok(tick)
    }
}

/// Handles shared between the service and its streaming task
#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<FeedState>>,
    status_tx: Arc<watch::Sender<FeedStatus>>,
    tick_tx: broadcast::Sender<TradeTick>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: FeedStatus) {
        self.status_tx.send_replace(status);
    }

    fn record_error(&self, message: String) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
    }
}

/// Provider plus aggregator run as one queryable unit.
///
/// The aggregator, tick buffer and latest tick sit behind a short-lived
/// `std::sync::Mutex` that is never held across an `.await`.
pub struct DataFeedService {
    options: FeedOptions,
    provider: Arc<dyn DataProvider>,
    shared: Shared,
    task: tokio::sync::Mutex<Option<JoinHandle<Result<()>>>>,
}

impl DataFeedService {
    pub fn new(options: FeedOptions, provider: Arc<dyn DataProvider>) -> Self {
        let symbol = options.symbol.trim().to_uppercase();
        let aggregator = OhlcvAggregator::new(&symbol, &options.timeframes, options.history_limit, options.timezone);
        let (status_tx, _) = watch::channel(FeedStatus::Stopped);
        let (tick_tx, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);

        DataFeedService {
            shared: Shared {
                state: Arc::new(Mutex::new(FeedState {
                    aggregator,
                    ticks: TickBuffer::new(options.tick_buffer_size),
                    latest: None,
                })),
                status_tx: Arc::new(status_tx),
                tick_tx,
                last_error: Arc::new(Mutex::new(None)),
            },
            options: FeedOptions { symbol, ..options },
            provider,
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Build the feed and its provider from configuration
    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        let options = FeedOptions::from_config(config)?;
        let rate_limiter = RateLimiter::new(
            config.rate_limit_max_calls,
            std::time::Duration::from_millis(config.rate_limit_period_ms),
        )?;
        let provider = create_provider_with_limiter(&config.provider, options.timezone, Some(Arc::new(rate_limiter)))?;
        Ok(DataFeedService::new(options, provider))
    }

    pub fn symbol(&self) -> &str {
        &self.options.symbol
    }

    pub fn timezone(&self) -> Tz {
        self.options.timezone
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.options.timeframes
    }

    pub fn status(&self) -> FeedStatus {
        *self.shared.status_tx.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<FeedStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Live ticks as they are folded, already in the feed timezone
    pub fn subscribe_ticks(&self) -> broadcast::Receiver<TradeTick> {
        self.shared.tick_tx.subscribe()
    }

    /// Message of the failure that stopped the streaming task, if any
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Backfill every timeframe, then launch the streaming task.
    ///
    /// Does nothing while already running. Any backfill failure aborts the
    /// start and leaves the feed stopped.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        if self.status() == FeedStatus::Running && task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Feed for {} already running", self.options.symbol);
            return Ok(());
        }
        if let Some(finished) = task.take() {
            finished.abort();
        }

        info!("🚀 Starting market data feed for {} via {}", self.options.symbol, self.provider.name());
        self.shared.set_status(FeedStatus::Starting);

        if let Err(e) = self.backfill().await {
            error!("Backfill failed for {}: {} ({})", self.options.symbol, e, e.error_code());
            self.shared.set_status(FeedStatus::Stopped);
            return Err(e);
        }

        *self.shared.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let trades = self.provider.stream_trades(&self.options.symbol);
        self.shared.set_status(FeedStatus::Running);
        *task = Some(tokio::spawn(run_stream(trades, self.shared.clone())));

        info!("✅ Market data feed running for {}", self.options.symbol);
        Ok(())
    }

    /// Cancel the streaming task and close the provider; safe to call at any time
    pub async fn stop(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Streaming task had already failed: {}", e),
                Err(e) if e.is_cancelled() => debug!("Streaming task cancelled"),
                Err(e) => warn!("Streaming task ended abnormally: {}", e),
            }
        }

        self.provider.close().await;
        if self.status() != FeedStatus::Stopped {
            info!("🛑 Market data feed stopped for {}", self.options.symbol);
        }
        self.shared.set_status(FeedStatus::Stopped);
    }

    /// `max_ticks` bounds `recent_ticks`; `None` returns the whole buffer
    pub fn snapshot(&self, max_ticks: Option<usize>) -> FeedSnapshot {
        let state = self.shared.lock_state();
        let recent_ticks = match max_ticks {
            Some(n) => state.ticks.get_recent(n),
            None => state.ticks.get_all(),
        };

        FeedSnapshot {
            symbol: self.options.symbol.clone(),
            latest_tick: state.latest.clone(),
            recent_ticks,
            ohlcv: Self::collect_candles(&state.aggregator),
        }
    }

    /// Current candles per timeframe, e.g. for seeding a `MarketDataManager`
    pub fn candles(&self) -> BTreeMap<Timeframe, Vec<OhlcvCandle>> {
        Self::collect_candles(&self.shared.lock_state().aggregator)
    }

    /// Candles plus a tick subscription taken atomically.
    ///
    /// Every tick received afterwards is absent from the returned candles.
    pub fn subscribe_with_candles(&self) -> (BTreeMap<Timeframe, Vec<OhlcvCandle>>, broadcast::Receiver<TradeTick>) {
        let state = self.shared.lock_state();
        (Self::collect_candles(&state.aggregator), self.shared.tick_tx.subscribe())
    }

    fn collect_candles(aggregator: &OhlcvAggregator) -> BTreeMap<Timeframe, Vec<OhlcvCandle>> {
        aggregator
            .timeframes()
            .iter()
            .map(|tf| (*tf, aggregator.get_candles(*tf)))
            .collect()
    }

    async fn backfill(&self) -> Result<()> {
        let mut fetched = Vec::with_capacity(self.options.timeframes.len());
        for timeframe in &self.options.timeframes {
            let candles = self
                .provider
                .fetch_recent_candles(&self.options.symbol, *timeframe, self.options.history_limit)
                .await?;
            info!("📥 Backfilled {} {} candles for {}", candles.len(), timeframe, self.options.symbol);
            fetched.push((*timeframe, candles));
        }

        let mut state = self.shared.lock_state();
        for (timeframe, candles) in fetched {
            state.aggregator.seed(timeframe, candles)?;
        }
        state.ticks.clear();
        state.latest = None;
        Ok(())
    }
}

/// Fold every streamed tick; an aggregation failure stops the feed
async fn run_stream(mut trades: TradeStream, shared: Shared) -> Result<()> {
    while let Some(tick) = trades.next().await {
        let applied = {
            let mut state = shared.lock_state();
            // Published under the lock so `subscribe_with_candles` never sees a tick twice
            state.apply(tick).map(|tick| {
                let _ = shared.tick_tx.send(tick);
            })
        };
        if let Err(e) = applied {
            error!("Streaming task failed: {} ({})", e, e.error_code());
            shared.record_error(e.to_string());
            shared.set_status(FeedStatus::Stopped);
            return Err(e);
        }
    }

    warn!("Trade stream ended unexpectedly");
    shared.record_error("trade stream ended".to_string());
    shared.set_status(FeedStatus::Stopped);
    Err(FeedError::StreamTaskFailed("trade stream ended".to_string()))
}
