/// Thread-safe, persisted candle state for synchronous readers
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono_tz::Tz;
use tracing::{debug, info, warn};

use super::aggregator::OhlcvAggregator;
use super::state_store::{self, StateSnapshot};
use crate::error::{FeedError, Result};
use crate::scheduler::Scheduler;
use crate::types::{OhlcvCandle, Timeframe, TradeTick};
use crate::utils::time::DEFAULT_TIMEZONE;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub symbol: String,
    pub timeframes: Vec<Timeframe>,
    pub history_limit: usize,
    pub timezone: Tz,
    /// Persistence is disabled when unset
    pub persist_path: Option<PathBuf>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        ManagerOptions {
            symbol: "BTCUSDT".to_string(),
            timeframes: Timeframe::all().to_vec(),
            history_limit: 500,
            timezone: DEFAULT_TIMEZONE,
            persist_path: None,
        }
    }
}

struct Inner {
    aggregator: OhlcvAggregator,
    cache: BTreeMap<Timeframe, Vec<OhlcvCandle>>,
}

/// Locked facade over an [`OhlcvAggregator`] with a read cache and disk snapshot.
///
/// Every mutation resyncs the cache (truncated to `history_limit`) and then
/// writes the state file before the lock is released. Reads only touch the
/// cache.
pub struct MarketDataManager {
    symbol: String,
    timezone: Tz,
    history_limit: usize,
    persist_path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl MarketDataManager {
    /// Build the manager, reseeding from the state file when one exists
    pub fn new(options: ManagerOptions) -> Result<Self> {
        if options.history_limit == 0 {
            return Err(FeedError::InvalidParameter("history_limit must be positive".to_string()));
        }
        if options.timeframes.is_empty() {
            return Err(FeedError::InvalidParameter("at least one timeframe is required".to_string()));
        }

        let symbol = options.symbol.trim().to_uppercase();
        let mut aggregator =
            OhlcvAggregator::new(&symbol, &options.timeframes, options.history_limit, options.timezone);

        if let Some(path) = options.persist_path.as_deref() {
            let restored = state_store::load(path, &symbol, options.timezone);
            for (timeframe, candles) in restored {
                if !aggregator.timeframes().contains(&timeframe) {
                    debug!("Ignoring persisted {} candles (not configured)", timeframe);
                    continue;
                }
                let count = candles.len();
                aggregator.seed(timeframe, candles)?;
                info!("📂 Restored {} {} candles from {}", count, timeframe, path.display());
            }
        }

        let manager = MarketDataManager {
            symbol,
            timezone: options.timezone,
            history_limit: options.history_limit,
            persist_path: options.persist_path,
            inner: Mutex::new(Inner {
                aggregator,
                cache: BTreeMap::new(),
            }),
        };

        {
            let mut inner = manager.lock();
            manager.sync_cache(&mut inner);
        }
        Ok(manager)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn timeframes(&self) -> Vec<Timeframe> {
        self.lock().aggregator.timeframes().to_vec()
    }

    pub fn seed(&self, timeframe: Timeframe, candles: Vec<OhlcvCandle>) -> Result<()> {
        let mut inner = self.lock();
        inner.aggregator.seed(timeframe, candles)?;
        self.commit(&mut inner);
        Ok(())
    }

    /// Seed several timeframes under one lock and one write.
    ///
    /// All or nothing: if any entry is rejected the current state is kept.
    pub fn seed_batch(&self, batch: impl IntoIterator<Item = (Timeframe, Vec<OhlcvCandle>)>) -> Result<()> {
        let mut inner = self.lock();
        let mut staged = inner.aggregator.clone();
        for (timeframe, candles) in batch {
            staged.seed(timeframe, candles)?;
        }
        inner.aggregator = staged;
        self.commit(&mut inner);
        Ok(())
    }

    pub fn ingest_tick(&self, tick: &TradeTick) -> Result<()> {
        let tick = tick.with_timezone(self.timezone);
        let mut inner = self.lock();
        inner.aggregator.update(&tick)?;
        self.commit(&mut inner);
        Ok(())
    }

    /// Resync and persist without new data, so slow timeframes track wall-clock progress
    pub fn refresh_higher_timeframes(&self) {
        let mut inner = self.lock();
        self.commit(&mut inner);
        debug!("Refreshed cached candles for {}", self.symbol);
    }

    /// Register the periodic refresh with `scheduler`.
    ///
    /// The callback holds a weak handle, so it becomes a no-op once the
    /// manager is dropped.
    pub fn attach_scheduler(self: &Arc<Self>, scheduler: &dyn Scheduler) {
        let handle: Weak<Self> = Arc::downgrade(self);
        scheduler.register(Arc::new(move || {
            if let Some(manager) = handle.upgrade() {
                manager.refresh_higher_timeframes();
            }
        }));
    }

    pub fn get_latest(&self, timeframe: Timeframe) -> Option<OhlcvCandle> {
        self.lock().cache.get(&timeframe).and_then(|c| c.last().cloned())
    }

    /// Newest `limit` candles, oldest first; all cached candles when `limit` is `None`
    pub fn get_slice(&self, timeframe: Timeframe, limit: Option<usize>) -> Vec<OhlcvCandle> {
        let inner = self.lock();
        let Some(candles) = inner.cache.get(&timeframe) else {
            return Vec::new();
        };
        let start = limit.map_or(0, |n| candles.len().saturating_sub(n));
        candles[start..].to_vec()
    }

    /// Highest high over the last `window` candles
    pub fn get_rolling_high(&self, timeframe: Timeframe, window: usize) -> Result<Option<f64>> {
        let candles = self.rolling_window(timeframe, window)?;
        Ok(candles.iter().map(|c| c.high).reduce(f64::max))
    }

    /// Lowest low over the last `window` candles
    pub fn get_rolling_low(&self, timeframe: Timeframe, window: usize) -> Result<Option<f64>> {
        let candles = self.rolling_window(timeframe, window)?;
        Ok(candles.iter().map(|c| c.low).reduce(f64::min))
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.lock();
        self.build_snapshot(&inner)
    }

    fn rolling_window(&self, timeframe: Timeframe, window: usize) -> Result<Vec<OhlcvCandle>> {
        if window == 0 {
            return Err(FeedError::InvalidParameter("window must be positive".to_string()));
        }
        Ok(self.get_slice(timeframe, Some(window)))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, inner: &mut Inner) {
        self.sync_cache(inner);
        self.persist(inner);
    }

    fn sync_cache(&self, inner: &mut Inner) {
        let timeframes = inner.aggregator.timeframes().to_vec();
        for timeframe in timeframes {
            let mut candles = inner.aggregator.get_candles(timeframe);
            let excess = candles.len().saturating_sub(self.history_limit);
            candles.drain(..excess);
            inner.cache.insert(timeframe, candles);
        }
    }

    fn build_snapshot(&self, inner: &Inner) -> StateSnapshot {
        StateSnapshot {
            symbol: self.symbol.clone(),
            timeframes: inner.cache.clone(),
        }
    }

    fn persist(&self, inner: &Inner) {
        let Some(path) = self.persist_path.as_deref() else {
            return;
        };
        if let Err(e) = state_store::save_atomic(path, &self.build_snapshot(inner)) {
            warn!("Failed to persist {} state to {}: {} ({})", self.symbol, path.display(), e, e.error_code());
        }
    }
}
