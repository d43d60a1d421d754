/// In-memory provider for feed tests
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use futures_util::stream::{self, StreamExt};

use crate::error::{FeedError, Result};
use crate::provider::{DataProvider, TradeStream};
use crate::types::{OhlcvCandle, Timeframe, TradeTick};

pub fn utc(hour: u32, minute: u32, second: u32) -> DateTime<Tz> {
    Tz::UTC.with_ymd_and_hms(2024, 1, 1, hour, minute, second).unwrap()
}

pub fn scenario_ticks() -> Vec<TradeTick> {
    vec![
        TradeTick::new("BTCUSDT", 100.0, 0.25, utc(15, 0, 0)).unwrap(),
        TradeTick::new("BTCUSDT", 102.0, 0.10, utc(15, 0, 30)).unwrap(),
        TradeTick::new("BTCUSDT", 101.5, 0.30, utc(15, 1, 0)).unwrap(),
    ]
}

/// Serves fixed backfill, then the scripted ticks, then stays open
pub struct MockProvider {
    ticks: Vec<TradeTick>,
    fail_backfill: bool,
    pub fetches: AtomicUsize,
    pub closed: AtomicBool,
    pub requested: Mutex<Vec<(String, Timeframe, usize)>>,
}

impl MockProvider {
    pub fn new(ticks: Vec<TradeTick>) -> Self {
        MockProvider {
            ticks,
            fail_backfill: false,
            fetches: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        MockProvider {
            fail_backfill: true,
            ..MockProvider::new(Vec::new())
        }
    }
}

#[async_trait]
impl DataProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<OhlcvCandle>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push((symbol.to_string(), timeframe, limit));
        if self.fail_backfill {
            return Err(FeedError::MalformedData("backfill rejected".to_string()));
        }

        let open_time = utc(12, 0, 0);
        Ok(vec![OhlcvCandle {
            symbol: symbol.to_string(),
            timeframe,
            open_time,
            close_time: open_time + timeframe.duration(),
            open: 90.0,
            high: 95.0,
            low: 85.0,
            close: 92.0,
            volume: 10.0,
        }])
    }

    fn stream_trades(&self, _symbol: &str) -> TradeStream {
        stream::iter(self.ticks.clone()).chain(stream::pending()).boxed()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
