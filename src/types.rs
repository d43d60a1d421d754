/// Core type definitions for the market data feed
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};
use crate::utils::time::serialize_rfc3339;

/// Candle bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Timeframe {
    OneMinute,
    FiveMinute,
    FifteenMinute,
    OneHour,
    FourHour,
    OneDay,
}

impl Timeframe {
    /// Exchange interval label
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1m",
            Timeframe::FiveMinute => "5m",
            Timeframe::FifteenMinute => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::OneMinute => Duration::minutes(1),
            Timeframe::FiveMinute => Duration::minutes(5),
            Timeframe::FifteenMinute => Duration::minutes(15),
            Timeframe::OneHour => Duration::hours(1),
            Timeframe::FourHour => Duration::hours(4),
            Timeframe::OneDay => Duration::days(1),
        }
    }

    /// Default sequence of timeframes to aggregate, shortest first
    pub fn all() -> [Timeframe; 6] {
        [
            Timeframe::OneMinute,
            Timeframe::FiveMinute,
            Timeframe::FifteenMinute,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        Timeframe::all()
            .into_iter()
            .find(|tf| tf.as_str() == s.trim())
            .ok_or_else(|| FeedError::UnknownTimeframe(s.to_string()))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Timeframe> for &'static str {
    fn from(tf: Timeframe) -> Self {
        tf.as_str()
    }
}

/// Single trade observed on the exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeTick {
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub timestamp: DateTime<Tz>,
}

impl TradeTick {
    pub fn new(symbol: impl Into<String>, price: f64, quantity: f64, timestamp: DateTime<Tz>) -> Result<Self> {
        let tick = TradeTick {
            symbol: symbol.into(),
            price,
            quantity,
            timestamp,
        };
        tick.validate()?;
        Ok(tick)
    }

    /// Price must be positive and quantity non-negative, both finite
    pub fn validate(&self) -> Result<()> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(FeedError::InvalidParameter(format!(
                "Trade price must be positive, got {}",
                self.price
            )));
        }
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return Err(FeedError::InvalidParameter(format!(
                "Trade quantity must be non-negative, got {}",
                self.quantity
            )));
        }
        Ok(())
    }

    pub fn with_timezone(&self, tz: Tz) -> TradeTick {
        TradeTick {
            timestamp: self.timestamp.with_timezone(&tz),
            ..self.clone()
        }
    }
}

/// OHLCV candle for one timeframe bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OhlcvCandle {
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub open_time: DateTime<Tz>,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub close_time: DateTime<Tz>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcvCandle {
    /// Open a new bucket from its first trade
    pub fn from_tick(timeframe: Timeframe, open_time: DateTime<Tz>, symbol: &str, tick: &TradeTick) -> Self {
        OhlcvCandle {
            symbol: symbol.to_string(),
            timeframe,
            close_time: open_time + timeframe.duration(),
            open_time,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.quantity,
        }
    }

    /// Fold another trade from the same bucket
    pub fn apply_trade(&mut self, price: f64, quantity: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += quantity;
        self.close_time = self.open_time + self.timeframe.duration();
    }

    pub fn with_timezone(&self, tz: Tz) -> OhlcvCandle {
        OhlcvCandle {
            open_time: self.open_time.with_timezone(&tz),
            close_time: self.close_time.with_timezone(&tz),
            ..self.clone()
        }
    }
}

/// Configuration for the market data feed
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,

    // Retention
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_tick_buffer_size")]
    pub tick_buffer_size: usize,

    // Display timezone (IANA name)
    #[serde(default = "default_timezone")]
    pub timezone: String,

    // Persistence
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    // Rate Limiting
    #[serde(default = "default_rate_limit_max_calls")]
    pub rate_limit_max_calls: usize,
    #[serde(default = "default_rate_limit_period_ms")]
    pub rate_limit_period_ms: u64,

    // Logging
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            enabled: default_enabled(),
            provider: default_provider(),
            symbol: default_symbol(),
            timeframes: default_timeframes(),
            history_limit: default_history_limit(),
            tick_buffer_size: default_tick_buffer_size(),
            timezone: default_timezone(),
            persist_path: None,
            refresh_interval_secs: default_refresh_interval_secs(),
            rate_limit_max_calls: default_rate_limit_max_calls(),
            rate_limit_period_ms: default_rate_limit_period_ms(),
            log_level: default_log_level(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_provider() -> String {
    "binance".to_string()
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_timeframes() -> Vec<Timeframe> {
    Timeframe::all().to_vec()
}

fn default_history_limit() -> usize {
    500
}

fn default_tick_buffer_size() -> usize {
    1000
}

fn default_timezone() -> String {
    "America/Argentina/Buenos_Aires".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_rate_limit_max_calls() -> usize {
    8
}

fn default_rate_limit_period_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}
