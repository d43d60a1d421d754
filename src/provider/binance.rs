/// Binance spot market data: REST kline backfill plus websocket trades
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use super::stream::{reconnecting_trades, BackoffPolicy, TungsteniteConnector, WsConnector};
use super::{DataProvider, TradeStream};
use crate::error::{FeedError, Result};
use crate::types::{OhlcvCandle, Timeframe};
use crate::utils::de::value_as_f64;
use crate::utils::time::from_epoch_millis;
use crate::utils::RateLimiter;

const REST_BASE_URL: &str = "https://api.binance.com";
const WS_BASE_URL: &str = "wss://stream.binance.com:9443";

/// Largest `limit` the klines endpoint accepts
pub const MAX_KLINE_LIMIT: usize = 1000;

pub const DEFAULT_MAX_CALLS: usize = 8;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

pub struct BinanceProvider {
    /// `None` once an owned client has been released by `close()`
    client: Mutex<Option<Client>>,
    owns_client: bool,
    rate_limiter: Arc<RateLimiter>,
    connector: Arc<dyn WsConnector>,
    rest_base: String,
    ws_base: String,
    timezone: Tz,
    backoff: BackoffPolicy,
}

impl BinanceProvider {
    pub fn new(timezone: Tz) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let mut provider = Self::with_http_client(client, timezone)?;
        provider.owns_client = true;
        Ok(provider)
    }

    /// Use a caller-owned HTTP client; `close()` leaves it untouched
    pub fn with_http_client(client: Client, timezone: Tz) -> Result<Self> {
        Ok(BinanceProvider {
            client: Mutex::new(Some(client)),
            owns_client: false,
            rate_limiter: Arc::new(RateLimiter::new(DEFAULT_MAX_CALLS, DEFAULT_PERIOD)?),
            connector: Arc::new(TungsteniteConnector),
            rest_base: REST_BASE_URL.to_string(),
            ws_base: WS_BASE_URL.to_string(),
            timezone,
            backoff: BackoffPolicy::default(),
        })
    }

    pub fn with_connector(mut self, connector: Arc<dyn WsConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_base_urls(mut self, rest_base: &str, ws_base: &str) -> Self {
        self.rest_base = rest_base.trim_end_matches('/').to_string();
        self.ws_base = ws_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn is_closed(&self) -> bool {
        self.lock_client().is_none()
    }

    fn lock_client(&self) -> MutexGuard<'_, Option<Client>> {
        self.client.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn trade_stream_url(&self, symbol: &str) -> String {
        format!("{}/ws/{}@trade", self.ws_base, symbol.trim().to_lowercase())
    }
}

#[async_trait]
impl DataProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<OhlcvCandle>> {
        if limit == 0 || limit > MAX_KLINE_LIMIT {
            return Err(FeedError::InvalidParameter(format!(
                "kline limit must be within 1..={}, got {}",
                MAX_KLINE_LIMIT, limit
            )));
        }

        let client = self
            .lock_client()
            .clone()
            .ok_or_else(|| FeedError::ProviderClosed("binance HTTP client is closed".to_string()))?;

        let symbol = symbol.trim().to_uppercase();
        self.rate_limiter.acquire().await;

        debug!("Fetching {} {} klines for {}", limit, timeframe, symbol);
        let response = client
            .get(format!("{}/api/v3/klines", self.rest_base))
            .query(&[
                ("symbol", symbol.clone()),
                ("interval", timeframe.as_str().to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        let candles = parse_klines(&body, &symbol, timeframe, self.timezone)?;

        debug!("Fetched {} {} candles for {}", candles.len(), timeframe, symbol);
        Ok(candles)
    }

    fn stream_trades(&self, symbol: &str) -> TradeStream {
        reconnecting_trades(
            Arc::clone(&self.connector),
            self.trade_stream_url(symbol),
            symbol.trim().to_uppercase(),
            self.timezone,
            self.backoff,
        )
    }

    async fn close(&self) {
        if !self.owns_client {
            return;
        }
        let released = self.lock_client().take();
        if released.is_some() {
            info!("Binance provider closed, HTTP client released");
        }
    }
}

/// Parse a klines response body.
///
/// Each row is `[openTimeMs, "open", "high", "low", "close", "volume", closeTimeMs, ...]`.
/// The candle's `close_time` is `open_time + timeframe` rather than the
/// exchange's inclusive close millisecond.
pub fn parse_klines(body: &str, symbol: &str, timeframe: Timeframe, tz: Tz) -> Result<Vec<OhlcvCandle>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;

    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            if row.len() < 6 {
                return Err(FeedError::MalformedData(format!(
                    "kline row {} has {} fields, expected at least 6",
                    index,
                    row.len()
                )));
            }

            let open_ms = row[0]
                .as_i64()
                .ok_or_else(|| FeedError::MalformedData(format!("kline row {} has no open time", index)))?;
            let field = |i: usize, name: &str| {
                value_as_f64(&row[i])
                    .ok_or_else(|| FeedError::MalformedData(format!("kline row {} has invalid {}", index, name)))
            };

            let open_time = from_epoch_millis(open_ms, tz)?;
            Ok(OhlcvCandle {
                symbol: symbol.to_string(),
                timeframe,
                open_time,
                close_time: open_time + timeframe.duration(),
                open: field(1, "open")?,
                high: field(2, "high")?,
                low: field(3, "low")?,
                close: field(4, "close")?,
                volume: field(5, "volume")?,
            })
        })
        .collect()
}
