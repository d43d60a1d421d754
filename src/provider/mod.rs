/// Exchange data providers
pub mod binance;
pub mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use chrono_tz::Tz;
use futures_util::stream::BoxStream;

use crate::error::{FeedError, Result};
use crate::types::{OhlcvCandle, Timeframe, TradeTick};
use crate::utils::RateLimiter;

pub use binance::BinanceProvider;
pub use stream::{BackoffPolicy, FrameStream, TungsteniteConnector, WsConnector};

/// Endless stream of live trades; dropping it stops the underlying connection
pub type TradeStream = BoxStream<'static, TradeTick>;

/// One exchange's market data surface
#[async_trait]
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One rate-limited backfill request, not retried
    async fn fetch_recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<OhlcvCandle>>;

    fn stream_trades(&self, symbol: &str) -> TradeStream;

    async fn close(&self);
}

/// Select a provider by name with the default REST quota
pub fn create_provider(name: &str, timezone: Tz) -> Result<Arc<dyn DataProvider>> {
    create_provider_with_limiter(name, timezone, None)
}

pub fn create_provider_with_limiter(
    name: &str,
    timezone: Tz,
    rate_limiter: Option<Arc<RateLimiter>>,
) -> Result<Arc<dyn DataProvider>> {
    match name.trim().to_lowercase().as_str() {
        "binance" => {
            let mut provider = BinanceProvider::new(timezone)?;
            if let Some(rate_limiter) = rate_limiter {
                provider = provider.with_rate_limiter(rate_limiter);
            }
            Ok(Arc::new(provider))
        }
        "bybit" => Err(FeedError::UnsupportedProvider("bybit is not implemented yet".to_string())),
        other => Err(FeedError::UnsupportedProvider(other.to_string())),
    }
}
