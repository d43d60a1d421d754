/// Self-healing websocket trade stream
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use super::TradeStream;
use crate::error::{FeedError, Result};
use crate::types::TradeTick;
use crate::utils::de::number_or_string;
use crate::utils::time::from_epoch_millis;

/// Text frames of one websocket connection; an `Err` item ends the connection
pub type FrameStream = BoxStream<'static, Result<String>>;

/// Opens a websocket connection and yields its text frames
#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FrameStream>;
}

pub struct TungsteniteConnector;

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| FeedError::WebSocketError(format!("Connection failed: {}", e)))?;

        let frames = ws_stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(frame)) => Some(Err(FeedError::WebSocketDisconnected(format!(
                    "closed by server: {:?}",
                    frame
                )))),
                // Pings are answered by tungstenite itself
                Ok(_) => None,
                Err(e) => Some(Err(FeedError::WebSocketError(e.to_string()))),
            })
        });

        Ok(frames.boxed())
    }
}

/// Exponential reconnect delay: `initial`, doubling, never above `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Binance `<symbol>@trade` payload
#[derive(Debug, Deserialize)]
struct TradeMessage {
    #[serde(rename = "p", deserialize_with = "number_or_string")]
    price: f64,
    #[serde(rename = "q", deserialize_with = "number_or_string")]
    quantity: f64,
    #[serde(rename = "T")]
    trade_time: i64,
}

/// Decode one trade frame into a tick expressed in `tz`
pub fn decode_trade(text: &str, symbol: &str, tz: Tz) -> Result<TradeTick> {
    let msg: TradeMessage = serde_json::from_str(text)?;
    let timestamp = from_epoch_millis(msg.trade_time, tz)?;
    TradeTick::new(symbol, msg.price, msg.quantity, timestamp)
}

struct ReconnectState {
    connector: Arc<dyn WsConnector>,
    url: String,
    symbol: String,
    timezone: Tz,
    backoff: BackoffPolicy,
    delay: Duration,
    frames: Option<FrameStream>,
}

impl ReconnectState {
    async fn wait_and_back_off(&mut self) {
        debug!("Reconnecting to {} in {:?}", self.url, self.delay);
        tokio::time::sleep(self.delay).await;
        self.delay = self.backoff.next(self.delay);
    }
}

/// Endless tick stream that reconnects with backoff after any connection failure.
///
/// The stream never ends by itself. Dropping it cancels any pending read or
/// backoff sleep.
pub fn reconnecting_trades(
    connector: Arc<dyn WsConnector>,
    url: String,
    symbol: String,
    timezone: Tz,
    backoff: BackoffPolicy,
) -> TradeStream {
    let state = ReconnectState {
        connector,
        url,
        symbol,
        timezone,
        backoff,
        delay: backoff.initial,
        frames: None,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.frames.is_none() {
                match state.connector.connect(&state.url).await {
                    Ok(frames) => {
                        info!("✅ Trade stream connected: {}", state.url);
                        state.frames = Some(frames);
                        state.delay = state.backoff.initial;
                    }
                    Err(e) => {
                        warn!("Trade stream connect failed: {}", e);
                        state.wait_and_back_off().await;
                        continue;
                    }
                }
            }

            let Some(frames) = state.frames.as_mut() else {
                continue;
            };
            let next = frames.next().await;

            match next {
                Some(Ok(text)) => match decode_trade(&text, &state.symbol, state.timezone) {
                    Ok(tick) => return Some((tick, state)),
                    Err(e) => warn!("Skipping undecodable trade frame: {}", e),
                },
                Some(Err(e)) => {
                    warn!("Trade stream disconnected: {}", e);
                    state.frames = None;
                    state.wait_and_back_off().await;
                }
                None => {
                    warn!("Trade stream ended by peer");
                    state.frames = None;
                    state.wait_and_back_off().await;
                }
            }
        }
    })
    .boxed()
}
