/// Keeps a `MarketDataManager` in step with a running feed
use std::sync::{Arc, Weak};

use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::service::DataFeedService;
use crate::data::MarketDataManager;
use crate::error::Result;
use crate::types::TradeTick;

/// Seed `manager` from the feed's candles, then forward every later tick on a
/// blocking thread.
///
/// If the mirror falls behind the tick channel it reseeds from the feed and
/// resubscribes, so skipped ticks are never lost. The task ends once the feed
/// is dropped.
pub fn spawn_state_mirror(feed: &Arc<DataFeedService>, manager: Arc<MarketDataManager>) -> Result<JoinHandle<()>> {
    let (candles, ticks) = feed.subscribe_with_candles();
    manager.seed_batch(candles)?;

    let feed = Arc::downgrade(feed);
    Ok(tokio::task::spawn_blocking(move || mirror_ticks(feed, manager, ticks)))
}

fn mirror_ticks(feed: Weak<DataFeedService>, manager: Arc<MarketDataManager>, mut ticks: Receiver<TradeTick>) {
    loop {
        match ticks.blocking_recv() {
            Ok(tick) => {
                if let Err(e) = manager.ingest_tick(&tick) {
                    warn!("State manager rejected tick: {} ({})", e, e.error_code());
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                let Some(feed) = feed.upgrade() else {
                    break;
                };
                warn!("State manager lagged by {} ticks, reseeding from the feed", skipped);
                let (candles, fresh) = feed.subscribe_with_candles();
                ticks = fresh;
                if let Err(e) = manager.seed_batch(candles) {
                    warn!("Failed to reseed state manager: {} ({})", e, e.error_code());
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("State mirror for {} stopped", manager.symbol());
}
