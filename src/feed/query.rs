/// Read-side helper behind `GET /market-data/{symbol}`
use serde::Serialize;

use super::service::{DataFeedService, FeedSnapshot, FeedStatus};
use crate::error::{FeedError, Result};

pub const MAX_QUERY_TICKS: usize = 1000;

/// Generic error body handed back to API clients
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub detail: &'static str,
}

/// Resolve a snapshot request against the (possibly absent) feed
pub fn query_snapshot(service: Option<&DataFeedService>, symbol: &str, max_ticks: Option<usize>) -> Result<FeedSnapshot> {
    let service = service
        .filter(|s| s.status() == FeedStatus::Running)
        .ok_or(FeedError::FeedUnavailable)?;

    if !symbol.trim().eq_ignore_ascii_case(service.symbol()) {
        return Err(FeedError::SymbolNotTracked(symbol.trim().to_uppercase()));
    }

    if let Some(n) = max_ticks {
        if n == 0 || n > MAX_QUERY_TICKS {
            return Err(FeedError::InvalidParameter(format!(
                "max_ticks must be within 1..={}",
                MAX_QUERY_TICKS
            )));
        }
    }

    Ok(service.snapshot(max_ticks))
}

/// Status code and client-safe body for a failed query
pub fn error_response(err: &FeedError) -> (u16, ErrorBody) {
    let detail = match err {
        FeedError::SymbolNotTracked(_) => "Symbol not tracked",
        FeedError::FeedUnavailable => "Market data feed unavailable",
        FeedError::InvalidParameter(_) => "Invalid request parameters",
        _ => "Internal server error",
    };
    (err.http_status(), ErrorBody { detail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::service::FeedOptions;
    use crate::feed::test_support::{scenario_ticks, MockProvider};
    use crate::types::Timeframe;
    use std::sync::Arc;

    fn service() -> DataFeedService {
        let options = FeedOptions {
            symbol: "BTCUSDT".to_string(),
            timeframes: vec![Timeframe::OneMinute],
            ..FeedOptions::default()
        };
        DataFeedService::new(options, Arc::new(MockProvider::new(scenario_ticks())))
    }

    #[test]
    fn test_missing_or_stopped_feed_is_unavailable() {
        let err = query_snapshot(None, "BTCUSDT", None).unwrap_err();
        assert_eq!(err.http_status(), 503);

        let stopped = service();
        let err = query_snapshot(Some(&stopped), "BTCUSDT", None).unwrap_err();
        assert!(matches!(err, FeedError::FeedUnavailable));
        assert_eq!(error_response(&err).1.detail, "Market data feed unavailable");
    }

    #[tokio::test]
    async fn test_running_feed_answers_tracked_symbol_only() {
        let service = service();
        let mut ticks = service.subscribe_ticks();
        service.start().await.unwrap();
        for _ in 0..3 {
            ticks.recv().await.unwrap();
        }

        let snapshot = query_snapshot(Some(&service), "btcusdt", Some(2)).unwrap();
        assert_eq!(snapshot.recent_ticks.len(), 2);

        let err = query_snapshot(Some(&service), "ETHUSDT", None).unwrap_err();
        assert_eq!(err.http_status(), 404);
        assert_eq!(error_response(&err).0, 404);

        let err = query_snapshot(Some(&service), "BTCUSDT", Some(0)).unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert!(query_snapshot(Some(&service), "BTCUSDT", Some(MAX_QUERY_TICKS + 1)).is_err());
        assert!(query_snapshot(Some(&service), "BTCUSDT", Some(MAX_QUERY_TICKS)).is_ok());

        service.stop().await;
    }
}
