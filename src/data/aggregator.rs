/// OHLCV aggregation of trade ticks across multiple timeframes
use std::collections::{HashMap, VecDeque};

use chrono_tz::Tz;
use tracing::debug;

use crate::error::{FeedError, Result};
use crate::types::{OhlcvCandle, Timeframe, TradeTick};
use crate::utils::time::floor_timestamp;

/// Folds ticks into one bounded candle buffer per configured timeframe.
///
/// Pure in-memory state: no I/O and no locking. Buffers are ordered oldest
/// to newest with strictly increasing `open_time`s.
#[derive(Debug, Clone)]
pub struct OhlcvAggregator {
    symbol: String,
    timezone: Tz,
    max_length: usize,
    timeframes: Vec<Timeframe>,
    buffers: HashMap<Timeframe, VecDeque<OhlcvCandle>>,
}

impl OhlcvAggregator {
    pub fn new(symbol: &str, timeframes: &[Timeframe], max_length: usize, timezone: Tz) -> Self {
        let max_length = max_length.max(1);
        let mut ordered = timeframes.to_vec();
        ordered.sort();
        ordered.dedup();

        let buffers = ordered
            .iter()
            .map(|tf| (*tf, VecDeque::with_capacity(max_length)))
            .collect();

        OhlcvAggregator {
            symbol: symbol.to_uppercase(),
            timezone,
            max_length,
            timeframes: ordered,
            buffers,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    /// Replace a timeframe's buffer with historical candles
    pub fn seed(&mut self, timeframe: Timeframe, candles: impl IntoIterator<Item = OhlcvCandle>) -> Result<()> {
        let mut sorted: Vec<OhlcvCandle> = candles.into_iter().collect();
        if let Some(foreign) = sorted.iter().find(|c| c.timeframe != timeframe) {
            return Err(FeedError::InvalidParameter(format!(
                "Cannot seed {} buffer with a {} candle",
                timeframe, foreign.timeframe
            )));
        }
        // Stable sort, so of two candles sharing an open_time the later one wins below
        sorted.sort_by_key(|c| c.open_time);

        let timezone = self.timezone;
        let max_length = self.max_length;
        let buffer = self
            .buffers
            .get_mut(&timeframe)
            .ok_or_else(|| FeedError::UnknownTimeframe(format!("{} is not configured", timeframe)))?;

        buffer.clear();
        for candle in sorted {
            let candle = candle.with_timezone(timezone);
            if buffer.back().map(|last| last.open_time) == Some(candle.open_time) {
                buffer.pop_back();
            }
            buffer.push_back(candle);
            if buffer.len() > max_length {
                buffer.pop_front();
            }
        }

        debug!("Seeded {} {} with {} candles", self.symbol, timeframe, buffer.len());
        Ok(())
    }

    /// Fold a tick into every configured timeframe
    pub fn update(&mut self, tick: &TradeTick) -> Result<()> {
        tick.validate()?;
        let timestamp = tick.timestamp.with_timezone(&self.timezone);

        for timeframe in &self.timeframes {
            let bucket_start = floor_timestamp(&timestamp, timeframe.duration(), self.timezone)?;
            let Some(buffer) = self.buffers.get_mut(timeframe) else {
                continue;
            };

            let newest = buffer.back().map(|c| c.open_time);
            match newest {
                Some(open_time) if open_time == bucket_start => {
                    if let Some(candle) = buffer.back_mut() {
                        candle.apply_trade(tick.price, tick.quantity);
                    }
                }
                Some(open_time) if open_time > bucket_start => {
                    debug!(
                        "Skipping late tick for {} {}: bucket {} precedes newest {}",
                        self.symbol, timeframe, bucket_start, open_time
                    );
                }
                _ => {
                    let candle = OhlcvCandle::from_tick(*timeframe, bucket_start, &self.symbol, tick);
                    debug!(
                        "🆕 Started new candle: {} {} @ {}",
                        self.symbol, timeframe, candle.open_time
                    );
                    buffer.push_back(candle);
                    if buffer.len() > self.max_length {
                        buffer.pop_front();
                    }
                }
            }
        }

        Ok(())
    }

    /// Snapshot copy of a timeframe's candles, oldest first
    pub fn get_candles(&self, timeframe: Timeframe) -> Vec<OhlcvCandle> {
        self.buffers
            .get(&timeframe)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::DEFAULT_TIMEZONE;
    use chrono::{DateTime, TimeZone, Utc};

    fn utc(hour: u32, minute: u32, second: u32) -> DateTime<Tz> {
        Tz::UTC.with_ymd_and_hms(2024, 1, 1, hour, minute, second).unwrap()
    }

    fn make_tick(price: f64, quantity: f64, hour: u32, minute: u32, second: u32) -> TradeTick {
        TradeTick::new("BTCUSDT", price, quantity, utc(hour, minute, second)).unwrap()
    }

    fn make_candle(timeframe: Timeframe, open_time: DateTime<Tz>, close: f64) -> OhlcvCandle {
        OhlcvCandle {
            symbol: "BTCUSDT".to_string(),
            timeframe,
            open_time,
            close_time: open_time + timeframe.duration(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1.0,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    #[test]
    fn test_aggregator_updates_candles_across_timeframes() {
        let mut aggregator = OhlcvAggregator::new(
            "btcusdt",
            &[Timeframe::OneMinute, Timeframe::FiveMinute],
            10,
            DEFAULT_TIMEZONE,
        );

        aggregator.update(&make_tick(100.0, 0.25, 15, 0, 0)).unwrap();
        aggregator.update(&make_tick(102.0, 0.10, 15, 0, 30)).unwrap();
        aggregator.update(&make_tick(101.5, 0.30, 15, 1, 0)).unwrap();

        let candles_1m = aggregator.get_candles(Timeframe::OneMinute);
        assert_eq!(candles_1m.len(), 2);

        let first = &candles_1m[0];
        assert_eq!(first.symbol, "BTCUSDT");
        assert_eq!(first.open, 100.0);
        assert_eq!(first.high, 102.0);
        assert_eq!(first.low, 100.0);
        assert_eq!(first.close, 102.0);
        assert_close(first.volume, 0.35);
        assert_eq!(first.open_time.timezone(), DEFAULT_TIMEZONE);
        assert_eq!(first.open_time.with_timezone(&Utc), Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap());

        let second = &candles_1m[1];
        assert_eq!(second.open, 101.5);
        assert_eq!(second.high, 101.5);
        assert_eq!(second.low, 101.5);
        assert_eq!(second.close, 101.5);
        assert_close(second.volume, 0.30);

        let candles_5m = aggregator.get_candles(Timeframe::FiveMinute);
        assert_eq!(candles_5m.len(), 1);
        let combined = &candles_5m[0];
        assert_eq!(combined.open, 100.0);
        assert_eq!(combined.high, 102.0);
        assert_eq!(combined.low, 100.0);
        assert_eq!(combined.close, 101.5);
        assert_close(combined.volume, 0.65);
        assert_eq!(combined.close_time - combined.open_time, Timeframe::FiveMinute.duration());
    }

    #[test]
    fn test_new_buckets_keep_open_times_increasing() {
        let mut aggregator = OhlcvAggregator::new("BTCUSDT", &[Timeframe::OneMinute], 100, Tz::UTC);

        for minute in [0, 0, 2, 3, 3, 7] {
            aggregator.update(&make_tick(100.0 + minute as f64, 1.0, 10, minute, 15)).unwrap();
        }

        let candles = aggregator.get_candles(Timeframe::OneMinute);
        assert_eq!(candles.len(), 4);
        for pair in candles.windows(2) {
            assert!(pair[0].open_time < pair[1].open_time);
        }
        for candle in &candles {
            assert_eq!(candle.close_time - candle.open_time, Timeframe::OneMinute.duration());
        }
    }

    #[test]
    fn test_late_tick_is_not_appended() {
        let mut aggregator = OhlcvAggregator::new("BTCUSDT", &[Timeframe::OneMinute, Timeframe::OneHour], 100, Tz::UTC);

        aggregator.update(&make_tick(100.0, 1.0, 10, 5, 0)).unwrap();
        aggregator.update(&make_tick(90.0, 2.0, 10, 3, 0)).unwrap();

        let minute = aggregator.get_candles(Timeframe::OneMinute);
        assert_eq!(minute.len(), 1);
        assert_eq!(minute[0].low, 100.0);

        // Still inside the current hour bucket, so it is folded there
        let hour = aggregator.get_candles(Timeframe::OneHour);
        assert_eq!(hour.len(), 1);
        assert_eq!(hour[0].low, 90.0);
        assert_close(hour[0].volume, 3.0);
    }

    #[test]
    fn test_buffer_is_capacity_bounded() {
        let mut aggregator = OhlcvAggregator::new("BTCUSDT", &[Timeframe::OneMinute], 3, Tz::UTC);

        for minute in 0..5 {
            aggregator.update(&make_tick(100.0 + minute as f64, 1.0, 9, minute, 0)).unwrap();
        }

        let candles = aggregator.get_candles(Timeframe::OneMinute);
        let opens: Vec<f64> = candles.iter().map(|c| c.open).collect();
        assert_eq!(opens, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn test_seed_sorts_and_retimezones() {
        let mut aggregator = OhlcvAggregator::new("BTCUSDT", &[Timeframe::OneMinute], 10, DEFAULT_TIMEZONE);

        let candles = vec![
            make_candle(Timeframe::OneMinute, utc(12, 2, 0), 3.0),
            make_candle(Timeframe::OneMinute, utc(12, 0, 0), 1.0),
            make_candle(Timeframe::OneMinute, utc(12, 1, 0), 2.0),
        ];
        aggregator.seed(Timeframe::OneMinute, candles).unwrap();

        let seeded = aggregator.get_candles(Timeframe::OneMinute);
        let closes: Vec<f64> = seeded.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
        assert!(seeded.iter().all(|c| c.open_time.timezone() == DEFAULT_TIMEZONE));
        assert_eq!(seeded[0].open_time, utc(12, 0, 0));
    }

    #[test]
    fn test_seed_replaces_and_truncates() {
        let mut aggregator = OhlcvAggregator::new("BTCUSDT", &[Timeframe::OneMinute], 2, Tz::UTC);
        aggregator.update(&make_tick(500.0, 1.0, 8, 0, 0)).unwrap();

        let candles = vec![
            make_candle(Timeframe::OneMinute, utc(12, 0, 0), 1.0),
            make_candle(Timeframe::OneMinute, utc(12, 1, 0), 2.0),
            make_candle(Timeframe::OneMinute, utc(12, 1, 0), 2.5),
            make_candle(Timeframe::OneMinute, utc(12, 2, 0), 3.0),
        ];
        aggregator.seed(Timeframe::OneMinute, candles).unwrap();

        let closes: Vec<f64> = aggregator.get_candles(Timeframe::OneMinute).iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![2.5, 3.0]);
    }

    #[test]
    fn test_seed_then_tick_merges_into_seeded_bucket() {
        let mut aggregator = OhlcvAggregator::new("BTCUSDT", &[Timeframe::OneMinute], 10, DEFAULT_TIMEZONE);
        aggregator
            .seed(Timeframe::OneMinute, vec![make_candle(Timeframe::OneMinute, utc(12, 0, 0), 100.0)])
            .unwrap();

        aggregator.update(&make_tick(110.0, 0.5, 12, 0, 40)).unwrap();

        let candles = aggregator.get_candles(Timeframe::OneMinute);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].high, 110.0);
        assert_eq!(candles[0].close, 110.0);
        assert_close(candles[0].volume, 1.5);
    }

    #[test]
    fn test_seed_rejects_unknown_or_mismatched_timeframe() {
        let mut aggregator = OhlcvAggregator::new("BTCUSDT", &[Timeframe::OneMinute], 10, Tz::UTC);

        let hourly = vec![make_candle(Timeframe::OneHour, utc(12, 0, 0), 1.0)];
        assert!(matches!(
            aggregator.seed(Timeframe::OneHour, hourly.clone()),
            Err(FeedError::UnknownTimeframe(_))
        ));
        assert!(matches!(
            aggregator.seed(Timeframe::OneMinute, hourly),
            Err(FeedError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_get_candles_is_a_copy() {
        let mut aggregator = OhlcvAggregator::new("BTCUSDT", &[Timeframe::OneMinute], 10, Tz::UTC);
        aggregator.update(&make_tick(100.0, 1.0, 9, 0, 0)).unwrap();

        let before = aggregator.get_candles(Timeframe::OneMinute);
        aggregator.update(&make_tick(120.0, 1.0, 9, 0, 30)).unwrap();

        assert_eq!(before[0].close, 100.0);
        assert_eq!(aggregator.get_candles(Timeframe::OneMinute)[0].close, 120.0);
        assert!(aggregator.get_candles(Timeframe::OneDay).is_empty());
    }
}
