/// Crash-safe JSON persistence of per-timeframe candle state
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{FeedError, Result};
use crate::types::{OhlcvCandle, Timeframe};
use crate::utils::de::number_or_string;
use crate::utils::time::parse_rfc3339;

/// Symbol plus candle lists keyed by timeframe label, shortest timeframe first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub symbol: String,
    pub timeframes: BTreeMap<Timeframe, Vec<OhlcvCandle>>,
}

/// Write the snapshot to `<path>.tmp`, fsync it, then rename over `path`.
///
/// Readers of `path` see either the previous file or the complete new one.
pub fn save_atomic(path: &Path, snapshot: &StateSnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let payload = serde_json::to_vec_pretty(snapshot)?;
    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    debug!("Persisted {} state to {}", snapshot.symbol, path.display());
    Ok(())
}

/// Load persisted candles for `symbol`, re-expressed in `tz`.
///
/// A missing, unreadable or corrupt file yields an empty map. A timeframe whose
/// entries cannot be reconstructed is skipped on its own.
pub fn load(path: &Path, symbol: &str, tz: Tz) -> BTreeMap<Timeframe, Vec<OhlcvCandle>> {
    if !path.exists() {
        return BTreeMap::new();
    }

    let stored = match read_state(path) {
        Ok(stored) => stored,
        Err(e) => {
            warn!("Ignoring unreadable state file {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };

    if let Some(stored_symbol) = stored.symbol.as_deref() {
        if !stored_symbol.eq_ignore_ascii_case(symbol) {
            warn!(
                "State file {} belongs to {}, not {}; starting empty",
                path.display(),
                stored_symbol,
                symbol
            );
            return BTreeMap::new();
        }
    }

    let mut restored = BTreeMap::new();
    for (label, entries) in stored.timeframes {
        match restore_timeframe(&label, entries, symbol, tz) {
            Ok((timeframe, candles)) => {
                restored.insert(timeframe, candles);
            }
            Err(e) => warn!("Skipping persisted {} candles: {}", label, e),
        }
    }
    restored
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[derive(Deserialize)]
struct StoredState {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    timeframes: Map<String, Value>,
}

fn read_state(path: &Path) -> Result<StoredState> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// On-disk candle; the timeframe comes from the enclosing label
#[derive(Deserialize)]
struct CandleRecord {
    open_time: String,
    #[serde(deserialize_with = "number_or_string")]
    open: f64,
    #[serde(deserialize_with = "number_or_string")]
    high: f64,
    #[serde(deserialize_with = "number_or_string")]
    low: f64,
    #[serde(deserialize_with = "number_or_string")]
    close: f64,
    #[serde(deserialize_with = "number_or_string")]
    volume: f64,
}

fn restore_timeframe(label: &str, entries: Value, symbol: &str, tz: Tz) -> Result<(Timeframe, Vec<OhlcvCandle>)> {
    let timeframe: Timeframe = label.parse()?;
    let records: Vec<CandleRecord> = serde_json::from_value(entries)?;

    let candles = records
        .into_iter()
        .map(|record| {
            let open_time = parse_rfc3339(&record.open_time, tz)?;
            if record.high.is_nan() || record.high < record.low {
                return Err(FeedError::MalformedData(format!(
                    "Candle at {} has high {} below low {}",
                    record.open_time, record.high, record.low
                )));
            }
            Ok(OhlcvCandle {
                symbol: symbol.to_uppercase(),
                timeframe,
                open_time,
                close_time: open_time + timeframe.duration(),
                open: record.open,
                high: record.high,
                low: record.low,
                close: record.close,
                volume: record.volume,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((timeframe, candles))
}
