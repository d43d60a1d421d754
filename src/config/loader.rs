/// Configuration loading from an optional TOML file plus `MARKET_DATA_*` environment
use std::path::Path;

use ::config::{Config, Environment, File};

use crate::error::{FeedError, Result};
use crate::provider::binance::MAX_KLINE_LIMIT;
use crate::types::FeedConfig;
use crate::utils::time::parse_timezone;

pub const ENV_PREFIX: &str = "MARKET_DATA";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FeedConfig> {
    let environment = Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("timeframes");

    build_config(path.as_ref(), environment)
}

/// Environment values override the file; missing keys fall back to defaults
fn build_config(path: &Path, environment: Environment) -> Result<FeedConfig> {
    let config: FeedConfig = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(environment)
        .build()?
        .try_deserialize()?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &FeedConfig) -> Result<()> {
    if config.symbol.trim().is_empty() {
        return Err(FeedError::ConfigError("symbol is empty".to_string()));
    }
    if config.provider.trim().is_empty() {
        return Err(FeedError::ConfigError("provider is empty".to_string()));
    }
    if config.timeframes.is_empty() {
        return Err(FeedError::ConfigError("at least one timeframe is required".to_string()));
    }

    // Retention
    if config.history_limit == 0 || config.history_limit > MAX_KLINE_LIMIT {
        return Err(FeedError::ConfigError(format!(
            "history_limit must be within 1..={}, got {}",
            MAX_KLINE_LIMIT, config.history_limit
        )));
    }
    if config.tick_buffer_size == 0 {
        return Err(FeedError::ConfigError("tick_buffer_size must be positive".to_string()));
    }

    parse_timezone(&config.timezone)?;

    if config.refresh_interval_secs == 0 {
        return Err(FeedError::ConfigError("refresh_interval_secs must be positive".to_string()));
    }
    if config.rate_limit_max_calls == 0 || config.rate_limit_period_ms == 0 {
        return Err(FeedError::ConfigError("rate limit quota and period must be positive".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("timeframes")
            .source(Some(source))
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempdir().unwrap();
        let config = build_config(&dir.path().join("missing.toml"), env(&[])).unwrap();

        assert!(config.enabled);
        assert_eq!(config.provider, "binance");
        assert_eq!(config.symbol, "BTCUSDT");
        assert_eq!(config.timeframes, Timeframe::all().to_vec());
        assert_eq!(config.history_limit, 500);
        assert_eq!(config.tick_buffer_size, 1000);
        assert_eq!(config.timezone, "America/Argentina/Buenos_Aires");
        assert!(config.persist_path.is_none());
    }

    #[test]
    fn test_file_then_environment_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
symbol = "ETHUSDT"
timeframes = ["1m", "1h"]
history_limit = 200
persist_path = "state/eth.json"
"#,
        )
        .unwrap();

        let config = build_config(
            &path,
            env(&[("MARKET_DATA_SYMBOL", "SOLUSDT"), ("MARKET_DATA_TICK_BUFFER_SIZE", "50")]),
        )
        .unwrap();

        assert_eq!(config.symbol, "SOLUSDT");
        assert_eq!(config.tick_buffer_size, 50);
        assert_eq!(config.history_limit, 200);
        assert_eq!(config.timeframes, vec![Timeframe::OneMinute, Timeframe::OneHour]);
        assert_eq!(config.persist_path.unwrap().to_str(), Some("state/eth.json"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = FeedConfig::default();
        assert!(validate_config(&config).is_ok());

        config.timezone = "Nowhere/Special".to_string();
        assert!(validate_config(&config).is_err());

        let config = FeedConfig {
            history_limit: 0,
            ..FeedConfig::default()
        };
        assert!(validate_config(&config).is_err());

        let config = FeedConfig {
            symbol: "  ".to_string(),
            ..FeedConfig::default()
        };
        assert!(matches!(validate_config(&config), Err(FeedError::ConfigError(_))));

        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "timeframes = [\"2m\"]\n").unwrap();
        assert!(build_config(&path, env(&[])).is_err());
    }
}
