/// Centralized error types for the market data feed
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    // Validation Errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),

    #[error("Unsupported market data provider: {0}")]
    UnsupportedProvider(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Network Errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("WebSocket connection failed: {0}")]
    WebSocketError(String),

    #[error("WebSocket disconnected: {0}")]
    WebSocketDisconnected(String),

    #[error("Provider closed: {0}")]
    ProviderClosed(String),

    // Data Errors
    #[error("Malformed exchange data: {0}")]
    MalformedData(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    // Service Errors
    #[error("Market data feed is not available")]
    FeedUnavailable,

    #[error("Symbol not tracked: {0}")]
    SymbolNotTracked(String),

    #[error("Streaming task failed: {0}")]
    StreamTaskFailed(String),
}

pub type Result<T> = std::result::Result<T, FeedError>;

impl From<::config::ConfigError> for FeedError {
    fn from(err: ::config::ConfigError) -> Self {
        FeedError::ConfigError(err.to_string())
    }
}

impl FeedError {
    /// Transient network conditions that a caller may retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FeedError::HttpError(_)
                | FeedError::WebSocketError(_)
                | FeedError::WebSocketDisconnected(_)
        )
    }

    /// Usage errors raised synchronously and never retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FeedError::InvalidParameter(_)
                | FeedError::InvalidTimestamp(_)
                | FeedError::UnknownTimeframe(_)
                | FeedError::UnsupportedProvider(_)
                | FeedError::ConfigError(_)
        )
    }

    /// Status code the read API should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            FeedError::SymbolNotTracked(_) => 404,
            FeedError::FeedUnavailable => 503,
            FeedError::InvalidParameter(_) => 400,
            _ => 500,
        }
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            FeedError::InvalidParameter(_) => "VAL_001",
            FeedError::InvalidTimestamp(_) => "VAL_002",
            FeedError::UnknownTimeframe(_) => "VAL_003",
            FeedError::UnsupportedProvider(_) => "CFG_001",
            FeedError::ConfigError(_) => "CFG_002",
            FeedError::HttpError(_) => "NET_001",
            FeedError::WebSocketError(_) => "NET_002",
            FeedError::WebSocketDisconnected(_) => "NET_003",
            FeedError::ProviderClosed(_) => "NET_004",
            FeedError::MalformedData(_) => "DATA_001",
            FeedError::DeserializationError(_) => "DATA_002",
            FeedError::FileError(_) => "FILE_001",
            FeedError::FeedUnavailable => "SVC_001",
            FeedError::SymbolNotTracked(_) => "SVC_002",
            FeedError::StreamTaskFailed(_) => "SVC_003",
        }
    }
}
