pub mod types;
pub mod error;
pub mod data;
pub mod provider;
pub mod feed;
pub mod scheduler;
pub mod config;
pub mod utils;

pub use types::*;
pub use error::{FeedError, Result};
