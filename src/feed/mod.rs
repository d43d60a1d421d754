pub mod mirror;
pub mod query;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use mirror::spawn_state_mirror;
pub use query::{error_response, query_snapshot, ErrorBody, MAX_QUERY_TICKS};
pub use service::{DataFeedService, FeedOptions, FeedSnapshot, FeedStatus};
