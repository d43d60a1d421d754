pub mod aggregator;
pub mod market_data_manager;
pub mod state_store;
pub mod tick_buffer;

pub use aggregator::OhlcvAggregator;
pub use market_data_manager::{ManagerOptions, MarketDataManager};
pub use state_store::StateSnapshot;
pub use tick_buffer::TickBuffer;
