pub mod de;
pub mod rate_limiter;
pub mod time;

pub use rate_limiter::RateLimiter;
pub use time::*;
