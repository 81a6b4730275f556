pub mod fetch;
pub mod throttle;

pub use fetch::{BoundedFetcher, FetchLimits, FetchRequest, FetchResult};
pub use throttle::Throttle;
