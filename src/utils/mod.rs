//! Small standalone utilities with no home in a single component.

mod throttle;

pub use throttle::LogThrottler;
