//! Pool module - bounded worker pool and per-item retry.

mod dispatcher;
mod retry;

pub use dispatcher::*;
pub use retry::*;
