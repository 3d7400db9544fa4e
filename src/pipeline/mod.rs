//! Pipeline module - category evaluation and result persistence.

mod evaluate;
mod sink;

pub use evaluate::*;
pub use sink::*;
