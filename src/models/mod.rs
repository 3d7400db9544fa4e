//! Core data models for bedeval.
//!
//! - `config`: file and CLI tunables
//! - `error`: error taxonomy and the classified call error
//! - `item`: dataset records and work items
//! - `output`: model outputs, result slots, result table
//! - `prompt`: request construction and answer extraction

mod config;
mod error;
mod item;
mod output;
mod prompt;

pub use config::*;
pub use error::*;
pub use item::*;
pub use output::*;
pub use prompt::*;
