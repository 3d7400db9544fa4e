//! bedeval - Multiple-choice benchmark evaluation over region-failover LLM endpoints.
//!
//! ## Architecture
//!
//! - **Endpoint Router**: resolves a logical model name to its ordered regional
//!   endpoints and fails over between them when a region is throttled.
//! - **Batch Dispatcher**: runs a bounded pool of units of work over a dataset,
//!   each unit retrying in place, failed units resubmitted into the pool.
//!
//! ## Flow
//!
//! Dataset category → WorkItems → Dispatcher → retry wrapper → Router →
//! Transport → ResultTable (dataset order) → CSV

pub mod client;
pub mod dataset;
pub mod models;
pub mod pipeline;
pub mod pool;

// Re-exports for convenience
pub use client::{BedrockClient, EndpointRouter, ModelRegistry, ModelSpec, Transport};
pub use dataset::{DatasetSource, HubSource, LocalSource};
pub use models::{Config, EvalError, InvocationResult, ResultTable, Result, WorkItem};
pub use pipeline::EvalPipeline;
pub use pool::{DispatchConfig, Dispatcher, RetryPolicy};
