//! Network-call contract between the router and a concrete client.
//!
//! A transport performs exactly one call against one region and reports
//! failures as a classified [`CallError`]. Retries and failover live above it.

use crate::models::{CallError, Message};
use async_trait::async_trait;

/// Request sent to one regional endpoint.
#[derive(Debug, Clone)]
pub struct ConverseRequest {
    /// Fully-qualified endpoint id (region prefix + base id)
    pub model_id: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f64,
}

/// Successful response from one regional endpoint.
#[derive(Debug, Clone, Default)]
pub struct ConverseOutput {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: Option<String>,
}

/// A client able to call a model in a given region.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one call against `region`. No retries.
    async fn converse(
        &self,
        region: &str,
        request: &ConverseRequest,
    ) -> std::result::Result<ConverseOutput, CallError>;
}
