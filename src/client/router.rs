//! Endpoint router: regional failover for a single model invocation.
//!
//! Regions are tried in registration order. The first region that answers
//! wins and no further regions are tried. A throttled region is skipped after
//! a fixed pause; any other failure is returned immediately.

use crate::client::{ConverseRequest, ModelRegistry, ModelSpec, Transport};
use crate::models::{ConfigError, EvalError, InvocationRequest, ModelOutput, OutputMode, Result, extract_answer};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-region call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionStats {
    pub attempts: u64,
    pub throttled: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl RegionStats {
    /// Counters accumulated since `earlier` was taken.
    pub fn since(&self, earlier: &RegionStats) -> RegionStats {
        RegionStats {
            attempts: self.attempts.saturating_sub(earlier.attempts),
            throttled: self.throttled.saturating_sub(earlier.throttled),
            succeeded: self.succeeded.saturating_sub(earlier.succeeded),
            failed: self.failed.saturating_sub(earlier.failed),
        }
    }
}

/// Routes invocations across a model's regional endpoints.
pub struct EndpointRouter {
    registry: Arc<ModelRegistry>,
    transport: Arc<dyn Transport>,
    /// Pause after a throttled region
    failover_backoff: Duration,
    /// Output token cap per call
    max_tokens: u32,
    stats: DashMap<String, RegionStats>,
}

impl EndpointRouter {
    /// Create a new router.
    pub fn new(registry: Arc<ModelRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
            failover_backoff: Duration::from_secs(1),
            max_tokens: 1000,
            stats: DashMap::new(),
        }
    }

    pub fn with_failover_backoff(mut self, backoff: Duration) -> Self {
        self.failover_backoff = backoff;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Look up a model, failing with a configuration error if it is unknown
    /// or has no regions to route to.
    pub fn resolve(&self, model_name: &str) -> Result<&ModelSpec> {
        let spec = self
            .registry
            .get(model_name)
            .ok_or_else(|| EvalError::InvalidModel(model_name.to_string()))?;
        if spec.regions.is_empty() {
            return Err(ConfigError::Invalid(format!("model '{model_name}' has no regions")).into());
        }
        Ok(spec)
    }

    /// Invoke the request's model, failing over between regions on throttling.
    pub async fn invoke(&self, request: &InvocationRequest) -> Result<ModelOutput> {
        let spec = self.resolve(&request.model)?;

        let last = spec.regions.len().saturating_sub(1);
        for (position, endpoint) in spec.regions.iter().enumerate() {
            let call = ConverseRequest {
                model_id: spec.qualified_id(endpoint),
                system: request.system.clone(),
                messages: request.messages.clone(),
                max_tokens: self.max_tokens,
                temperature: request.mode.temperature(),
            };

            debug!(
                model = %spec.name,
                region = %endpoint.region,
                model_id = %call.model_id,
                "Attempting region"
            );
            self.stats.entry(endpoint.region.clone()).or_default().attempts += 1;

            match self.transport.converse(&endpoint.region, &call).await {
                Ok(output) => {
                    self.stats.entry(endpoint.region.clone()).or_default().succeeded += 1;
                    return Ok(build_output(output, &endpoint.region, call.model_id, request.mode));
                }
                Err(e) if e.is_throttled() => {
                    self.stats.entry(endpoint.region.clone()).or_default().throttled += 1;
                    warn!(
                        model = %spec.name,
                        region = %endpoint.region,
                        error = %e,
                        "Region throttled, trying next region"
                    );
                    if position < last {
                        tokio::time::sleep(self.failover_backoff).await;
                    }
                }
                Err(e) => {
                    self.stats.entry(endpoint.region.clone()).or_default().failed += 1;
                    return Err(EvalError::Call {
                        region: endpoint.region.clone(),
                        source: e,
                    });
                }
            }
        }

        Err(EvalError::AllRegionsThrottled {
            model: spec.name.clone(),
            regions: spec.regions.len(),
        })
    }

    /// Snapshot of per-region counters, sorted by region.
    pub fn region_stats(&self) -> Vec<(String, RegionStats)> {
        let mut stats: Vec<_> = self
            .stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }
}

fn build_output(
    output: crate::client::ConverseOutput,
    region: &str,
    model_id: String,
    mode: OutputMode,
) -> ModelOutput {
    let (parsed, parsing_error) = match mode {
        OutputMode::Graded => match extract_answer(&output.text) {
            Ok(answer) => (Some(answer), None),
            Err(reason) => (None, Some(reason)),
        },
        OutputMode::FreeText => (None, None),
    };

    ModelOutput {
        raw: output.text,
        parsed,
        parsing_error,
        region: region.to_string(),
        model_id,
        input_tokens: output.input_tokens,
        output_tokens: output.output_tokens,
        stop_reason: output.stop_reason,
    }
}
