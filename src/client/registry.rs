//! Model registry: logical model names mapped to regional endpoint variants.
//!
//! The registry is an immutable value handed to the router at construction
//! time. [`ModelRegistry::builtin`] carries the compiled-in model table; tests
//! build their own with [`ModelRegistry::new`].

use serde::Serialize;
use std::sync::Arc;

/// One regional deployment of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionEndpoint {
    /// Region the client is bound to (e.g. "us-east-1")
    pub region: String,
    /// Prefix selecting the cross-region profile (e.g. "us")
    pub prefix: String,
}

/// A logical model and its regional endpoints, in failover order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    /// Human-readable model name, the registry key
    pub name: String,
    /// Base model id, without region prefix
    pub base_id: String,
    /// Regions in failover order
    pub regions: Vec<RegionEndpoint>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, base_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_id: base_id.into(),
            regions: Vec::new(),
        }
    }

    /// Append a region; call order is failover order.
    pub fn region(mut self, region: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.regions.push(RegionEndpoint {
            region: region.into(),
            prefix: prefix.into(),
        });
        self
    }

    /// Fully-qualified endpoint id for a region.
    pub fn qualified_id(&self, endpoint: &RegionEndpoint) -> String {
        format!("{}.{}", endpoint.prefix, self.base_id)
    }
}

/// Immutable registry of models, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }

    /// The compiled-in model table.
    pub fn builtin() -> Self {
        Self::new(vec![
            ModelSpec::new("Claude 3.7 Sonnet", "anthropic.claude-3-7-sonnet-20250219-v1:0")
                .region("us-east-1", "us")
                .region("eu-central-1", "eu"),
            ModelSpec::new("Claude 3.5 Sonnet V2", "anthropic.claude-3-5-sonnet-20241022-v2:0")
                .region("ap-northeast-2", "apac")
                .region("us-east-1", "us"),
            ModelSpec::new("Nova Pro", "amazon.nova-pro-v1:0")
                .region("us-east-1", "us")
                .region("ap-northeast-2", "apac")
                .region("eu-central-1", "eu"),
            ModelSpec::new("Nova Premier", "amazon.nova-premier-v1:0").region("us-east-1", "us"),
            ModelSpec::new("Nova Micro", "amazon.nova-micro-v1:0")
                .region("us-east-1", "us")
                .region("ap-northeast-2", "apac")
                .region("eu-central-1", "eu"),
            ModelSpec::new("Nova Lite", "amazon.nova-lite-v1:0")
                .region("us-east-1", "us")
                .region("ap-northeast-2", "apac")
                .region("eu-central-1", "eu"),
            ModelSpec::new("Llama 3.1 70B Instruct", "meta.llama3-1-70b-instruct-v1:0")
                .region("us-east-1", "us"),
            ModelSpec::new("Llama 3.3 70B Instruct", "meta.llama3-3-70b-instruct-v1:0")
                .region("us-east-1", "us"),
            ModelSpec::new(
                "Llama 4 Maverick 17B Instruct",
                "meta.llama4-maverick-17b-instruct-v1:0",
            )
            .region("us-east-1", "us"),
            ModelSpec::new("Llama 4 Scout 17B Instruct", "meta.llama4-scout-17b-instruct-v1:0")
                .region("us-east-1", "us"),
            ModelSpec::new("Claude 3.5 Haiku", "anthropic.claude-3-5-haiku-20241022-v1:0")
                .region("us-east-1", "us"),
        ])
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Get model by name.
    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Model names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_and_order() {
        let registry = ModelRegistry::builtin();
        assert_eq!(registry.len(), 11);

        let nova = registry.get("Nova Pro").unwrap();
        let regions: Vec<_> = nova.regions.iter().map(|r| r.region.as_str()).collect();
        assert_eq!(regions, vec!["us-east-1", "ap-northeast-2", "eu-central-1"]);

        let sonnet = registry.get("Claude 3.5 Sonnet V2").unwrap();
        assert_eq!(sonnet.regions[0].region, "ap-northeast-2");
        assert_eq!(
            sonnet.qualified_id(&sonnet.regions[0]),
            "apac.anthropic.claude-3-5-sonnet-20241022-v2:0"
        );

        assert!(registry.get("nova pro").is_none());
    }

    #[test]
    fn test_every_builtin_model_has_a_region() {
        for model in ModelRegistry::builtin().iter() {
            assert!(!model.regions.is_empty(), "{} has no regions", model.name);
        }
    }

    #[test]
    fn test_separate_registries_are_independent() {
        let custom = ModelRegistry::new(vec![ModelSpec::new("tiny", "x.tiny-v1").region("r1", "p1")]);
        assert!(custom.contains("tiny"));
        assert!(!custom.contains("Nova Pro"));
        assert!(ModelRegistry::builtin().contains("Nova Pro"));
    }
}
