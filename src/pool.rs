//! Model Pool — the immutable catalog of upstream endpoints.
//!
//! The catalog is a hard-coded table compiled into the binary; schema
//! changes require a rebuild. Endpoints are not reconfigurable at runtime —
//! only *which* catalog id a request targets (primary/fallbacks, via
//! config) is configurable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which wire dialect an endpoint speaks. All three are OpenAI-compatible
/// chat completions at the HTTP layer; the tag only affects minor request
/// shaping done by [`crate::client::UpstreamClient`] (e.g. `custom` omits
/// `tool_choice` when unset rather than sending an explicit `"none"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Chat,
    Completions,
    Custom,
}

/// Capability flags advertised by an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub function_calling: bool,
    pub vision: bool,
}

/// Advisory rate-limit hints. Informational only — the Upstream Client
/// does not self-throttle against these; they exist for operators reading
/// status/introspection endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct RateLimitHints {
    pub requests_per_minute: Option<u32>,
    pub tokens_per_minute: Option<u32>,
}

/// One addressable upstream chat-completion endpoint.
///
/// Immutable after catalog load. The Router and Tracker reference
/// endpoints by [`ModelEndpoint::id`] only — never by holding a live
/// reference across an await point, so the catalog can be frozen in an
/// `Arc` and shared without locking.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelEndpoint {
    pub id: String,
    pub display_name: String,
    pub provider: String,
    pub base_url: String,
    pub dialect: Dialect,
    /// Priority tier, 1 (best) .. 5 (last resort).
    pub tier: u8,
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default)]
    pub rate_limits: RateLimitHints,
    #[serde(default)]
    pub capabilities: Capabilities,
}

/// The immutable set of [`ModelEndpoint`]s, built once at process start.
pub struct ModelPool {
    by_id: HashMap<String, ModelEndpoint>,
    /// Catalog insertion order, preserved for tie-breaking.
    order: Vec<String>,
}

impl ModelPool {
    /// Build a pool from a list of endpoints, in catalog order.
    ///
    /// # Panics
    /// Panics if ids are not unique, a base URL does not parse, or no
    /// tier-1 text (non-vision) endpoint is present — all three are
    /// startup-time constraints that should fail fast rather than be
    /// discovered mid-request.
    pub fn new(endpoints: Vec<ModelEndpoint>) -> Self {
        let mut by_id = HashMap::with_capacity(endpoints.len());
        let mut order = Vec::with_capacity(endpoints.len());

        for ep in endpoints {
            assert!(
                url::is_probably_valid(&ep.base_url),
                "model pool: endpoint `{}` has an invalid base_url `{}`",
                ep.id,
                ep.base_url
            );
            assert!(
                !by_id.contains_key(&ep.id),
                "model pool: duplicate endpoint id `{}`",
                ep.id
            );
            order.push(ep.id.clone());
            by_id.insert(ep.id.clone(), ep);
        }

        let pool = Self { by_id, order };
        assert!(
            pool.text_endpoints().iter().any(|e| e.tier == 1),
            "model pool: at least one tier-1 text endpoint is required"
        );
        pool
    }

    /// `O(1)` lookup by endpoint id.
    pub fn lookup(&self, id: &str) -> Option<&ModelEndpoint> {
        self.by_id.get(id)
    }

    /// All endpoints, lowest tier number first; ties broken by catalog
    /// insertion order.
    pub fn by_priority(&self) -> Vec<&ModelEndpoint> {
        let mut v: Vec<&ModelEndpoint> = self.order.iter().filter_map(|id| self.by_id.get(id)).collect();
        v.sort_by_key(|e| e.tier);
        v
    }

    /// All endpoints in the given tier, catalog order.
    pub fn by_tier(&self, tier: u8) -> Vec<&ModelEndpoint> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .filter(|e| e.tier == tier)
            .collect()
    }

    /// Endpoints without the vision capability flag.
    pub fn text_endpoints(&self) -> Vec<&ModelEndpoint> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .filter(|e| !e.capabilities.vision)
            .collect()
    }

    /// Endpoints with the vision capability flag.
    pub fn image_endpoints(&self) -> Vec<&ModelEndpoint> {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .filter(|e| e.capabilities.vision)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Minimal syntactic base-URL validation, avoiding a `url` crate dependency
/// for a single startup assertion.
mod url {
    pub fn is_probably_valid(base_url: &str) -> bool {
        base_url.starts_with("http://") || base_url.starts_with("https://")
    }
}

/// The hard-coded default catalog.
///
/// Tiers 1-3 are text chat endpoints across a couple of providers; tier 4
/// is a degraded-but-available fallback; tier 5 is the image-capable last
/// resort used for vision requests.
pub fn default_catalog() -> Vec<ModelEndpoint> {
    vec![
        ModelEndpoint {
            id: "nvidia-nim/qwen/qwen3.5-397b-a17b".into(),
            display_name: "Qwen 3.5 397B A17B".into(),
            provider: "nvidia-nim".into(),
            base_url: "https://integrate.api.nvidia.com".into(),
            dialect: Dialect::Chat,
            tier: 1,
            context_window: 131_072,
            max_output_tokens: 8_192,
            rate_limits: RateLimitHints { requests_per_minute: Some(60), tokens_per_minute: Some(400_000) },
            capabilities: Capabilities { streaming: true, function_calling: true, vision: false },
        },
        ModelEndpoint {
            id: "nvidia-nim/z-ai/glm4.7".into(),
            display_name: "GLM 4.7".into(),
            provider: "nvidia-nim".into(),
            base_url: "https://integrate.api.nvidia.com".into(),
            dialect: Dialect::Chat,
            tier: 2,
            context_window: 131_072,
            max_output_tokens: 8_192,
            rate_limits: RateLimitHints { requests_per_minute: Some(60), tokens_per_minute: Some(300_000) },
            capabilities: Capabilities { streaming: true, function_calling: true, vision: false },
        },
        ModelEndpoint {
            id: "nvidia-nim/meta/llama-3.3-70b-instruct".into(),
            display_name: "Llama 3.3 70B Instruct".into(),
            provider: "nvidia-nim".into(),
            base_url: "https://integrate.api.nvidia.com".into(),
            dialect: Dialect::Chat,
            tier: 3,
            context_window: 65_536,
            max_output_tokens: 4_096,
            rate_limits: RateLimitHints { requests_per_minute: Some(40), tokens_per_minute: Some(200_000) },
            capabilities: Capabilities { streaming: true, function_calling: false, vision: false },
        },
        ModelEndpoint {
            id: "nvidia-nim/mistralai/mixtral-8x7b-instruct".into(),
            display_name: "Mixtral 8x7B Instruct".into(),
            provider: "nvidia-nim".into(),
            base_url: "https://integrate.api.nvidia.com".into(),
            dialect: Dialect::Custom,
            tier: 4,
            context_window: 32_768,
            max_output_tokens: 4_096,
            rate_limits: RateLimitHints { requests_per_minute: Some(30), tokens_per_minute: Some(100_000) },
            capabilities: Capabilities { streaming: false, function_calling: false, vision: false },
        },
        ModelEndpoint {
            id: "nvidia-nim/meta/llama-3.2-90b-vision-instruct".into(),
            display_name: "Llama 3.2 90B Vision Instruct".into(),
            provider: "nvidia-nim".into(),
            base_url: "https://integrate.api.nvidia.com".into(),
            dialect: Dialect::Chat,
            tier: 5,
            context_window: 131_072,
            max_output_tokens: 4_096,
            rate_limits: RateLimitHints { requests_per_minute: Some(20), tokens_per_minute: Some(100_000) },
            capabilities: Capabilities { streaming: true, function_calling: false, vision: true },
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ModelPool {
        ModelPool::new(default_catalog())
    }

    #[test]
    fn lookup_finds_known_endpoint() {
        let p = pool();
        assert!(p.lookup("nvidia-nim/qwen/qwen3.5-397b-a17b").is_some());
        assert!(p.lookup("nonexistent").is_none());
    }

    #[test]
    fn by_priority_is_sorted_by_tier_ascending() {
        let p = pool();
        let tiers: Vec<u8> = p.by_priority().iter().map(|e| e.tier).collect();
        let mut sorted = tiers.clone();
        sorted.sort();
        assert_eq!(tiers, sorted);
    }

    #[test]
    fn by_tier_filters_exactly() {
        let p = pool();
        for e in p.by_tier(1) {
            assert_eq!(e.tier, 1);
        }
    }

    #[test]
    fn text_and_image_endpoints_partition_by_vision_flag() {
        let p = pool();
        assert!(p.text_endpoints().iter().all(|e| !e.capabilities.vision));
        assert!(p.image_endpoints().iter().all(|e| e.capabilities.vision));
        assert_eq!(p.text_endpoints().len() + p.image_endpoints().len(), p.len());
    }

    #[test]
    #[should_panic(expected = "duplicate endpoint id")]
    fn rejects_duplicate_ids() {
        let mut endpoints = default_catalog();
        let dup = endpoints[0].clone();
        endpoints.push(dup);
        ModelPool::new(endpoints);
    }

    #[test]
    #[should_panic(expected = "at least one tier-1 text endpoint")]
    fn requires_a_tier_one_text_endpoint() {
        let endpoints = vec![ModelEndpoint {
            id: "only".into(),
            display_name: "Only".into(),
            provider: "p".into(),
            base_url: "https://example.com".into(),
            dialect: Dialect::Chat,
            tier: 5,
            context_window: 1,
            max_output_tokens: 1,
            rate_limits: RateLimitHints::default(),
            capabilities: Capabilities { vision: true, ..Default::default() },
        }];
        ModelPool::new(endpoints);
    }
}
