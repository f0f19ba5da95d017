//! Configuration types for gatehand.
//!
//! Config is loaded once at startup from a JSON file and validated before the
//! gateway opens its port. Invalid configs are rejected with a clear error
//! (no secrets in the message) rather than silently falling back to defaults.
//!
//! # Example
//! ```json
//! {
//!   "env": { "NVIDIA_API_KEY": "..." },
//!   "agents": {
//!     "defaults": {
//!       "model": { "primary": "nvidia-nim/qwen/qwen3.5-397b-a17b", "fallbacks": ["nvidia-nim/z-ai/glm4.7"] },
//!       "imageModel": { "primary": "nvidia-nim/meta/llama-3.2-90b-vision-instruct" }
//!     }
//!   },
//!   "gateway": { "port": 18789, "bind": "loopback", "mode": "standard" },
//!   "whatsapp": {
//!     "dmPolicy": "pairing", "groupPolicy": "allowlist",
//!     "mediaMaxMb": 16, "debounceMs": 2000
//!   },
//!   "maxConcurrent": 8
//! }
//! ```

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelConfig;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EnvConfig {
    #[serde(rename = "NVIDIA_API_KEY", default)]
    pub nvidia_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelChoice {
    pub primary: Option<String>,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageModelChoice {
    pub primary: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentDefaults {
    pub model: ModelChoice,
    #[serde(rename = "imageModel")]
    pub image_model: Option<ImageModelChoice>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

/// `gateway.bind` — loopback-only, all interfaces, or an explicit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindMode {
    Lan,
    Loopback,
    Explicit(String),
}

impl Serialize for BindMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(match self {
            BindMode::Lan => "lan",
            BindMode::Loopback => "loopback",
            BindMode::Explicit(addr) => addr,
        })
    }
}

impl<'de> Deserialize<'de> for BindMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "lan" => BindMode::Lan,
            "loopback" => BindMode::Loopback,
            _ => BindMode::Explicit(raw),
        })
    }
}

impl BindMode {
    pub fn to_socket_addr_str(&self, port: u16) -> String {
        match self {
            BindMode::Lan => format!("0.0.0.0:{port}"),
            BindMode::Loopback => format!("127.0.0.1:{port}"),
            BindMode::Explicit(addr) => format!("{addr}:{port}"),
        }
    }
}

fn default_port() -> u16 {
    18789
}

fn default_bind() -> BindMode {
    BindMode::Loopback
}

fn default_mode() -> String {
    "standard".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: BindMode,
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Explicit main auth token. If unset, one is generated at startup and
    /// logged once (never written back to the config file).
    #[serde(rename = "authToken", default)]
    pub auth_token: Option<String>,
}

/// Top-level gateway configuration, loaded from a single JSON file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub env: EnvConfig,
    pub agents: AgentsConfig,
    pub gateway: GatewayConfig,
    pub whatsapp: ChannelConfig,
    #[serde(rename = "maxConcurrent", default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_max_concurrent() -> u32 {
    8
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&content).context("parsing config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// The credential for the chat-API dialect: the config value if set,
    /// otherwise the `NVIDIA_API_KEY` environment variable.
    pub fn api_key(&self) -> Option<String> {
        self.env.nvidia_api_key.clone().or_else(|| std::env::var("NVIDIA_API_KEY").ok())
    }

    /// Validate startup preconditions. Never includes secret values in any
    /// error message.
    fn validate(&self) -> anyhow::Result<()> {
        if self.gateway.port == 0 {
            bail!("gateway.port must be in 1..65535");
        }

        if self.api_key().is_none() {
            bail!("missing upstream API key: set env.NVIDIA_API_KEY in config or the NVIDIA_API_KEY environment variable");
        }

        if self.whatsapp.media_max_mb == 0 {
            bail!("whatsapp.mediaMaxMb must be a positive size");
        }

        if self.max_concurrent == 0 {
            bail!("maxConcurrent must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"
        {
          "env": { "NVIDIA_API_KEY": "test-key" },
          "agents": {
            "defaults": {
              "model": { "primary": "nvidia-nim/qwen/qwen3.5-397b-a17b", "fallbacks": [] }
            }
          },
          "gateway": { "port": 18789, "bind": "loopback", "mode": "standard" },
          "whatsapp": {
            "dmPolicy": "pairing",
            "groupPolicy": "allowlist",
            "mediaMaxMb": 16,
            "debounceMs": 2000
          },
          "maxConcurrent": 8
        }
        "#
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = serde_json::from_str(minimal_json()).expect("should parse");
        config.validate().expect("should validate");
        assert_eq!(config.gateway.port, 18789);
        assert_eq!(config.gateway.bind, BindMode::Loopback);
        assert_eq!(config.agents.defaults.model.primary.as_deref(), Some("nvidia-nim/qwen/qwen3.5-397b-a17b"));
    }

    #[test]
    fn api_key_falls_back_to_environment_variable() {
        let mut config: Config = serde_json::from_str(minimal_json()).unwrap();
        config.env.nvidia_api_key = None;
        std::env::set_var("NVIDIA_API_KEY", "from-env");
        assert_eq!(config.api_key().as_deref(), Some("from-env"));
        std::env::remove_var("NVIDIA_API_KEY");
    }

    #[test]
    fn validation_rejects_missing_api_key() {
        let mut config: Config = serde_json::from_str(minimal_json()).unwrap();
        config.env.nvidia_api_key = None;
        std::env::remove_var("NVIDIA_API_KEY");
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_port() {
        let mut config: Config = serde_json::from_str(minimal_json()).unwrap();
        config.gateway.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_media_cap() {
        let mut config: Config = serde_json::from_str(minimal_json()).unwrap();
        config.whatsapp.media_max_mb = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_bind_address_round_trips() {
        let bind: BindMode = serde_json::from_str("\"10.0.0.5\"").unwrap();
        assert_eq!(bind, BindMode::Explicit("10.0.0.5".into()));
        assert_eq!(bind.to_socket_addr_str(8080), "10.0.0.5:8080");
    }

    #[test]
    fn unknown_dm_policy_string_fails_to_parse() {
        let bad = minimal_json().replace("\"pairing\"", "\"not_a_policy\"");
        let result: Result<Config, _> = serde_json::from_str(&bad);
        assert!(result.is_err());
    }
}
