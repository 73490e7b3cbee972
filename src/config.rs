//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.mimir/config.toml` (user)
//! 3. `/etc/mimir/config.toml` (system)
//!
//! Every section has defaults, so an empty file (or no file, via
//! [`Config::load_or_default`]) yields a working configuration.
//!
//! API keys are never read from the config file. They come from
//! `~/.mimir/secrets.toml` (must be 0600) or, failing that, the provider's
//! environment variable.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use llm::builder::LLMBackend;
use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::orchestrator::Orchestrator;
use crate::pipeline::CorsConfig;
use crate::pricing::{DEFAULT_MODEL, PricingEntry, PricingTable};
use crate::providers::{ChatProvider, DEFAULT_STREAM_BUFFER, LlmChatProvider};
use crate::ratelimit::RateLimitConfig;
use crate::types::ChatOptions;
use crate::usage::{PlansConfig, StaticPlanLookup};
use crate::{MimirError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Quota enforcement is enabled only when this section is present.
    #[serde(default)]
    pub plans: Option<PlansConfig>,
    #[serde(default)]
    pub pricing: PricingConfig,
}

/// LLM provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// One of "anthropic", "openai", "openrouter", "google", "ollama".
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Request timeout in seconds (default: 120).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Base URL override (Ollama, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Events buffered between a streaming provider and the caller.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: default_model(),
            timeout_secs: default_timeout(),
            max_tokens: default_max_tokens(),
            temperature: None,
            base_url: None,
            stream_buffer: default_stream_buffer(),
        }
    }
}

fn default_backend() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_max_tokens() -> usize {
    4096
}

fn default_stream_buffer() -> usize {
    DEFAULT_STREAM_BUFFER
}

impl ProviderConfig {
    /// The llm crate backend for `backend`.
    pub fn llm_backend(&self) -> Result<LLMBackend> {
        match self.backend.to_lowercase().as_str() {
            "anthropic" => Ok(LLMBackend::Anthropic),
            "openai" => Ok(LLMBackend::OpenAI),
            "openrouter" => Ok(LLMBackend::OpenRouter),
            "google" => Ok(LLMBackend::Google),
            "ollama" => Ok(LLMBackend::Ollama),
            other => Err(MimirError::Configuration(format!(
                "unknown provider backend: {other}"
            ))),
        }
    }

    /// Provider call options.
    pub fn chat_options(&self) -> ChatOptions {
        let mut options = ChatOptions::new(&self.model).max_tokens(self.max_tokens);
        if let Some(t) = self.temperature {
            options = options.temperature(t);
        }
        options
    }
}

/// Pricing overrides and additions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PricingConfig {
    /// Per-model entries, keyed by model id or family prefix.
    #[serde(default)]
    pub models: HashMap<String, PricingEntry>,
    /// Tier for models with no entry.
    #[serde(default)]
    pub default: Option<PricingEntry>,
}

impl PricingConfig {
    /// Built-in table with these overrides applied.
    pub fn table(&self) -> PricingTable {
        let mut table = PricingTable::new();
        for (model, entry) in &self.models {
            table = table.with_entry(model.clone(), *entry);
        }
        if let Some(default) = self.default {
            table = table.with_default_tier(default);
        }
        table
    }
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub anthropic: Option<ApiKeySecret>,
    #[serde(default)]
    pub openai: Option<ApiKeySecret>,
    #[serde(default)]
    pub openrouter: Option<ApiKeySecret>,
    #[serde(default)]
    pub google: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

/// Provider name → environment variable name mapping.
const PROVIDER_ENV_VARS: &[(&str, &str)] = &[
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("openai", "OPENAI_API_KEY"),
    ("openrouter", "OPENROUTER_API_KEY"),
    ("google", "GOOGLE_API_KEY"),
];

const CONFIG_DIR: &str = ".mimir";
const SYSTEM_DIR: &str = "/etc/mimir";

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Fails if no file is found.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?.ok_or_else(|| {
            MimirError::Configuration(
                "No config file found. Create ~/.mimir/config.toml or /etc/mimir/config.toml"
                    .to_string(),
            )
        })?;
        Self::load_from_file(&path)
    }

    /// Like [`load`](Self::load), but falls back to defaults when no file
    /// exists. An explicit path that does not exist is still an error.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MimirError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MimirError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(CONFIG_DIR).join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = Path::new(SYSTEM_DIR).join("config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }
        Ok(None)
    }

    /// Build the configured chat provider.
    pub fn build_provider(&self, secrets: &Secrets) -> Result<Arc<dyn ChatProvider>> {
        let backend = self.provider.llm_backend()?;
        let name = self.provider.backend.to_lowercase();
        let api_key = secrets.api_key(&name);
        if api_key.is_none() && !matches!(backend, LLMBackend::Ollama) {
            return Err(MimirError::NoProvider);
        }

        let mut provider =
            LlmChatProvider::new(backend, api_key, name).timeout_secs(self.provider.timeout_secs);
        if let Some(ref url) = self.provider.base_url {
            provider = provider.base_url(url.clone());
        }
        Ok(Arc::new(provider))
    }

    /// Assemble an orchestrator from this configuration around `provider`.
    pub fn orchestrator(&self, provider: Arc<dyn ChatProvider>) -> Orchestrator {
        let mut builder = Orchestrator::builder(provider)
            .rate_limit(self.rate_limit.clone())
            .cache_config(self.cache.clone())
            .cors(self.cors.clone())
            .pricing(self.pricing.table())
            .options(self.provider.chat_options())
            .stream_buffer(self.provider.stream_buffer);
        if let Some(ref plans) = self.plans {
            builder = builder.plans(Arc::new(StaticPlanLookup::new(plans.clone())));
        }
        builder.build()
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (keys may come from env vars).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(CONFIG_DIR).join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = Path::new(SYSTEM_DIR).join("secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load a secrets file, rejecting it if group or others can read it.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MimirError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            MimirError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(MimirError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// API key for a provider, falling back to its environment variable.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        let from_file = match provider {
            "anthropic" => self.anthropic.as_ref(),
            "openai" => self.openai.as_ref(),
            "openrouter" => self.openrouter.as_ref(),
            "google" => self.google.as_ref(),
            _ => None,
        }
        .map(|s| s.api_key.clone());

        from_file.or_else(|| {
            PROVIDER_ENV_VARS
                .iter()
                .find(|(name, _)| *name == provider)
                .and_then(|(_, env_var)| std::env::var(env_var).ok())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.provider.backend, "anthropic");
        assert_eq!(config.provider.model, DEFAULT_MODEL);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.cache.ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.sweep_threshold, 1000);
        assert!(config.plans.is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [provider]
            backend = "openrouter"
            model = "anthropic/claude-3-5-haiku"
            timeout_secs = 30
            temperature = 0.2

            [rate_limit]
            window_ms = 1000
            max_requests = 2

            [cache]
            ttl_secs = 60

            [cors]
            allowed_origins = ["https://app.example"]

            [plans]
            default_monthly_tokens = 5000
            [plans.overrides]
            vip = 1000000

            [pricing.models."my-model"]
            input_per_1k = 0.5
            output_per_1k = 1.0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(
            config.provider.llm_backend().unwrap(),
            LLMBackend::OpenRouter
        ));
        assert_eq!(config.provider.chat_options().temperature, Some(0.2));
        assert_eq!(config.rate_limit.max_requests, 2);
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.cors.allowed_origins, vec!["https://app.example"]);
        let plans = config.plans.as_ref().unwrap();
        assert_eq!(plans.default_monthly_tokens, 5000);
        assert_eq!(plans.overrides["vip"], 1_000_000);
        let table = config.pricing.table();
        assert_eq!(table.lookup("my-model"), PricingEntry::new(0.5, 1.0));
    }

    #[test]
    fn unknown_backend_is_a_configuration_error() {
        let config = ProviderConfig {
            backend: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.llm_backend(),
            Err(MimirError::Configuration(_))
        ));
    }

    #[test]
    fn api_key_from_secrets() {
        let secrets = Secrets {
            anthropic: Some(ApiKeySecret {
                api_key: "from-file".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(secrets.api_key("anthropic"), Some("from-file".to_string()));
        assert_eq!(secrets.api_key("nonexistent"), None);
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn ollama_needs_no_key() {
        let config: Config = toml::from_str("[provider]\nbackend = \"ollama\"\nmodel = \"llama3\"")
            .unwrap();
        let provider = config.build_provider(&Secrets::default()).unwrap();
        assert_eq!(provider.name(), "ollama");
    }
}
