//! Tutor configuration and provider factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use mastery_core::controller::EngineConfig;
use mastery_core::model::MasteryConfig;
use mastery_core::traits::LlmProvider;

use crate::anthropic::AnthropicProvider;
use crate::generator::LlmContentGenerator;
use crate::mock::MockProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;

/// Configuration for a single LLM provider.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    OpenAI {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        org_id: Option<String>,
    },
    Anthropic {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
    },
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
    },
    /// Offline tutor that grades by keyword overlap.
    Mock,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::OpenAI {
                api_key: _,
                base_url,
                org_id,
            } => f
                .debug_struct("OpenAI")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .field("org_id", org_id)
                .finish(),
            ProviderConfig::Anthropic {
                api_key: _,
                base_url,
            } => f
                .debug_struct("Anthropic")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .finish(),
            ProviderConfig::Ollama { base_url } => f
                .debug_struct("Ollama")
                .field("base_url", base_url)
                .finish(),
            ProviderConfig::Mock => f.write_str("Mock"),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

/// Top-level tutor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorConfig {
    /// Provider configurations keyed by name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Default provider to use.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Default model to use.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Temperature for questions and explanations. Grading always runs at 0.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Retries per generation call after the first attempt.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Deadline for a single generation call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Where the CLI keeps session records.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,
    /// Fallback thresholds for lessons that set none.
    #[serde(default)]
    pub mastery: MasteryConfig,
}

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_retries() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    500
}
fn default_call_timeout() -> u64 {
    60
}
fn default_sessions_dir() -> PathBuf {
    PathBuf::from("./mastery-sessions")
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider(),
            default_model: default_model(),
            temperature: default_temperature(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
            call_timeout_secs: default_call_timeout(),
            sessions_dir: default_sessions_dir(),
            mastery: MasteryConfig::default(),
        }
    }
}

impl TutorConfig {
    /// Retry and timeout policy for the assessment controller.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            ..EngineConfig::default()
        }
    }

    /// Build a content generator for `provider` (or the default provider).
    ///
    /// `model` overrides `default_model`; the mock provider ignores it.
    pub fn generator(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<LlmContentGenerator> {
        let name = provider.unwrap_or(&self.default_provider);
        let provider_config = self.providers.get(name).with_context(|| {
            format!("provider '{name}' is not configured. Run `mastery init` or add it to mastery.toml")
        })?;
        let llm = create_provider(name, provider_config)?;
        let model = match provider_config {
            ProviderConfig::Mock => "mock-model",
            _ => model.unwrap_or(&self.default_model),
        };
        tracing::debug!(provider = name, model, "content generator ready");
        Ok(LlmContentGenerator::new(llm, model).with_temperature(self.temperature))
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Resolve env vars in a provider config.
fn resolve_provider_config(config: &ProviderConfig) -> ProviderConfig {
    match config {
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => ProviderConfig::OpenAI {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
            org_id: org_id.as_ref().map(|o| resolve_env_vars(o)),
        },
        ProviderConfig::Anthropic { api_key, base_url } => ProviderConfig::Anthropic {
            api_key: resolve_env_vars(api_key),
            base_url: base_url.as_ref().map(|u| resolve_env_vars(u)),
        },
        ProviderConfig::Ollama { base_url } => ProviderConfig::Ollama {
            base_url: resolve_env_vars(base_url),
        },
        ProviderConfig::Mock => ProviderConfig::Mock,
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `mastery.toml` in the current directory
/// 2. `~/.config/mastery/config.toml`
///
/// Environment variable overrides: `MASTERY_OPENAI_KEY`, `MASTERY_ANTHROPIC_KEY`.
pub fn load_config() -> Result<TutorConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<TutorConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("mastery.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => TutorConfig::default(),
    };

    if let Ok(key) = std::env::var("MASTERY_ANTHROPIC_KEY") {
        let entry = config
            .providers
            .entry("anthropic".into())
            .or_insert(ProviderConfig::Anthropic {
                api_key: String::new(),
                base_url: None,
            });
        if let ProviderConfig::Anthropic { api_key, .. } = entry {
            *api_key = key;
        }
    }

    if let Ok(key) = std::env::var("MASTERY_OPENAI_KEY") {
        let entry = config
            .providers
            .entry("openai".into())
            .or_insert(ProviderConfig::OpenAI {
                api_key: String::new(),
                base_url: None,
                org_id: None,
            });
        if let ProviderConfig::OpenAI { api_key, .. } = entry {
            *api_key = key;
        }
    }

    config.providers = config
        .providers
        .iter()
        .map(|(k, v)| (k.clone(), resolve_provider_config(v)))
        .collect();

    Ok(config)
}

/// Parse and check a config document.
pub fn parse_config(content: &str) -> Result<TutorConfig> {
    let config: TutorConfig = toml::from_str(content)?;
    config
        .mastery
        .validate()
        .context("invalid [mastery] defaults")?;
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("mastery"))
}

/// Create a provider instance from its configuration.
pub fn create_provider(name: &str, config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    match config {
        ProviderConfig::Anthropic { api_key, base_url } => {
            if api_key.is_empty() {
                anyhow::bail!("provider '{name}' has no API key; set MASTERY_ANTHROPIC_KEY");
            }
            Ok(Arc::new(AnthropicProvider::new(api_key, base_url.clone())))
        }
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => {
            if api_key.is_empty() {
                anyhow::bail!("provider '{name}' has no API key; set MASTERY_OPENAI_KEY");
            }
            Ok(Arc::new(OpenAiProvider::new(
                api_key,
                base_url.clone(),
                org_id.clone(),
            )))
        }
        ProviderConfig::Ollama { base_url } => Ok(Arc::new(OllamaProvider::new(base_url))),
        ProviderConfig::Mock => Ok(Arc::new(MockProvider::tutor())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_MASTERY_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_MASTERY_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_MASTERY_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${_MASTERY_UNSET_VAR}"), "");
        std::env::remove_var("_MASTERY_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = TutorConfig::default();
        assert_eq!(config.default_provider, "anthropic");
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.sessions_dir, PathBuf::from("./mastery-sessions"));

        let engine = config.engine_config();
        assert_eq!(engine.retry_delay, Duration::from_millis(500));
        assert_eq!(engine.call_timeout, Duration::from_secs(60));
    }

    #[test]
    fn parse_provider_config() {
        let toml_str = r#"
default_provider = "anthropic"
default_model = "claude-sonnet-4-20250514"
call_timeout_secs = 20

[providers.anthropic]
type = "anthropic"
api_key = "sk-test"

[providers.openai]
type = "openai"
api_key = "sk-openai"

[providers.ollama]
type = "ollama"

[providers.offline]
type = "mock"

[mastery]
mastery_threshold = 0.9
"#;
        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.providers.len(), 4);
        assert!(matches!(
            config.providers.get("ollama"),
            Some(ProviderConfig::Ollama { base_url }) if base_url == "http://localhost:11434"
        ));
        assert!(matches!(config.providers.get("offline"), Some(ProviderConfig::Mock)));
        assert_eq!(config.mastery.mastery_threshold, 0.9);
        assert_eq!(config.mastery.max_attempts, 2);
        assert_eq!(config.engine_config().call_timeout, Duration::from_secs(20));
    }

    #[test]
    fn invalid_mastery_defaults_are_rejected() {
        let err = parse_config("[mastery]\nmastery_threshold = 0.3\nrephrase_floor = 0.5\n")
            .unwrap_err();
        assert!(format!("{err:#}").contains("rephrase_floor"));
    }

    #[test]
    fn api_keys_are_masked_in_debug() {
        let config = ProviderConfig::Anthropic {
            api_key: "sk-secret".into(),
            base_url: None,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mastery.toml");
        std::fs::write(
            &path,
            "default_provider = \"offline\"\n\n[providers.offline]\ntype = \"mock\"\n",
        )
        .unwrap();

        let config = load_config_from(Some(&path)).unwrap();
        let generator = config.generator(None, Some("ignored")).unwrap();
        assert_eq!(generator.model(), "mock-model");

        assert!(load_config_from(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn unknown_or_keyless_provider_is_an_error() {
        let mut config = TutorConfig::default();
        let err = config.generator(Some("nope"), None).unwrap_err();
        assert!(err.to_string().contains("'nope' is not configured"));

        config.providers.insert(
            "anthropic".into(),
            ProviderConfig::Anthropic {
                api_key: String::new(),
                base_url: None,
            },
        );
        assert!(config.generator(None, None).is_err());
    }
}
