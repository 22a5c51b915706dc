//! Configuration management for the chat agent.
//!
//! Configuration can be set via environment variables:
//! - `LLM_PROVIDER` - Optional. `openai` (default) or `aipipe`. Selects the base URL preset.
//! - `LLM_BASE_URL` - Optional. Overrides the provider preset.
//! - `LLM_API_KEY` - Optional. API key for the completion endpoint (falls back to `OPENAI_API_KEY`).
//!   Without it the agent runs in demo mode.
//! - `LLM_MODEL` - Optional. Model identifier. Defaults to `gpt-4o-mini`.
//! - `LLM_TIMEOUT_SECS` - Optional. HTTP timeout for completion requests. Defaults to `120`.
//! - `GOOGLE_API_KEY` / `GOOGLE_CX` - Optional. Google Custom Search credentials.
//!   Without both, search returns clearly labeled synthetic results.
//! - `GOOGLE_SEARCH_URL` - Optional. Custom Search endpoint. Defaults to the Google API.
//! - `EVAL_MAX_STEPS` - Optional. Step budget for sandboxed code evaluation. Defaults to `1000000`.

use std::time::Duration;
use thiserror::Error;

/// Default model when `LLM_MODEL` is not set.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Google Custom Search endpoint.
pub const GOOGLE_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Default step budget for the evaluation sandbox.
pub const DEFAULT_EVAL_MAX_STEPS: u64 = 1_000_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Completion endpoint presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    AiPipe,
}

impl Provider {
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "aipipe" => Some(Self::AiPipe),
            _ => None,
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::AiPipe => "https://aipipe.org/openai/v1",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::AiPipe => "AIPipe",
        }
    }
}

/// Connection settings for the completion endpoint.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL, without the trailing `/chat/completions`
    pub base_url: String,

    /// Bearer token
    pub api_key: String,

    /// Model identifier sent with every request
    pub model: String,

    /// Per-request HTTP timeout
    pub timeout: Duration,
}

impl LlmSettings {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Whether enough is set to start the agentic loop.
    pub fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.base_url.trim().is_empty()
    }

    /// Human-readable endpoint name for status lines.
    pub fn endpoint_label(&self) -> &'static str {
        if self.base_url.contains("aipipe") {
            Provider::AiPipe.display_name()
        } else {
            Provider::OpenAi.display_name()
        }
    }
}

// The API key never goes to logs.
impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Search provider endpoint and credentials.
#[derive(Clone)]
pub struct SearchConfig {
    pub google_api_key: Option<String>,
    pub google_cx: Option<String>,
    pub endpoint: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            google_cx: None,
            endpoint: GOOGLE_SEARCH_URL.to_string(),
        }
    }
}

impl SearchConfig {
    /// Returns the credential pair when both halves are present and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let key = self.google_api_key.as_deref().filter(|k| !k.trim().is_empty())?;
        let cx = self.google_cx.as_deref().filter(|c| !c.trim().is_empty())?;
        Some((key, cx))
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("endpoint", &self.endpoint)
            .field("configured", &self.credentials().is_some())
            .finish()
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Completion endpoint settings
    pub llm: LlmSettings,

    /// Search provider credentials
    pub search: SearchConfig,

    /// Step budget for the evaluation sandbox
    pub eval_max_steps: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing credentials are not an error; they leave the agent unconfigured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = match env_opt("LLM_PROVIDER") {
            Some(id) => Provider::from_id(&id).ok_or_else(|| {
                ConfigError::InvalidValue("LLM_PROVIDER".to_string(), format!("unknown provider: {}", id))
            })?,
            None => Provider::OpenAi,
        };

        let base_url = env_opt("LLM_BASE_URL").unwrap_or_else(|| provider.base_url().to_string());

        let api_key = env_opt("LLM_API_KEY")
            .or_else(|| env_opt("OPENAI_API_KEY"))
            .unwrap_or_default();

        let model = env_opt("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let timeout_secs: u64 = env_opt("LLM_TIMEOUT_SECS")
            .map(|v| {
                v.parse()
                    .map_err(|e| ConfigError::InvalidValue("LLM_TIMEOUT_SECS".to_string(), format!("{}", e)))
            })
            .transpose()?
            .unwrap_or(120);

        let eval_max_steps = env_opt("EVAL_MAX_STEPS")
            .map(|v| {
                v.parse()
                    .map_err(|e| ConfigError::InvalidValue("EVAL_MAX_STEPS".to_string(), format!("{}", e)))
            })
            .transpose()?
            .unwrap_or(DEFAULT_EVAL_MAX_STEPS);

        let search = SearchConfig {
            google_api_key: env_opt("GOOGLE_API_KEY"),
            google_cx: env_opt("GOOGLE_CX"),
            endpoint: env_opt("GOOGLE_SEARCH_URL").unwrap_or_else(|| GOOGLE_SEARCH_URL.to_string()),
        };

        Ok(Self {
            llm: LlmSettings {
                base_url,
                api_key,
                model,
                timeout: Duration::from_secs(timeout_secs),
            },
            search,
            eval_max_steps,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(llm: LlmSettings) -> Self {
        Self {
            llm,
            search: SearchConfig::default(),
            eval_max_steps: DEFAULT_EVAL_MAX_STEPS,
        }
    }
}

/// Read an env var, treating blank values as unset.
fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_presets() {
        assert_eq!(Provider::from_id("AIPipe"), Some(Provider::AiPipe));
        assert_eq!(Provider::from_id("openai"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_id("other"), None);
        assert_eq!(Provider::AiPipe.base_url(), "https://aipipe.org/openai/v1");
    }

    #[test]
    fn empty_key_or_url_is_not_configured() {
        assert!(!LlmSettings::new("https://api.openai.com/v1", "", DEFAULT_MODEL).is_configured());
        assert!(!LlmSettings::new("", "sk-test", DEFAULT_MODEL).is_configured());
        assert!(!LlmSettings::new("https://api.openai.com/v1", "   ", DEFAULT_MODEL).is_configured());
        assert!(LlmSettings::new("https://api.openai.com/v1", "sk-test", DEFAULT_MODEL).is_configured());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let settings = LlmSettings::new("https://aipipe.org/openai/v1", "sk-secret", "m");
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
        assert_eq!(settings.endpoint_label(), "AIPipe");
    }

    #[test]
    fn search_credentials_need_both_halves() {
        let mut search = SearchConfig::default();
        assert_eq!(search.endpoint, GOOGLE_SEARCH_URL);
        assert!(search.credentials().is_none());
        search.google_api_key = Some("key".to_string());
        assert!(search.credentials().is_none());
        search.google_cx = Some(" ".to_string());
        assert!(search.credentials().is_none());
        search.google_cx = Some("cx".to_string());
        assert_eq!(search.credentials(), Some(("key", "cx")));
    }
}
