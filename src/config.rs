//! Configuration helpers for building providers from the environment.
//!
//! Thin conveniences over the constructors in [`crate::providers`]: a
//! [`ProviderKind`] enum with forgiving name parsing, the well-known API
//! key variable per hosted vendor, and a factory that assembles a boxed
//! provider from the environment.
//!
//! Environment variables:
//!
//! - `LLM_CONDUIT_BASE_URL`: override the base URL for the local
//!   chat-completions providers (Ollama, LM Studio)
//! - `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `GEMINI_API_KEY`,
//!   `XAI_API_KEY`, `OPENROUTER_API_KEY`, `ZEN_API_KEY`: hosted keys
//!
//! OAuth providers (Codex, Code Assist) need a token source and are
//! constructed directly, not through this factory.

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use crate::provider::Provider;
use crate::providers::{
    AnthropicProvider, GeminiProvider, OpenAiCompatProvider, OpenAiResponsesProvider,
};
use crate::{Error, Result};

/// Environment override for local chat-completions base URLs.
pub const BASE_URL_ENV: &str = "LLM_CONDUIT_BASE_URL";

/// Providers the environment factory can assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
    Ollama,
    LmStudio,
    Xai,
    OpenRouter,
    Zen,
}

impl ProviderKind {
    /// The environment variable holding this vendor's API key, if it
    /// needs one.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::Xai => Some("XAI_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Zen => Some("ZEN_API_KEY"),
            ProviderKind::Ollama | ProviderKind::LmStudio => None,
        }
    }

    /// Build the provider, reading keys (and the local base-URL override)
    /// from the environment.
    pub fn build(&self) -> Result<Arc<dyn Provider>> {
        let key = |name: &str| {
            env::var(name).map_err(|_| Error::config(format!("{name} is not set")))
        };

        Ok(match self {
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(key("ANTHROPIC_API_KEY")?)),
            ProviderKind::OpenAi => Arc::new(OpenAiResponsesProvider::new(key("OPENAI_API_KEY")?)),
            ProviderKind::Gemini => Arc::new(GeminiProvider::new(key("GEMINI_API_KEY")?)),
            ProviderKind::Xai => Arc::new(OpenAiCompatProvider::xai(key("XAI_API_KEY")?)),
            ProviderKind::OpenRouter => {
                Arc::new(OpenAiCompatProvider::openrouter(key("OPENROUTER_API_KEY")?))
            }
            ProviderKind::Zen => Arc::new(OpenAiCompatProvider::zen(key("ZEN_API_KEY")?)),
            ProviderKind::Ollama => Arc::new(local_compat(OpenAiCompatProvider::ollama())),
            ProviderKind::LmStudio => Arc::new(local_compat(OpenAiCompatProvider::lm_studio())),
        })
    }
}

fn local_compat(provider: OpenAiCompatProvider) -> OpenAiCompatProvider {
    match env::var(BASE_URL_ENV) {
        Ok(url) => OpenAiCompatProvider::new(provider.name().to_string(), url, None),
        Err(_) => provider,
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openai" | "chatgpt" | "responses" => Ok(ProviderKind::OpenAi),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "ollama" => Ok(ProviderKind::Ollama),
            "lmstudio" | "lm-studio" | "lm_studio" => Ok(ProviderKind::LmStudio),
            "xai" | "grok" => Ok(ProviderKind::Xai),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "zen" => Ok(ProviderKind::Zen),
            other => Err(Error::config(format!("unknown provider: {other}"))),
        }
    }
}

/// Parse a provider name and build it from the environment.
pub fn provider_from_name(name: &str) -> Result<Arc<dyn Provider>> {
    name.parse::<ProviderKind>()?.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str_aliases() {
        assert_eq!("anthropic".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
        assert_eq!("Claude".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert_eq!("lm-studio".parse::<ProviderKind>().unwrap(), ProviderKind::LmStudio);
        assert_eq!("grok".parse::<ProviderKind>().unwrap(), ProviderKind::Xai);
        assert!("frontier9000".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_api_key_env_names() {
        assert_eq!(ProviderKind::Anthropic.api_key_env(), Some("ANTHROPIC_API_KEY"));
        assert_eq!(ProviderKind::Ollama.api_key_env(), None);
    }

    #[test]
    fn test_build_local_needs_no_key() {
        let provider = ProviderKind::Ollama.build().unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn test_build_hosted_without_key_fails() {
        // SAFETY: test-local environment mutation; this variable belongs
        // to this library's test and nothing else reads it concurrently.
        unsafe {
            env::remove_var("ZEN_API_KEY");
        }
        assert!(ProviderKind::Zen.build().is_err());
    }
}
