//! Backend router: maps a [`BackendChoice`] to a configured provider.
//!
//! Primary and fallback are mutually exclusive per invocation: the caller
//! picks one (or takes the configured default) and the router hands back that
//! backend. There is no retry from one to the other.

use std::sync::Arc;
use healthflow_config::AppConfig;
use healthflow_core::flow::BackendChoice;
use healthflow_core::provider::Provider;
use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// A provider plus the model settings it is called with.
#[derive(Clone)]
pub struct Backend {
    pub provider: Arc<dyn Provider>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Backend {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.4,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish()
    }
}

/// Routes an invocation to the primary or fallback backend.
#[derive(Debug, Clone)]
pub struct BackendRouter {
    primary: Backend,
    fallback: Backend,
    default_choice: BackendChoice,
}

impl BackendRouter {
    pub fn new(primary: Backend, fallback: Backend) -> Self {
        Self {
            primary,
            fallback,
            default_choice: BackendChoice::Primary,
        }
    }

    pub fn with_default(mut self, choice: BackendChoice) -> Self {
        self.default_choice = choice;
        self
    }

    /// Resolve the requested backend, or the default when none was requested.
    pub fn resolve(&self, requested: Option<BackendChoice>) -> (BackendChoice, &Backend) {
        let choice = requested.unwrap_or(self.default_choice);
        (choice, self.get(choice))
    }

    pub fn get(&self, choice: BackendChoice) -> &Backend {
        match choice {
            BackendChoice::Primary => &self.primary,
            BackendChoice::Fallback => &self.fallback,
        }
    }

    pub fn default_choice(&self) -> BackendChoice {
        self.default_choice
    }
}

/// Build both backends from configuration.
pub fn build_from_config(config: &AppConfig) -> BackendRouter {
    let primary = Backend::new(
        Arc::new(GeminiProvider::new(
            &config.primary.api_url,
            config.primary.api_key.clone().unwrap_or_default(),
        )),
        &config.primary.model,
    )
    .with_temperature(config.primary.temperature)
    .with_max_tokens(config.primary.max_tokens);

    let fallback = Backend::new(
        Arc::new(OpenAiCompatProvider::new(
            fallback_name(&config.fallback.api_url),
            &config.fallback.api_url,
            config.fallback.api_key.clone().unwrap_or_default(),
        )),
        &config.fallback.model,
    )
    .with_temperature(config.fallback.temperature)
    .with_max_tokens(config.fallback.max_tokens);

    BackendRouter::new(primary, fallback).with_default(config.generation.default_backend)
}

/// Name the fallback provider after its well-known host.
fn fallback_name(base_url: &str) -> &'static str {
    if base_url.contains("openrouter.ai") {
        "openrouter"
    } else if base_url.contains("api.openai.com") {
        "openai"
    } else if base_url.contains("11434") {
        "ollama"
    } else {
        "openai-compatible"
    }
}
