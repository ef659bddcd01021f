//! Provider trait: the abstraction over generation backends.
//!
//! A Provider knows how to send a short message list to a model and get one
//! response back. The primary backend honours `response_schema`, `tools` and
//! `safety`; the fallback backend ignores all three and answers in free text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gemini-2.0-flash", "gpt-4o-mini")
    pub model: String,

    /// The messages for this round
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// JSON schema the final answer must conform to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,

    /// Content safety thresholds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetySettings>,
}

fn default_temperature() -> f32 {
    0.4
}

impl ProviderRequest {
    /// A plain request with no tools, schema, or safety settings.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            tools: Vec::new(),
            response_schema: None,
            safety: None,
        }
    }
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Harm categories covered by the safety configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmCategory {
    HarmCategoryDangerousContent,
    HarmCategoryHateSpeech,
    HarmCategorySexuallyExplicit,
    HarmCategoryHarassment,
}

/// Blocking threshold for a harm category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmThreshold {
    BlockLowAndAbove,
    BlockMediumAndAbove,
    BlockOnlyHigh,
}

/// One category/threshold pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyRule {
    pub category: HarmCategory,
    pub threshold: HarmThreshold,
}

/// The safety configuration attached to every primary request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySettings {
    pub rules: Vec<SafetyRule>,
}

impl SafetySettings {
    /// Dangerous content, hate speech, sexually explicit and harassment,
    /// all blocked at medium probability and above.
    pub fn standard() -> Self {
        let rules = [
            HarmCategory::HarmCategoryDangerousContent,
            HarmCategory::HarmCategoryHateSpeech,
            HarmCategory::HarmCategorySexuallyExplicit,
            HarmCategory::HarmCategoryHarassment,
        ]
        .into_iter()
        .map(|category| SafetyRule {
            category,
            threshold: HarmThreshold::BlockMediumAndAbove,
        })
        .collect();
        Self { rules }
    }
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self::standard()
    }
}

/// Why the backend stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Safety,
    Other,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Why generation stopped
    pub finish_reason: FinishReason,

    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// Both generation backends implement this trait. The generators call
/// `complete()` without knowing which wire protocol is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
