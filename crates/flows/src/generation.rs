//! Generators: one trait, two backends.
//!
//! [`StructuredGenerator`] drives the primary backend: response schema,
//! safety settings, and at most one round of tool calls. [`FreeformGenerator`]
//! drives the fallback backend and normalizes its text into the contract.

use crate::composer::ComposedInstruction;
use crate::dispatcher::{ToolDispatcher, ToolLedger};
use crate::normalize::normalize;
use async_trait::async_trait;
use healthflow_core::contract::OutputContract;
use healthflow_core::error::FlowError;
use healthflow_core::flow::BackendChoice;
use healthflow_core::message::{Message, Role};
use healthflow_core::provider::{FinishReason, ProviderRequest, ProviderResponse, SafetySettings, Usage};
use healthflow_core::tool::ToolRegistry;
use healthflow_providers::Backend;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Inputs to one generation.
pub struct GenerationRequest<'a> {
    pub instruction: &'a ComposedInstruction,
    pub contract: &'a OutputContract,
    /// Tools declared for this invocation. Ignored by the freeform backend.
    pub tools: &'a ToolRegistry,
}

/// A contract-shaped answer plus what it took to get there.
#[derive(Debug, Clone)]
pub struct Generation {
    pub output: Value,
    pub ledger: ToolLedger,
    pub model: String,
    pub usage: Option<Usage>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn backend(&self) -> BackendChoice;

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Generation, FlowError>;
}

pub struct StructuredGenerator {
    backend: Backend,
    dispatcher: Arc<ToolDispatcher>,
    safety: SafetySettings,
}

impl StructuredGenerator {
    pub fn new(backend: Backend, dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            backend,
            dispatcher,
            safety: SafetySettings::standard(),
        }
    }

    fn request(&self, messages: Vec<Message>, contract: &OutputContract, tools: &ToolRegistry) -> ProviderRequest {
        let mut request = ProviderRequest::new(&self.backend.model, messages);
        request.temperature = self.backend.temperature;
        request.max_tokens = self.backend.max_tokens;
        request.tools = tools.definitions();
        request.response_schema = Some(contract.json_schema());
        request.safety = Some(self.safety.clone());
        request
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, FlowError> {
        let response = self.backend.provider.complete(request).await?;
        if response.finish_reason == FinishReason::Safety {
            return Err(FlowError::Refusal("response stopped by the safety filter".into()));
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for StructuredGenerator {
    fn backend(&self) -> BackendChoice {
        BackendChoice::Primary
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Generation, FlowError> {
        let mut messages = request.instruction.to_messages();
        let guidance = request.tools.guidance();
        if !guidance.is_empty() {
            if let Some(system) = messages.iter_mut().find(|m| m.role == Role::System) {
                system.content.push_str("\n\nTools you may call:\n");
                system.content.push_str(
                    &guidance.iter().map(|g| format!("- {g}")).collect::<Vec<_>>().join("\n"),
                );
            }
        }

        let first = self
            .complete(self.request(messages.clone(), request.contract, request.tools))
            .await?;
        let mut usage = first.usage.clone();
        let mut model = first.model.clone();
        let mut ledger = ToolLedger::default();

        let answer = if first.message.tool_calls.is_empty() || request.tools.is_empty() {
            first.message.content
        } else {
            debug!(count = first.message.tool_calls.len(), "Backend requested tools");
            let calls = first.message.tool_calls.clone();
            let results = self.dispatcher.dispatch_all(request.tools, &calls, &mut ledger).await;

            messages.push(first.message);
            for (call, result) in calls.iter().zip(&results) {
                messages.push(Message::tool_result(
                    &call.id,
                    &call.name,
                    result.to_model_payload().to_string(),
                ));
            }

            // No tools on the follow-up call, so no second round is possible.
            let second = self
                .complete(self.request(messages, request.contract, &ToolRegistry::new()))
                .await?;
            if !second.message.tool_calls.is_empty() {
                warn!(count = second.message.tool_calls.len(), "Ignoring tool calls after the tool round");
            }
            usage = add_usage(usage, second.usage);
            model = second.model;
            second.message.content
        };

        let output = parse_json_output(&answer)?;
        request
            .contract
            .validate(&output)
            .map_err(|problems| FlowError::MalformedOutput(problems.join("; ")))?;

        Ok(Generation { output, ledger, model, usage })
    }
}

pub struct FreeformGenerator {
    backend: Backend,
}

impl FreeformGenerator {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Generator for FreeformGenerator {
    fn backend(&self) -> BackendChoice {
        BackendChoice::Fallback
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Generation, FlowError> {
        let mut provider_request = ProviderRequest::new(&self.backend.model, request.instruction.to_text_messages());
        provider_request.temperature = self.backend.temperature;
        provider_request.max_tokens = self.backend.max_tokens;

        let response = self.backend.provider.complete(provider_request).await?;
        if response.finish_reason == FinishReason::Safety {
            return Err(FlowError::Refusal("response stopped by the content filter".into()));
        }
        if response.message.content.trim().is_empty() {
            return Err(FlowError::MalformedOutput("empty response".into()));
        }

        Ok(Generation {
            output: normalize(&response.message.content, request.contract),
            ledger: ToolLedger::default(),
            model: response.model,
            usage: response.usage,
        })
    }
}

fn add_usage(a: Option<Usage>, b: Option<Usage>) -> Option<Usage> {
    match (a, b) {
        (Some(a), Some(b)) => Some(Usage {
            prompt_tokens: a.prompt_tokens + b.prompt_tokens,
            completion_tokens: a.completion_tokens + b.completion_tokens,
            total_tokens: a.total_tokens + b.total_tokens,
        }),
        (a, b) => a.or(b),
    }
}

/// Parse a JSON object out of backend text, tolerating code fences and
/// stray prose around it.
pub fn parse_json_output(text: &str) -> Result<Value, FlowError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed)
        .trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(unfenced) {
        return Ok(value);
    }

    let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) else {
        return Err(FlowError::MalformedOutput("no JSON object in response".into()));
    };
    if end <= start {
        return Err(FlowError::MalformedOutput("no JSON object in response".into()));
    }
    match serde_json::from_str::<Value>(&unfenced[start..=end]) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(FlowError::MalformedOutput("response is not a JSON object".into())),
        Err(e) => Err(FlowError::MalformedOutput(format!("invalid JSON: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::{ComposerProfile, ContextComposer, Section};
    use healthflow_providers::mock::{ScriptedProvider, make_text_response, make_tool_call, make_tool_call_response};
    use healthflow_core::error::ProviderError;
    use healthflow_core::flow::FlowRequest;
    use healthflow_tools::{BOOK_APPOINTMENT, SEARCH_DIRECTORY, ToolKit};
    use serde_json::json;

    fn contract() -> OutputContract {
        OutputContract::new("care", "response")
            .text("response", "")
            .list("relevantClinics", 5, "")
            .text("disclaimer", "")
    }

    fn instruction() -> ComposedInstruction {
        ContextComposer::default().compose(
            &FlowRequest::new("Find me a dermatologist"),
            &ComposerProfile::new("You are a care navigator.", &[Section::UserQuery]),
        )
    }

    fn primary(provider: Arc<ScriptedProvider>) -> StructuredGenerator {
        StructuredGenerator::new(Backend::new(provider, "test-model"), Arc::new(ToolDispatcher::default()))
    }

    #[test]
    fn parses_fenced_and_wrapped_json() {
        assert_eq!(parse_json_output("```json\n{\"a\":1}\n```").unwrap(), json!({"a": 1}));
        assert_eq!(parse_json_output("Here you go: {\"a\":1} hope it helps").unwrap(), json!({"a": 1}));
        assert!(parse_json_output("no json here").is_err());
        assert!(parse_json_output("[1,2]").is_err());
    }

    #[tokio::test]
    async fn structured_request_carries_schema_and_safety() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(make_text_response(
            r#"{"response":"See a dermatologist.","relevantClinics":[],"disclaimer":"x"}"#,
        ))]));
        let generation = primary(provider.clone())
            .generate(GenerationRequest {
                instruction: &instruction(),
                contract: &contract(),
                tools: &ToolRegistry::new(),
            })
            .await
            .unwrap();

        assert_eq!(generation.output["response"], "See a dermatologist.");
        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].response_schema.is_some());
        assert_eq!(requests[0].safety, Some(SafetySettings::standard()));
        assert!(requests[0].tools.is_empty());
    }

    #[tokio::test]
    async fn one_tool_round_then_no_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(make_tool_call_response(vec![make_tool_call(
                "call_0",
                SEARCH_DIRECTORY,
                json!({"query": "dermatology"}),
            )])),
            Ok(make_text_response(
                r#"{"response":"Try Riverside Skin Clinic.","relevantClinics":[],"disclaimer":"x"}"#,
            )),
        ]));
        let registry = ToolKit::with_failure_rate(0.0).registry(&[SEARCH_DIRECTORY, BOOK_APPOINTMENT]);
        let generation = primary(provider.clone())
            .generate(GenerationRequest {
                instruction: &instruction(),
                contract: &contract(),
                tools: &registry,
            })
            .await
            .unwrap();

        assert_eq!(generation.ledger.outcomes().len(), 1);
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 2);
        assert!(requests[1].tools.is_empty());
        assert!(requests[0].messages[0].content.contains("Tools you may call"));
        let tool_message = requests[1].messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_message.tool_name.as_deref(), Some(SEARCH_DIRECTORY));
    }

    #[tokio::test]
    async fn invalid_json_is_malformed_output() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(make_text_response("I think you should rest."))]));
        let err = primary(provider)
            .generate(GenerationRequest {
                instruction: &instruction(),
                contract: &contract(),
                tools: &ToolRegistry::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::MalformedOutput(_)));
    }

    #[tokio::test]
    async fn contract_mismatch_is_malformed_output() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(make_text_response(
            r#"{"response": 42, "relevantClinics": "none"}"#,
        ))]));
        let err = primary(provider)
            .generate(GenerationRequest {
                instruction: &instruction(),
                contract: &contract(),
                tools: &ToolRegistry::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_missing_output());
    }

    #[tokio::test]
    async fn safety_stop_is_refusal() {
        let mut response = make_text_response("");
        response.finish_reason = FinishReason::Safety;
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(response)]));
        let err = primary(provider)
            .generate(GenerationRequest {
                instruction: &instruction(),
                contract: &contract(),
                tools: &ToolRegistry::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Refusal(_)));
    }

    #[tokio::test]
    async fn blocked_prompt_is_refusal() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Blocked("SAFETY".into()))]));
        let err = primary(provider)
            .generate(GenerationRequest {
                instruction: &instruction(),
                contract: &contract(),
                tools: &ToolRegistry::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Refusal(_)));
    }

    #[tokio::test]
    async fn freeform_text_is_normalized() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(make_text_response(
            "## Advice\nYou could see a **dermatologist**.",
        ))]));
        let generator = FreeformGenerator::new(Backend::new(provider.clone(), "fallback-model"));
        let generation = generator
            .generate(GenerationRequest {
                instruction: &instruction(),
                contract: &contract(),
                tools: &ToolKit::with_failure_rate(0.0).registry(&[SEARCH_DIRECTORY]),
            })
            .await
            .unwrap();

        assert_eq!(generation.output["response"], "Advice\nYou could see a dermatologist.");
        assert_eq!(generation.output["relevantClinics"], json!([]));
        let requests = provider.requests();
        assert!(requests[0].tools.is_empty());
        assert!(requests[0].response_schema.is_none());
        assert!(requests[0].safety.is_none());
    }

    #[tokio::test]
    async fn freeform_unavailable_is_backend_unavailable() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Network("refused".into()))]));
        let err = FreeformGenerator::new(Backend::new(provider, "m"))
            .generate(GenerationRequest {
                instruction: &instruction(),
                contract: &contract(),
                tools: &ToolRegistry::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn freeform_blank_text_is_malformed() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(make_text_response("   "))]));
        let err = FreeformGenerator::new(Backend::new(provider, "m"))
            .generate(GenerationRequest {
                instruction: &instruction(),
                contract: &contract(),
                tools: &ToolRegistry::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::MalformedOutput(_)));
    }
}
