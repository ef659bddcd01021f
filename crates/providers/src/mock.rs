//! Scripted provider for tests and offline runs.
//!
//! Each call to `complete` pops the next scripted result. Every request is
//! recorded so tests can assert on what the generators actually sent.

use async_trait::async_trait;
use healthflow_core::error::ProviderError;
use healthflow_core::message::{Message, MessageToolCall};
use healthflow_core::provider::{FinishReason, Provider, ProviderRequest, ProviderResponse, Usage};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    repeat: Option<ProviderResponse>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            repeat: None,
            delay: None,
        }
    }

    /// A provider that answers every call with the same text.
    pub fn always(text: &str) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.repeat = Some(make_text_response(text));
        provider
    }

    /// Sleep before answering (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        match (next, &self.repeat) {
            (Some(result), _) => result,
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => Err(ProviderError::NotConfigured("scripted provider has no more responses".into())),
        }
    }
}

/// A plain assistant reply.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        finish_reason: FinishReason::Stop,
        metadata: serde_json::Map::new(),
    }
}

/// An assistant reply that only requests tools.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>) -> ProviderResponse {
    let mut message = Message::assistant("");
    message.tool_calls = tool_calls;
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        finish_reason: FinishReason::ToolCalls,
        metadata: serde_json::Map::new(),
    }
}

pub fn make_tool_call(id: &str, name: &str, arguments: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }
}
