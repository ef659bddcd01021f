//! Gemini `generateContent` provider: the primary backend.
//!
//! Supports:
//! - Schema-constrained JSON output (`responseSchema`)
//! - Function calling (`functionDeclarations`)
//! - Per-request safety settings
//! - Inline image parts
//!
//! A request that carries both tools and a response schema sends the tools
//! only and moves the schema into the system instruction; the API rejects
//! function calling combined with a constrained response MIME type.

use async_trait::async_trait;
use healthflow_core::error::ProviderError;
use healthflow_core::message::{Message, MessageToolCall, Role};
use healthflow_core::provider::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

/// Google Gemini provider.
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Public Gemini API endpoint.
    pub fn google(api_key: impl Into<String>) -> Self {
        Self::new("https://generativelanguage.googleapis.com/v1beta", api_key)
    }

    /// Build the `generateContent` request body.
    fn build_body(request: &ProviderRequest) -> Value {
        let mut system_text: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .collect();

        let mut generation_config = json!({ "temperature": request.temperature });
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }

        if let Some(schema) = &request.response_schema {
            if request.tools.is_empty() {
                generation_config["responseMimeType"] = json!("application/json");
                generation_config["responseSchema"] = schema.clone();
            } else {
                system_text.push(format!(
                    "When you give your final answer, respond only with a JSON object matching this schema:\n{schema}"
                ));
            }
        }

        let mut body = json!({
            "contents": Self::to_api_contents(&request.messages),
            "generationConfig": generation_config,
        });

        if !system_text.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system_text.join("\n\n") }] });
        }

        if !request.tools.is_empty() {
            let declarations: Vec<ApiFunctionDeclaration> = request
                .tools
                .iter()
                .map(|t| ApiFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        if let Some(safety) = &request.safety {
            body["safetySettings"] = json!(safety.rules);
        }

        body
    }

    /// Convert our messages to Gemini `contents`.
    ///
    /// System messages travel in `systemInstruction`. Consecutive tool results
    /// are grouped into one user turn of `functionResponse` parts.
    fn to_api_contents(messages: &[Message]) -> Vec<ApiContent> {
        let mut contents: Vec<ApiContent> = Vec::new();
        for m in messages {
            match m.role {
                Role::System => {}
                Role::User => {
                    let mut parts = vec![ApiPart::text(&m.content)];
                    parts.extend(m.media.iter().map(|media| ApiPart {
                        inline_data: Some(ApiInlineData {
                            mime_type: media.mime_type.clone(),
                            data: media.data_base64.clone(),
                        }),
                        ..ApiPart::default()
                    }));
                    contents.push(ApiContent { role: "user".into(), parts });
                }
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !m.content.is_empty() {
                        parts.push(ApiPart::text(&m.content));
                    }
                    parts.extend(m.tool_calls.iter().map(|tc| ApiPart {
                        function_call: Some(ApiFunctionCall {
                            name: tc.name.clone(),
                            args: serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({})),
                        }),
                        ..ApiPart::default()
                    }));
                    contents.push(ApiContent { role: "model".into(), parts });
                }
                Role::Tool => {
                    let response = serde_json::from_str::<Value>(&m.content)
                        .ok()
                        .filter(Value::is_object)
                        .unwrap_or_else(|| json!({ "content": m.content }));
                    let part = ApiPart {
                        function_response: Some(ApiFunctionResponse {
                            name: m.tool_name.clone().unwrap_or_default(),
                            response,
                        }),
                        ..ApiPart::default()
                    };
                    let previous = contents
                        .last_mut()
                        .filter(|last| last.role == "user" && last.parts.iter().all(|p| p.function_response.is_some()));
                    match previous {
                        Some(last) => last.parts.push(part),
                        None => contents.push(ApiContent { role: "user".into(), parts: vec![part] }),
                    }
                }
            }
        }
        contents
    }

    /// Turn a parsed API response into our response type.
    fn from_api_response(api: ApiResponse, requested_model: &str) -> std::result::Result<ProviderResponse, ProviderError> {
        let Some(candidate) = api.candidates.into_iter().next() else {
            if let Some(reason) = api.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(ProviderError::Blocked(reason));
            }
            return Err(ProviderError::InvalidResponse("No candidates in response".into()));
        };

        let finish_reason = match candidate.finish_reason.as_deref() {
            Some("STOP") | None => FinishReason::Stop,
            Some("MAX_TOKENS") => FinishReason::Length,
            Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") | Some("SPII") | Some("RECITATION") => {
                FinishReason::Safety
            }
            Some(_) => FinishReason::Other,
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(MessageToolCall {
                    id: format!("call_{}", tool_calls.len()),
                    name: call.name,
                    arguments: call.args.to_string(),
                });
            }
        }

        let finish_reason = if !tool_calls.is_empty() && finish_reason == FinishReason::Stop {
            FinishReason::ToolCalls
        } else {
            finish_reason
        };

        let mut message = Message::assistant(text);
        message.tool_calls = tool_calls;

        let usage = api.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        Ok(ProviderResponse {
            message,
            usage,
            model: api.model_version.unwrap_or_else(|| requested_model.to_string()),
            finish_reason,
            metadata: serde_json::Map::new(),
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let body = Self::build_body(&request);

        debug!(
            provider = "gemini",
            model = %request.model,
            tools = request.tools.len(),
            schema = request.response_schema.is_some(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Gemini returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        Self::from_api_response(api_response, &request.model)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- Gemini API types ---

#[derive(Debug, Serialize)]
struct ApiContent {
    role: String,
    parts: Vec<ApiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<ApiInlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<ApiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<ApiFunctionResponse>,
}

impl ApiPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
struct ApiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<ApiPromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<ApiUsage>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidateContent {
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use healthflow_core::message::MediaPart;

    fn request_with(tools: Vec<ToolDefinition>, schema: Option<Value>) -> ProviderRequest {
        let mut req = ProviderRequest::new(
            "gemini-2.0-flash",
            vec![Message::system("You are a careful assistant."), Message::user("I have a headache")],
        );
        req.tools = tools;
        req.response_schema = schema;
        req.safety = Some(SafetySettings::standard());
        req
    }

    fn directory_tool() -> ToolDefinition {
        ToolDefinition {
            name: "search_directory".into(),
            description: "Search the local directory".into(),
            parameters: json!({"type": "object", "properties": {"query": {"type": "string"}}}),
        }
    }

    #[test]
    fn body_carries_schema_and_safety() {
        let body = GeminiProvider::build_body(&request_with(vec![], Some(json!({"type": "object"}))));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["responseSchema"]["type"], "object");
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_MEDIUM_AND_ABOVE");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are a careful assistant.");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn body_with_tools_moves_schema_to_instruction() {
        let body = GeminiProvider::build_body(&request_with(vec![directory_tool()], Some(json!({"type": "object"}))));
        assert!(body["generationConfig"].get("responseSchema").is_none());
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "search_directory");
        let system = body["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(system.contains("JSON object matching this schema"));
    }

    #[test]
    fn image_becomes_inline_data() {
        let msg = Message::user("What does this say?").with_media(MediaPart {
            mime_type: "image/jpeg".into(),
            data_base64: "/9j/4AAQ".into(),
        });
        let contents = GeminiProvider::to_api_contents(&[msg]);
        let json = serde_json::to_value(&contents).unwrap();
        assert_eq!(json[0]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
    }

    #[test]
    fn tool_results_are_grouped() {
        let mut assistant = Message::assistant("");
        assistant.tool_calls = vec![
            MessageToolCall { id: "call_0".into(), name: "a".into(), arguments: "{}".into() },
            MessageToolCall { id: "call_1".into(), name: "b".into(), arguments: "{\"x\":1}".into() },
        ];
        let messages = vec![
            Message::user("hi"),
            assistant,
            Message::tool_result("call_0", "a", "{\"success\":true}"),
            Message::tool_result("call_1", "b", "plain text"),
        ];
        let json = serde_json::to_value(GeminiProvider::to_api_contents(&messages)).unwrap();
        let contents = json.as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][1]["functionCall"]["args"]["x"], 1);
        assert_eq!(contents[2]["parts"].as_array().unwrap().len(), 2);
        assert_eq!(contents[2]["parts"][1]["functionResponse"]["response"]["content"], "plain text");
    }

    #[test]
    fn parse_text_response() {
        let raw = r#"{
            "candidates": [{"content": {"role": "model", "parts": [{"text": "{\"response\":\"ok\"}"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4, "totalTokenCount": 16}
        }"#;
        let api: ApiResponse = serde_json::from_str(raw).unwrap();
        let resp = GeminiProvider::from_api_response(api, "gemini-2.0-flash").unwrap();
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert_eq!(resp.message.content, "{\"response\":\"ok\"}");
        assert_eq!(resp.usage.unwrap().total_tokens, 16);
        assert_eq!(resp.model, "gemini-2.0-flash");
    }

    #[test]
    fn parse_function_call_response() {
        let raw = r#"{
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "book_appointment", "args": {"clinicId": "c1", "date": "next Tuesday"}}}
            ]}, "finishReason": "STOP"}]
        }"#;
        let api: ApiResponse = serde_json::from_str(raw).unwrap();
        let resp = GeminiProvider::from_api_response(api, "m").unwrap();
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.message.tool_calls.len(), 1);
        assert_eq!(resp.message.tool_calls[0].name, "book_appointment");
        assert!(resp.message.tool_calls[0].arguments.contains("next Tuesday"));
    }

    #[test]
    fn parse_safety_finish() {
        let raw = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        let api: ApiResponse = serde_json::from_str(raw).unwrap();
        let resp = GeminiProvider::from_api_response(api, "m").unwrap();
        assert_eq!(resp.finish_reason, FinishReason::Safety);
        assert!(resp.message.content.is_empty());
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let raw = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let api: ApiResponse = serde_json::from_str(raw).unwrap();
        let err = GeminiProvider::from_api_response(api, "m").unwrap_err();
        assert!(matches!(err, ProviderError::Blocked(_)));
    }

    #[test]
    fn empty_response_is_invalid() {
        let api: ApiResponse = serde_json::from_str("{}").unwrap();
        let err = GeminiProvider::from_api_response(api, "m").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let provider = GeminiProvider::new("http://127.0.0.1:1", "key");
        let err = provider
            .complete(ProviderRequest::new("m", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_) | ProviderError::Timeout(_)));
    }
}
