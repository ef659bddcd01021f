//! Error types for the HealthFlow domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all HealthFlow operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Flow errors ---
    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    // --- Job store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Notification errors ---
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Response blocked by safety filter: {0}")]
    Blocked(String),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failure taxonomy of a single flow invocation.
///
/// None of these reach an end user verbatim: refusals and malformed output
/// become the apology response, tool failures are fed back to the model, and
/// policy violations are repaired in place.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    #[error("Backend refused to answer: {0}")]
    Refusal(String),

    #[error("Backend output did not match the contract: {0}")]
    MalformedOutput(String),

    #[error("Tool {tool_name} failed: {reason}")]
    ToolFailure { tool_name: String, reason: String },

    #[error("Generation backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Policy rule {rule} violated: {detail}")]
    PolicyViolation { rule: String, detail: String },
}

impl FlowError {
    /// Whether this error means "the backend gave us nothing usable".
    pub fn is_missing_output(&self) -> bool {
        matches!(self, FlowError::Refusal(_) | FlowError::MalformedOutput(_))
    }
}

impl From<ProviderError> for FlowError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Blocked(reason) => FlowError::Refusal(reason),
            ProviderError::InvalidResponse(reason) => FlowError::MalformedOutput(reason),
            other => FlowError::BackendUnavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification sink not configured: {0}")]
    NotConfigured(String),

    #[error("Notification delivery failed via {sink}: {reason}")]
    DeliveryFailed { sink: String, reason: String },
}
