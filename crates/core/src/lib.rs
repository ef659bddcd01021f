//! # HealthFlow Core
//!
//! Domain types, traits, and error definitions for the HealthFlow orchestration layer.
//! This crate has **zero framework dependencies**: it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is defined as a trait here (generation backends, tools, severity
//! classification). Implementations live in their respective crates. This enables:
//! - Swapping the primary and fallback backends per invocation
//! - Easy testing with scripted providers and deterministic tools
//! - Clean dependency graph (all crates depend inward on core)

pub mod contract;
pub mod error;
pub mod event;
pub mod flow;
pub mod message;
pub mod provider;
pub mod severity;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use contract::{ContractField, FieldKind, ItemKind, OutputContract, Property, Scalar};
pub use error::{Error, FlowError, NotifyError, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use flow::{
    BackendChoice, DerivedAnalytics, DirectoryEntry, FlowKind, FlowOutcome, FlowRequest,
    FlowResponse, ImageAttachment, OperationalMetrics, ProfileSnapshot,
};
pub use message::{MediaPart, Message, MessageToolCall, Role};
pub use provider::{
    FinishReason, Provider, ProviderRequest, ProviderResponse, SafetySettings, ToolDefinition, Usage,
};
pub use severity::{Severity, SeverityClassifier};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
