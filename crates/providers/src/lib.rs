//! Generation backend implementations for HealthFlow.
//!
//! All providers implement the `healthflow_core::Provider` trait.
//! The router selects the primary or fallback backend per invocation.

pub mod gemini;
pub mod mock;
pub mod openai_compat;
pub mod router;

pub use gemini::GeminiProvider;
pub use mock::ScriptedProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{Backend, BackendRouter, build_from_config};
