//! Output policies: declarative checks and repairs for flow responses.
//!
//! Every answer, whichever backend produced it, passes through a
//! [`PolicyEngine`] before it reaches the caller. Each [`PolicyRule`] is a
//! predicate over the output plus a deterministic repair:
//!
//! - "the disclaimer must start with the canonical text for the locale"
//! - "`quickSuggestions` holds at most 3 items"
//! - "a lab report explanation mentions talking to a doctor"
//! - "an urgent request always carries emergency advice"
//!
//! Violations are repaired in place and recorded in a [`PolicyReport`];
//! they never surface to the caller as errors.
//!
//! # Example Policy
//!
//! ```toml
//! [[policies]]
//! name = "short-suggestions"
//! type = "list_cap"
//! field = "quickSuggestions"
//! max = 2
//! priority = 25
//! ```

mod engine;
pub mod locale;
mod model;
pub mod text;

pub use engine::{PolicyEngine, PolicyInput, PolicyLogEntry, PolicyReport, Repair, enforce};
pub use model::{Policy, PolicyRule, PolicySet};

pub type PolicyResult<T> = std::result::Result<T, PolicyError>;

/// Errors from the policy subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },

    #[error("policy '{name}' targets field '{field}', which contract '{contract}' does not define")]
    UnknownField {
        name: String,
        field: String,
        contract: String,
    },

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("policy config error: {0}")]
    ConfigError(#[from] serde_json::Error),
}
