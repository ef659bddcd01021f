//! Severity classification seam.
//!
//! Emergency and crisis handling hangs off a single question: how severe
//! does the user's text sound? The default keyword classifier lives in the
//! flows crate; anything smarter plugs in here.

use serde::{Deserialize, Serialize};

/// Coarse severity of a user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Elevated,
    Urgent,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Elevated => "elevated",
            Severity::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies free text into a [`Severity`].
pub trait SeverityClassifier: Send + Sync {
    fn name(&self) -> &str;

    fn classify(&self, text: &str) -> Severity;
}
