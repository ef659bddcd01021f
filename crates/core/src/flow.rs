//! Flow request and response DTOs.
//!
//! Profile and analytics snapshots arrive from the application as explicit,
//! versioned structures. Everything in a [`FlowRequest`] is read-only for the
//! lifetime of one invocation.

use serde::{Deserialize, Serialize};
use crate::severity::Severity;

/// Current version of [`ProfileSnapshot`] and [`DerivedAnalytics`].
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    SNAPSHOT_SCHEMA_VERSION
}

/// The five assistant features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Symptom,
    Lifestyle,
    Care,
    Document,
    MentalHealth,
}

impl FlowKind {
    pub const ALL: [FlowKind; 5] = [
        FlowKind::Symptom,
        FlowKind::Lifestyle,
        FlowKind::Care,
        FlowKind::Document,
        FlowKind::MentalHealth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Symptom => "symptom",
            FlowKind::Lifestyle => "lifestyle",
            FlowKind::Care => "care",
            FlowKind::Document => "document",
            FlowKind::MentalHealth => "mental_health",
        }
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlowKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "symptom" | "symptoms" => Ok(FlowKind::Symptom),
            "lifestyle" => Ok(FlowKind::Lifestyle),
            "care" | "care_navigator" => Ok(FlowKind::Care),
            "document" | "documents" => Ok(FlowKind::Document),
            "mental_health" | "mental" => Ok(FlowKind::MentalHealth),
            other => Err(format!("unknown flow: {other}")),
        }
    }
}

/// Which generation backend serves an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Primary,
    Fallback,
}

impl BackendChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendChoice::Primary => "primary",
            BackendChoice::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(BackendChoice::Primary),
            "fallback" => Ok(BackendChoice::Fallback),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Demographics {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub height_cm: Option<f32>,
    #[serde(default)]
    pub weight_kg: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    pub name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifestyleHabits {
    #[serde(default)]
    pub activity_level: Option<String>,
    #[serde(default)]
    pub diet: Option<String>,
    #[serde(default)]
    pub sleep_hours: Option<f32>,
    #[serde(default)]
    pub smoking: Option<bool>,
    #[serde(default)]
    pub alcohol: Option<String>,
}

/// Versioned snapshot of the user's health profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub demographics: Option<Demographics>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub lifestyle: Option<LifestyleHabits>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trend {
    pub metric: String,
    pub direction: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceSummary {
    pub rate_pct: f32,
    #[serde(default)]
    pub missed_doses_7d: u32,
}

/// Versioned analytics derived by the application from the user's logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAnalytics {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    #[serde(default)]
    pub trends: Vec<Trend>,
    #[serde(default)]
    pub adherence: Option<AdherenceSummary>,
    #[serde(default)]
    pub mood_pattern: Option<String>,
    #[serde(default)]
    pub reminders_due: Vec<String>,
}

/// Operational numbers the caller attaches for audit purposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationalMetrics {
    #[serde(default)]
    pub escalations_30d: Option<u32>,
    #[serde(default)]
    pub open_escalations: Option<u32>,
    #[serde(default)]
    pub last_escalation_at: Option<String>,
}

impl OperationalMetrics {
    pub fn is_empty(&self) -> bool {
        self.escalations_30d.is_none() && self.open_escalations.is_none() && self.last_escalation_at.is_none()
    }
}

/// An uploaded image (document photo, prescription, etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub mime_type: String,
    pub data_base64: String,
}

/// One entry of the local clinic/professional directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub walk_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Input to one flow invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRequest {
    pub query: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub profile: Option<ProfileSnapshot>,
    #[serde(default)]
    pub analytics: Option<DerivedAnalytics>,
    #[serde(default)]
    pub image: Option<ImageAttachment>,
    #[serde(default)]
    pub metrics: Option<OperationalMetrics>,
    /// Directory matches the application already resolved for this query.
    #[serde(default)]
    pub directory_matches: Option<Vec<DirectoryEntry>>,
    #[serde(default)]
    pub backend: Option<BackendChoice>,
}

impl FlowRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_profile(mut self, profile: ProfileSnapshot) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_analytics(mut self, analytics: DerivedAnalytics) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn with_backend(mut self, backend: BackendChoice) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_directory_matches(mut self, matches: Vec<DirectoryEntry>) -> Self {
        self.directory_matches = Some(matches);
        self
    }

    /// Directory matches supplied by the caller, if any are non-empty.
    pub fn supplied_directory(&self) -> Option<&[DirectoryEntry]> {
        self.directory_matches.as_deref().filter(|m| !m.is_empty())
    }

    /// Snapshot versions this build does not understand.
    pub fn unsupported_versions(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(p) = &self.profile {
            if p.schema_version != SNAPSHOT_SCHEMA_VERSION {
                out.push(format!("profile v{}", p.schema_version));
            }
        }
        if let Some(a) = &self.analytics {
            if a.schema_version != SNAPSHOT_SCHEMA_VERSION {
                out.push(format!("analytics v{}", a.schema_version));
            }
        }
        out
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowOutcome {
    /// The backend produced a usable answer
    Answered,
    /// Refusal or malformed output, replaced by the apology response
    Apology,
    /// The fallback backend could not be reached
    BackendError,
}

impl FlowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowOutcome::Answered => "answered",
            FlowOutcome::Apology => "apology",
            FlowOutcome::BackendError => "backend_error",
        }
    }
}

/// Output of one flow invocation, already policy-enforced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResponse<T = serde_json::Value> {
    pub flow: FlowKind,
    pub backend: BackendChoice,
    pub outcome: FlowOutcome,
    pub severity: Severity,
    pub output: T,
    /// Policy repairs applied to the raw output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repairs: Vec<String>,
    /// Side effects derived from this response
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<String>,
}

impl<T: Serialize> FlowResponse<T> {
    /// Erase the output type for transport.
    pub fn into_json(self) -> std::result::Result<FlowResponse<serde_json::Value>, serde_json::Error> {
        Ok(FlowResponse {
            flow: self.flow,
            backend: self.backend,
            outcome: self.outcome,
            severity: self.severity,
            output: serde_json::to_value(self.output)?,
            repairs: self.repairs,
            side_effects: self.side_effects,
        })
    }
}
