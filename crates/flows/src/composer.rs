//! Context composer: turns a [`FlowRequest`] into one instruction.
//!
//! The instruction is a fixed preamble (persona, formatting rules, link
//! policy, locale) followed by labelled sections in a fixed order. Each flow
//! picks the sections it wants through its [`ComposerProfile`]. Missing data
//! renders as an explicit placeholder token, never as an error, and the same
//! request always composes to the same text.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use healthflow_core::flow::{
    DerivedAnalytics, DirectoryEntry, FlowRequest, OperationalMetrics, ProfileSnapshot,
};
use healthflow_core::message::{MediaPart, Message};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Placeholder for an absent scalar or object.
pub const NOT_PROVIDED: &str = "Not provided";

/// Placeholder for an absent or empty list.
pub const NONE_REPORTED: &str = "None reported";

/// Maximum reputable links a response may carry.
pub const MAX_RESOURCE_LINKS: usize = 3;

/// Instruction sections, in the order they are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    UserQuery,
    Demographics,
    KnownConditions,
    CurrentMedications,
    Allergies,
    Lifestyle,
    RiskFlags,
    Trends,
    MedicationAdherence,
    MoodPattern,
    UpcomingReminders,
    EscalationMetrics,
    LocalDirectoryMatches,
}

impl Section {
    pub const ALL: [Section; 13] = [
        Section::UserQuery,
        Section::Demographics,
        Section::KnownConditions,
        Section::CurrentMedications,
        Section::Allergies,
        Section::Lifestyle,
        Section::RiskFlags,
        Section::Trends,
        Section::MedicationAdherence,
        Section::MoodPattern,
        Section::UpcomingReminders,
        Section::EscalationMetrics,
        Section::LocalDirectoryMatches,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Section::UserQuery => "User Query",
            Section::Demographics => "Demographics",
            Section::KnownConditions => "Known Conditions",
            Section::CurrentMedications => "Current Medications",
            Section::Allergies => "Allergies",
            Section::Lifestyle => "Lifestyle",
            Section::RiskFlags => "Risk Flags",
            Section::Trends => "Trends",
            Section::MedicationAdherence => "Medication Adherence",
            Section::MoodPattern => "Mood Pattern",
            Section::UpcomingReminders => "Upcoming Reminders",
            Section::EscalationMetrics => "Escalation Metrics",
            Section::LocalDirectoryMatches => "Local Directory Matches",
        }
    }
}

/// What a flow wants from the composer.
#[derive(Debug, Clone)]
pub struct ComposerProfile {
    /// Who the assistant is for this flow.
    pub persona: String,
    /// Sections to render. Order here does not matter.
    pub sections: Vec<Section>,
    /// Flow-specific rules appended to the preamble.
    pub guidance: Vec<String>,
}

impl ComposerProfile {
    pub fn new(persona: impl Into<String>, sections: &[Section]) -> Self {
        Self {
            persona: persona.into(),
            sections: sections.to_vec(),
            guidance: Vec::new(),
        }
    }

    pub fn with_guidance(mut self, line: impl Into<String>) -> Self {
        self.guidance.push(line.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstructionPart {
    Text { text: String },
    Media { mime_type: String, data_base64: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionMetadata {
    pub sections: Vec<Section>,
    /// How many `Not provided` / `None reported` tokens were rendered.
    pub placeholders: usize,
    /// Rough size, at four characters per token.
    pub estimated_tokens: usize,
    pub has_media: bool,
    /// Snapshot schema versions this build does not know.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported_versions: Vec<String>,
}

/// The composed instruction for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedInstruction {
    pub system: String,
    pub parts: Vec<InstructionPart>,
    pub metadata: CompositionMetadata,
}

impl ComposedInstruction {
    /// The text of every text part, joined.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                InstructionPart::Text { text } => Some(text.as_str()),
                InstructionPart::Media { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// System + user messages, with media attached to the user turn.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut user = Message::user(self.text());
        for part in &self.parts {
            if let InstructionPart::Media { mime_type, data_base64 } = part {
                user = user.with_media(MediaPart {
                    mime_type: mime_type.clone(),
                    data_base64: data_base64.clone(),
                });
            }
        }
        vec![Message::system(&self.system), user]
    }

    /// Text-only messages for backends that cannot see media. Each image is
    /// replaced by a short note.
    pub fn to_text_messages(&self) -> Vec<Message> {
        let mut text = self.text();
        for part in &self.parts {
            if let InstructionPart::Media { mime_type, .. } = part {
                text.push_str(&format!(
                    "\n\n[An attachment ({mime_type}) was provided but cannot be viewed here. \
                     Answer from the text above and say that the attachment could not be read.]"
                ));
            }
        }
        vec![Message::system(&self.system), Message::user(text)]
    }
}

/// Builds instructions from requests.
#[derive(Debug, Clone)]
pub struct ContextComposer {
    default_locale: String,
}

impl Default for ContextComposer {
    fn default() -> Self {
        Self::new("en")
    }
}

impl ContextComposer {
    pub fn new(default_locale: impl Into<String>) -> Self {
        Self {
            default_locale: default_locale.into(),
        }
    }

    /// Locale used when a request does not name one.
    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn compose(&self, request: &FlowRequest, profile: &ComposerProfile) -> ComposedInstruction {
        let locale = request
            .locale
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.default_locale);
        let unsupported_versions = request.unsupported_versions();

        let system = self.preamble(profile, locale, &unsupported_versions);

        let mut sections = profile.sections.clone();
        sections.sort();
        sections.dedup();

        let mut placeholders = 0;
        let mut body = Vec::with_capacity(sections.len());
        for section in &sections {
            let rendered = render_section(*section, request);
            placeholders += count_placeholders(&rendered);
            body.push(format!("## {}\n{}", section.label(), rendered));
        }
        let text = body.join("\n\n");

        let mut parts = vec![InstructionPart::Text { text }];
        if let Some(media) = request.image.as_ref().and_then(valid_image) {
            parts.push(media);
        }
        let has_media = parts.len() > 1;

        let chars = system.chars().count()
            + parts
                .iter()
                .map(|p| match p {
                    InstructionPart::Text { text } => text.chars().count(),
                    InstructionPart::Media { .. } => 0,
                })
                .sum::<usize>();

        let metadata = CompositionMetadata {
            sections,
            placeholders,
            estimated_tokens: chars.div_ceil(4),
            has_media,
            unsupported_versions,
        };
        debug!(
            sections = metadata.sections.len(),
            placeholders,
            estimated_tokens = metadata.estimated_tokens,
            has_media,
            "Composed instruction"
        );

        ComposedInstruction { system, parts, metadata }
    }

    fn preamble(&self, profile: &ComposerProfile, locale: &str, unsupported: &[String]) -> String {
        let mut lines = vec![
            profile.persona.clone(),
            String::new(),
            "Formatting: write plain text only. Do not use markdown emphasis, headings, bullet symbols or code formatting."
                .to_string(),
            format!(
                "Resource links: include at most {MAX_RESOURCE_LINKS} links, and only to reputable public health sources \
                 (national health agencies, the WHO, major hospitals or established medical references). Never invent URLs."
            ),
            "Safety: you are not a doctor. Do not give a diagnosis; describe possibilities and when to seek care.".to_string(),
            format!("Respond in {locale}."),
        ];
        lines.extend(profile.guidance.iter().cloned());
        if !unsupported.is_empty() {
            lines.push(format!(
                "Note: some context comes from an unrecognised snapshot version ({}). Use it with caution.",
                unsupported.join(", ")
            ));
        }
        lines.join("\n")
    }
}

fn valid_image(image: &healthflow_core::flow::ImageAttachment) -> Option<InstructionPart> {
    if image.mime_type.trim().is_empty() {
        warn!("Dropping attachment without a MIME type");
        return None;
    }
    match STANDARD.decode(image.data_base64.trim()) {
        Ok(bytes) if !bytes.is_empty() => Some(InstructionPart::Media {
            mime_type: image.mime_type.trim().to_string(),
            data_base64: image.data_base64.trim().to_string(),
        }),
        Ok(_) => {
            warn!(mime_type = %image.mime_type, "Dropping empty attachment");
            None
        }
        Err(e) => {
            warn!(mime_type = %image.mime_type, error = %e, "Dropping attachment with invalid base64");
            None
        }
    }
}

fn count_placeholders(text: &str) -> usize {
    text.matches(NOT_PROVIDED).count() + text.matches(NONE_REPORTED).count()
}

fn or_not_provided<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| NOT_PROVIDED.to_string())
}

fn bullet_list<I: IntoIterator<Item = String>>(items: I) -> String {
    let lines: Vec<String> = items
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("- {s}"))
        .collect();
    if lines.is_empty() {
        NONE_REPORTED.to_string()
    } else {
        lines.join("\n")
    }
}

fn render_section(section: Section, request: &FlowRequest) -> String {
    let profile = request.profile.as_ref();
    let analytics = request.analytics.as_ref();
    match section {
        Section::UserQuery => or_not_provided(Some(request.query.trim())),
        Section::Demographics => demographics(profile),
        Section::KnownConditions => bullet_list(profile.map(|p| p.conditions.clone()).unwrap_or_default()),
        Section::CurrentMedications => bullet_list(
            profile
                .map(|p| {
                    p.medications
                        .iter()
                        .map(|m| {
                            let details: Vec<&str> =
                                [m.dosage.as_deref(), m.schedule.as_deref()].into_iter().flatten().collect();
                            if details.is_empty() {
                                m.name.clone()
                            } else {
                                format!("{} ({})", m.name, details.join(", "))
                            }
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default(),
        ),
        Section::Allergies => bullet_list(profile.map(|p| p.allergies.clone()).unwrap_or_default()),
        Section::Lifestyle => lifestyle(profile),
        Section::RiskFlags => bullet_list(analytics.map(|a| a.risk_flags.clone()).unwrap_or_default()),
        Section::Trends => trends(analytics),
        Section::MedicationAdherence => adherence(analytics),
        Section::MoodPattern => or_not_provided(analytics.and_then(|a| a.mood_pattern.as_deref())),
        Section::UpcomingReminders => bullet_list(analytics.map(|a| a.reminders_due.clone()).unwrap_or_default()),
        Section::EscalationMetrics => escalation_metrics(request.metrics.as_ref()),
        Section::LocalDirectoryMatches => directory(request.directory_matches.as_deref().unwrap_or_default()),
    }
}

fn demographics(profile: Option<&ProfileSnapshot>) -> String {
    let Some(d) = profile.and_then(|p| p.demographics.as_ref()) else {
        return NOT_PROVIDED.to_string();
    };
    [
        format!("Age: {}", or_not_provided(d.age)),
        format!("Sex: {}", or_not_provided(d.sex.as_deref())),
        format!("Location: {}", or_not_provided(d.location.as_deref())),
        format!("Height: {}", or_not_provided(d.height_cm.map(|h| format!("{h} cm")))),
        format!("Weight: {}", or_not_provided(d.weight_kg.map(|w| format!("{w} kg")))),
    ]
    .join("\n")
}

fn lifestyle(profile: Option<&ProfileSnapshot>) -> String {
    let Some(l) = profile.and_then(|p| p.lifestyle.as_ref()) else {
        return NOT_PROVIDED.to_string();
    };
    [
        format!("Activity level: {}", or_not_provided(l.activity_level.as_deref())),
        format!("Diet: {}", or_not_provided(l.diet.as_deref())),
        format!("Sleep: {}", or_not_provided(l.sleep_hours.map(|h| format!("{h} hours per night")))),
        format!(
            "Smoking: {}",
            or_not_provided(l.smoking.map(|s| if s { "yes" } else { "no" }))
        ),
        format!("Alcohol: {}", or_not_provided(l.alcohol.as_deref())),
    ]
    .join("\n")
}

fn trends(analytics: Option<&DerivedAnalytics>) -> String {
    bullet_list(
        analytics
            .map(|a| {
                a.trends
                    .iter()
                    .map(|t| match &t.summary {
                        Some(summary) if !summary.trim().is_empty() => {
                            format!("{}: {} ({})", t.metric, t.direction, summary.trim())
                        }
                        _ => format!("{}: {}", t.metric, t.direction),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default(),
    )
}

fn adherence(analytics: Option<&DerivedAnalytics>) -> String {
    match analytics.and_then(|a| a.adherence.as_ref()) {
        Some(a) => format!(
            "{:.0}% of doses taken; {} missed in the last 7 days",
            a.rate_pct, a.missed_doses_7d
        ),
        None => NOT_PROVIDED.to_string(),
    }
}

fn escalation_metrics(metrics: Option<&OperationalMetrics>) -> String {
    let Some(m) = metrics.filter(|m| !m.is_empty()) else {
        return NOT_PROVIDED.to_string();
    };
    [
        format!("Escalations in the last 30 days: {}", or_not_provided(m.escalations_30d)),
        format!("Open escalations: {}", or_not_provided(m.open_escalations)),
        format!("Last escalation: {}", or_not_provided(m.last_escalation_at.as_deref())),
    ]
    .join("\n")
}

fn directory(entries: &[DirectoryEntry]) -> String {
    bullet_list(entries.iter().map(|e| {
        let mut line = format!("{} [id: {}]", e.name, e.id);
        if !e.address.is_empty() {
            line.push_str(&format!(", {}", e.address));
        }
        if !e.services.is_empty() {
            line.push_str(&format!("; services: {}", e.services.join(", ")));
        }
        if e.walk_in {
            line.push_str("; accepts walk-ins");
        }
        if let Some(km) = e.distance_km {
            line.push_str(&format!("; {km:.1} km away"));
        }
        line
    }))
}
