//! Nearby clinics tool backed by a [`ClinicLocator`].
//!
//! In production the locator would call a maps/places API. The default
//! [`MockClinicLocator`] derives plausible clinics from a hash of the
//! location and specialty, so the same arguments always produce the same list.

use async_trait::async_trait;
use healthflow_core::error::ToolError;
use healthflow_core::flow::DirectoryEntry;
use healthflow_core::tool::{Tool, ToolResult};
use std::sync::Arc;

/// External "clinics near me" lookup.
#[async_trait]
pub trait ClinicLocator: Send + Sync {
    fn name(&self) -> &str;

    async fn locate(&self, location: &str, specialty: &str) -> Result<Vec<DirectoryEntry>, ToolError>;
}

/// Deterministic stand-in for a places API.
pub struct MockClinicLocator;

#[async_trait]
impl ClinicLocator for MockClinicLocator {
    fn name(&self) -> &str {
        "mock"
    }

    async fn locate(&self, location: &str, specialty: &str) -> Result<Vec<DirectoryEntry>, ToolError> {
        Ok(generate_mock_clinics(location, specialty))
    }
}

pub struct FindNearbyClinicsTool {
    locator: Arc<dyn ClinicLocator>,
}

impl FindNearbyClinicsTool {
    pub fn new(locator: Arc<dyn ClinicLocator>) -> Self {
        Self { locator }
    }
}

impl Default for FindNearbyClinicsTool {
    fn default() -> Self {
        Self::new(Arc::new(MockClinicLocator))
    }
}

#[async_trait]
impl Tool for FindNearbyClinicsTool {
    fn name(&self) -> &str {
        crate::FIND_NEARBY_CLINICS
    }

    fn description(&self) -> &str {
        "Find clinics near a location, optionally filtered by specialty. \
         Returns up to three clinics with address, distance, and walk-in availability."
    }

    fn usage_guidance(&self) -> &str {
        "Call only when the user needs in-person care and no local directory match is available."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City, neighbourhood, or postcode"
                },
                "specialty": {
                    "type": "string",
                    "description": "Kind of care needed (e.g. urgent care, dermatology)"
                }
            },
            "required": ["location"]
        })
    }

    fn output_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "clinics": { "type": "array", "items": { "type": "object" } }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let location = arguments["location"]
            .as_str()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'location' argument".into()))?;
        let specialty = arguments["specialty"].as_str().unwrap_or("general practice");

        let clinics = self.locator.locate(location, specialty).await?;
        let output = clinics
            .iter()
            .map(|c| format!("{} ({:.1} km)", c.name, c.distance_km.unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("; ");

        Ok(ToolResult::ok(
            String::new(),
            output,
            serde_json::json!({ "clinics": clinics }),
        ))
    }
}

/// Generate deterministic mock clinics based on a location/specialty hash.
fn generate_mock_clinics(location: &str, specialty: &str) -> Vec<DirectoryEntry> {
    let key = format!("{}|{}", location.trim().to_lowercase(), specialty.trim().to_lowercase());
    let hash: u32 = key
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    let prefixes = ["Maple", "Cedar", "Oakwood", "Bayview", "Hillcrest", "Parkside", "Westgate", "Sunrise"];
    let suffixes = ["Medical Center", "Health Clinic", "Care Partners"];
    let streets = ["High St", "Station Rd", "Market Sq", "Church Ln", "Queen St", "Mill Rd"];
    let specialty_label = title_case(specialty);

    (0..3u32)
        .map(|i| {
            let h = hash.wrapping_add(i.wrapping_mul(2654435761));
            let distance = 0.5 + ((h % 80) as f32) / 10.0 + i as f32;
            DirectoryEntry {
                id: format!("nearby-{:08x}-{i}", hash),
                name: format!(
                    "{} {} {}",
                    prefixes[(h as usize / 7) % prefixes.len()],
                    specialty_label,
                    suffixes[i as usize % suffixes.len()]
                ),
                address: format!("{} {}, {}", 1 + h % 300, streets[(h as usize / 3) % streets.len()], location.trim()),
                services: vec![specialty.to_lowercase()],
                walk_in: h % 3 == 0,
                distance_km: Some((distance * 10.0).round() / 10.0),
                phone: Some(format!("555-{:04}", h % 10000)),
            }
        })
        .collect()
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
