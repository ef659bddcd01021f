//! Local clinic directory and the `search_directory` tool.
//!
//! The directory is a fixed in-process dataset, loaded from a JSON file or the
//! built-in sample. Lookups are pure functions of the query: the same query
//! against the same dataset always yields the same entries in the same order.

use async_trait::async_trait;
use healthflow_core::error::ToolError;
use healthflow_core::flow::DirectoryEntry;
use healthflow_core::tool::{Tool, ToolResult};
use std::path::Path;
use std::sync::Arc;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "near", "need", "want", "find", "looking", "some", "someone",
    "who", "can", "help", "please", "about", "have", "that", "this", "from",
];

const DEFAULT_LIMIT: usize = 5;

/// An immutable set of directory entries.
#[derive(Debug, Clone)]
pub struct ClinicDirectory {
    entries: Vec<DirectoryEntry>,
}

impl ClinicDirectory {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self { entries }
    }

    /// Load entries from a JSON array file.
    pub fn load(path: &Path) -> Result<Self, ToolError> {
        let content = std::fs::read_to_string(path).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "search_directory".into(),
            reason: format!("cannot read directory file {}: {e}", path.display()),
        })?;
        let entries: Vec<DirectoryEntry> = serde_json::from_str(&content).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "search_directory".into(),
            reason: format!("invalid directory file {}: {e}", path.display()),
        })?;
        Ok(Self::new(entries))
    }

    /// A small built-in dataset for local runs and tests.
    pub fn sample() -> Self {
        let entry = |id: &str, name: &str, address: &str, services: &[&str], walk_in: bool, phone: &str| DirectoryEntry {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            services: services.iter().map(|s| s.to_string()).collect(),
            walk_in,
            distance_km: None,
            phone: Some(phone.into()),
        };
        Self::new(vec![
            entry("dir-001", "Riverside Family Practice", "12 River Rd", &["general practice", "vaccinations", "pediatrics"], false, "555-0101"),
            entry("dir-002", "Eastside Urgent Care", "480 East Ave", &["urgent care", "x-ray", "stitches"], true, "555-0102"),
            entry("dir-003", "Harbor Dermatology", "7 Harbor St", &["dermatology", "skin screening"], false, "555-0103"),
            entry("dir-004", "Northgate Cardiology Associates", "220 Northgate Blvd", &["cardiology", "ecg", "blood pressure"], false, "555-0104"),
            entry("dir-005", "Mindful Path Counseling", "33 Elm St", &["counseling", "therapy", "anxiety", "depression"], false, "555-0105"),
            entry("dir-006", "Central Community Health Center", "1 Main St", &["general practice", "lab tests", "diabetes care"], true, "555-0106"),
            entry("dir-007", "Lakeside Women's Health", "90 Lake Dr", &["gynecology", "prenatal care"], false, "555-0107"),
            entry("dir-008", "Summit Physical Therapy", "410 Summit Way", &["physical therapy", "sports injury", "back pain"], false, "555-0108"),
        ])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive match on name, services, and address.
    ///
    /// Entries are ranked by how many query terms they hit, ties broken by id.
    /// No match yields an empty list.
    pub fn search(&self, query: &str, walk_in_only: bool, limit: usize) -> Vec<DirectoryEntry> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let terms: Vec<&str> = query
            .split(|c: char| !c.is_alphanumeric() && c != '-')
            .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t))
            .collect();

        let mut scored: Vec<(usize, &DirectoryEntry)> = self
            .entries
            .iter()
            .filter(|e| !walk_in_only || e.walk_in)
            .filter_map(|e| {
                let haystack = format!("{} {} {}", e.name, e.services.join(" "), e.address).to_lowercase();
                let mut score = terms.iter().filter(|t| haystack.contains(*t)).count();
                if haystack.contains(&query) {
                    score += terms.len().max(1);
                }
                (score > 0).then_some((score, e))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect()
    }
}

/// `search_directory`: look up the local directory.
pub struct SearchDirectoryTool {
    directory: Arc<ClinicDirectory>,
}

impl SearchDirectoryTool {
    pub fn new(directory: Arc<ClinicDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Tool for SearchDirectoryTool {
    fn name(&self) -> &str {
        crate::SEARCH_DIRECTORY
    }

    fn description(&self) -> &str {
        "Search the local directory of clinics and health professionals by specialty, service, or name. \
         Returns matching entries with address, services, and walk-in availability."
    }

    fn usage_guidance(&self) -> &str {
        "Call this first when the user needs a provider; prefer its entries over any you know of."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Specialty, service, or clinic name to search for"
                },
                "walkInOnly": {
                    "type": "boolean",
                    "description": "Only return clinics that accept walk-ins"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum entries to return (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    fn output_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "matches": { "type": "array", "items": { "type": "object" } }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let walk_in_only = arguments["walkInOnly"].as_bool().unwrap_or(false);
        let limit = arguments["limit"]
            .as_u64()
            .map(|l| l.clamp(1, 20) as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let matches = self.directory.search(query, walk_in_only, limit);
        let output = if matches.is_empty() {
            format!("No directory entries match '{query}'.")
        } else {
            let names: Vec<&str> = matches.iter().map(|m| m.name.as_str()).collect();
            format!("Found {} directory entries: {}", matches.len(), names.join(", "))
        };

        Ok(ToolResult::ok(
            String::new(),
            output,
            serde_json::json!({ "matches": matches }),
        ))
    }
}
