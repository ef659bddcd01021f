//! Built-in tool implementations for HealthFlow.
//!
//! Tools let a flow act on the application's behalf: search the local
//! directory, find nearby clinics, book appointments, set reminders, and
//! fetch reference pages. Flows declare the subset they need through
//! [`ToolKit::registry`].

pub mod booking;
pub mod directory;
pub mod fetch_page;
pub mod nearby_clinics;
pub mod reminder;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use healthflow_config::ToolsConfig;
use healthflow_core::error::ToolError;
use healthflow_core::tool::{Tool, ToolRegistry};

pub use booking::BookAppointmentTool;
pub use directory::{ClinicDirectory, SearchDirectoryTool};
pub use fetch_page::FetchPageTool;
pub use nearby_clinics::{ClinicLocator, FindNearbyClinicsTool, MockClinicLocator};
pub use reminder::{Reminder, ReminderBook, SetReminderTool};

pub const SEARCH_DIRECTORY: &str = "search_directory";
pub const FIND_NEARBY_CLINICS: &str = "find_nearby_clinics";
pub const BOOK_APPOINTMENT: &str = "book_appointment";
pub const SET_REMINDER: &str = "set_reminder";
pub const FETCH_PAGE: &str = "fetch_page";

/// Shared tool instances, built once and handed out per flow.
#[derive(Clone)]
pub struct ToolKit {
    directory: Arc<ClinicDirectory>,
    reminders: Arc<ReminderBook>,
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolKit {
    /// Build every tool from configuration.
    pub fn from_config(config: &ToolsConfig) -> Result<Self, ToolError> {
        let directory = match &config.directory_path {
            Some(path) => ClinicDirectory::load(Path::new(path))?,
            None => ClinicDirectory::sample(),
        };
        Ok(Self::assemble(
            directory,
            BookAppointmentTool::new(config.booking_failure_rate),
            FetchPageTool::new(config.fetch_max_chars, Duration::from_secs(config.fetch_timeout_secs)),
        ))
    }

    /// Built-in directory with a fixed booking failure rate.
    pub fn with_failure_rate(failure_rate: f64) -> Self {
        Self::assemble(
            ClinicDirectory::sample(),
            BookAppointmentTool::new(failure_rate),
            FetchPageTool::new(4000, Duration::from_secs(10)),
        )
    }

    /// Reproducible booking outcomes for tests and demos.
    pub fn seeded(directory: ClinicDirectory, failure_rate: f64, seed: u64) -> Self {
        Self::assemble(
            directory,
            BookAppointmentTool::with_seed(failure_rate, seed),
            FetchPageTool::new(4000, Duration::from_secs(10)),
        )
    }

    fn assemble(directory: ClinicDirectory, booking: BookAppointmentTool, fetch: FetchPageTool) -> Self {
        let directory = Arc::new(directory);
        let reminders = Arc::new(ReminderBook::new());
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(SearchDirectoryTool::new(directory.clone())),
            Arc::new(FindNearbyClinicsTool::default()),
            Arc::new(booking),
            Arc::new(SetReminderTool::new(reminders.clone())),
            Arc::new(fetch),
        ];
        Self { directory, reminders, tools }
    }

    /// Replace (or add) a tool, e.g. a scripted stand-in.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
        self
    }

    /// A registry holding only the named tools. Unknown names are skipped.
    pub fn registry(&self, names: &[&str]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for tool in &self.tools {
            if names.contains(&tool.name()) {
                registry.register(tool.clone());
            }
        }
        registry
    }

    pub fn directory(&self) -> &ClinicDirectory {
        &self.directory
    }

    pub fn reminders(&self) -> &ReminderBook {
        &self.reminders
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}
