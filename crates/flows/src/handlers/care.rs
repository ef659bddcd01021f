//! Care navigator: finds where to get care and books it.

use super::{
    ClinicRef, FlowHandler, ResourceLink, TypedFlow, clinic_properties, merge_directory, resource_link_properties,
};
use crate::composer::{ComposerProfile, Section};
use crate::dispatcher::ToolLedger;
use healthflow_core::contract::{OutputContract, Property};
use healthflow_core::flow::{FlowKind, FlowRequest};
use healthflow_core::severity::Severity;
use healthflow_effects::{Notification, NotificationCategory, SideEffectIntent};
use healthflow_tools::{BOOK_APPOINTMENT, FIND_NEARBY_CLINICS, SEARCH_DIRECTORY};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BookingConfirmation {
    pub confirmation_id: String,
    pub clinic_name: String,
    pub date: String,
    pub time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CareOutput {
    pub response: String,
    pub relevant_clinics: Vec<ClinicRef>,
    pub booking_confirmation: Option<BookingConfirmation>,
    pub resource_links: Vec<ResourceLink>,
    pub disclaimer: String,
}

pub struct CareNavigator;

impl TypedFlow for CareNavigator {
    const KIND: FlowKind = FlowKind::Care;
    type Output = CareOutput;
}

impl FlowHandler for CareNavigator {
    fn kind(&self) -> FlowKind {
        FlowKind::Care
    }

    fn contract(&self) -> OutputContract {
        OutputContract::new("care", "response")
            .text("response", "Where to go and what to expect")
            .object_list("relevantClinics", 5, clinic_properties(), "Clinics that fit the need")
            .object(
                "bookingConfirmation",
                vec![
                    Property::string("confirmationId"),
                    Property::string("clinicName"),
                    Property::string("date"),
                    Property::string("time").optional(),
                ],
                "Present only when the booking tool confirmed an appointment",
            )
            .object_list("resourceLinks", 3, resource_link_properties(), "Reputable public health links")
            .text("disclaimer", "Safety disclaimer")
    }

    fn profile(&self) -> ComposerProfile {
        ComposerProfile::new(
            "You are a care navigator. You help people find the right kind of care nearby \
             and book appointments when they ask.",
            &[
                Section::UserQuery,
                Section::Demographics,
                Section::KnownConditions,
                Section::LocalDirectoryMatches,
            ],
        )
        .with_guidance("Prefer clinics from the local directory matches when there are any.")
        .with_guidance("Only say an appointment is booked if the booking tool confirmed it.")
    }

    fn tools(&self, request: &FlowRequest, _severity: Severity) -> Vec<&'static str> {
        if request.supplied_directory().is_some() {
            vec![SEARCH_DIRECTORY, BOOK_APPOINTMENT]
        } else {
            vec![SEARCH_DIRECTORY, FIND_NEARBY_CLINICS, BOOK_APPOINTMENT]
        }
    }

    fn merge(&self, output: &mut Value, request: &FlowRequest, ledger: &ToolLedger) {
        merge_directory(output, "relevantClinics", request, ledger);
        let Some(obj) = output.as_object_mut() else {
            return;
        };
        let confirmation = match ledger.booking_confirmation() {
            Some(data) => json!({
                "confirmationId": data.get("confirmationId").cloned().unwrap_or_else(|| json!("")),
                "clinicName": data.get("clinicName").cloned().unwrap_or_else(|| json!("")),
                "date": data.get("date").cloned().unwrap_or_else(|| json!("")),
                "time": data.get("time").cloned().unwrap_or(Value::Null),
            }),
            None => Value::Null,
        };
        obj.insert("bookingConfirmation".into(), confirmation);
    }

    fn intents(&self, output: &Value, request: &FlowRequest) -> Vec<SideEffectIntent> {
        let Some(booking) = output
            .get("bookingConfirmation")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<BookingConfirmation>(v.clone()).ok())
        else {
            return Vec::new();
        };
        let when = match booking.time.as_deref().map(str::trim) {
            Some(time) if !time.is_empty() => format!("{} {time}", booking.date),
            _ => booking.date.clone(),
        };
        vec![SideEffectIntent::Notify {
            user_id: request.user_id.clone(),
            notification: Notification::new(
                NotificationCategory::Appointment,
                "Appointment confirmed",
                format!("{} on {when}. Confirmation {}.", booking.clinic_name, booking.confirmation_id),
            )
            .with_deep_link("/appointments"),
        }]
    }
}
