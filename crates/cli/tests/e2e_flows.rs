//! End-to-end tests for the HealthFlow flow pipeline.
//!
//! Each test drives a real [`FlowRunner`] (composer, dispatcher, tools,
//! policy engine, side-effect coordinator) with scripted backends.

use std::sync::Arc;
use std::time::Duration;

use healthflow_config::SchedulerConfig;
use healthflow_core::flow::{BackendChoice, DirectoryEntry, FlowKind, FlowOutcome, FlowRequest};
use healthflow_core::tool::Tool;
use healthflow_effects::{
    AlertKind, AuditLogger, FollowUpWorker, InMemoryJobStore, InMemoryNotifier, JobStore, NotificationCategory,
    SideEffectCoordinator,
};
use healthflow_flows::FlowRunner;
use healthflow_flows::handlers::document::CONSULT_PHRASE;
use healthflow_flows::handlers::mental_health::CRISIS_RESOURCE;
use healthflow_policy::locale;
use healthflow_providers::mock::{ScriptedProvider, make_text_response, make_tool_call, make_tool_call_response};
use healthflow_providers::{Backend, BackendRouter};
use healthflow_tools::{
    BOOK_APPOINTMENT, ClinicDirectory, FIND_NEARBY_CLINICS, SEARCH_DIRECTORY, SET_REMINDER, SearchDirectoryTool,
    ToolKit,
};
use serde_json::{Value, json};

const CHEST_PAIN: &str = "I have chest pain and can't breathe";

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    runner: FlowRunner,
    primary: Arc<ScriptedProvider>,
    fallback: Arc<ScriptedProvider>,
    sink: Arc<InMemoryNotifier>,
    store: Arc<InMemoryJobStore>,
}

fn harness(primary: ScriptedProvider, fallback: ScriptedProvider, booking_failure_rate: f64) -> Harness {
    let primary = Arc::new(primary);
    let fallback = Arc::new(fallback);
    let sink = Arc::new(InMemoryNotifier::new());
    let store = Arc::new(InMemoryJobStore::new());
    let coordinator = SideEffectCoordinator::new(sink.clone(), sink.clone(), store.clone(), Arc::new(AuditLogger::new()));

    let router = BackendRouter::new(
        Backend::new(primary.clone(), "primary-model"),
        Backend::new(fallback.clone(), "fallback-model"),
    );
    let runner = FlowRunner::new(
        router,
        ToolKit::seeded(ClinicDirectory::sample(), booking_failure_rate, 42),
        Arc::new(coordinator),
    )
    .unwrap();

    Harness {
        runner,
        primary,
        fallback,
        sink,
        store,
    }
}

fn answer(value: Value) -> ScriptedProvider {
    ScriptedProvider::new(vec![Ok(make_text_response(&value.to_string()))])
}

fn tool_then_answer(name: &str, args: Value, value: Value) -> ScriptedProvider {
    ScriptedProvider::new(vec![
        Ok(make_tool_call_response(vec![make_tool_call("call_0", name, args)])),
        Ok(make_text_response(&value.to_string())),
    ])
}

fn idle() -> ScriptedProvider {
    ScriptedProvider::new(vec![])
}

fn declared_tools(provider: &ScriptedProvider) -> Vec<String> {
    provider.requests()[0].tools.iter().map(|t| t.name.clone()).collect()
}

fn names(list: &Value) -> Vec<String> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap().to_string())
        .collect()
}

fn directory_entry(id: &str, name: &str) -> DirectoryEntry {
    DirectoryEntry {
        id: id.into(),
        name: name.into(),
        address: "5 Test Rd".into(),
        services: vec!["general practice".into()],
        walk_in: true,
        distance_km: Some(0.8),
        phone: None,
    }
}

/// Background deliveries finish shortly after `run` returns.
async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

// ── Care navigator ───────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_care_with_supplied_directory() {
    let h = harness(
        answer(json!({
            "response": "Supplied Clinic takes walk-ins.",
            "relevantClinics": [{"name": "Imaginary Clinic"}, {"name": "Another Invention"}],
            "bookingConfirmation": null,
            "resourceLinks": [],
            "disclaimer": ""
        })),
        idle(),
        0.0,
    );

    let request = FlowRequest::new("I need a GP today")
        .with_directory_matches(vec![directory_entry("d1", "Supplied Clinic"), directory_entry("d2", "Second Clinic")]);
    let response = h.runner.run(FlowKind::Care, &request).await;

    assert_eq!(response.outcome, FlowOutcome::Answered);
    let declared = declared_tools(&h.primary);
    assert!(!declared.contains(&FIND_NEARBY_CLINICS.to_string()));
    assert!(declared.contains(&SEARCH_DIRECTORY.to_string()));
    assert!(declared.contains(&BOOK_APPOINTMENT.to_string()));
    assert_eq!(names(&response.output["relevantClinics"]), vec!["Supplied Clinic", "Second Clinic"]);
}

#[tokio::test]
async fn e2e_care_directory_tool_replaces_model_clinics() {
    let h = harness(
        tool_then_answer(
            SEARCH_DIRECTORY,
            json!({"query": "dermatology"}),
            json!({
                "response": "A dermatologist can look at that rash.",
                "relevantClinics": [{"name": "Made Up Skin Centre"}],
                "resourceLinks": [],
                "disclaimer": ""
            }),
        ),
        idle(),
        0.0,
    );

    let response = h.runner.run(FlowKind::Care, &FlowRequest::new("Who can check a rash?")).await;

    assert_eq!(response.outcome, FlowOutcome::Answered);
    assert_eq!(names(&response.output["relevantClinics"]), vec!["Harbor Dermatology"]);
    assert_eq!(h.primary.call_count(), 2);
    // One tool round only: the follow-up call declares nothing.
    assert!(h.primary.requests()[1].tools.is_empty());
}

#[tokio::test]
async fn e2e_failed_booking_is_never_confirmed() {
    let h = harness(
        tool_then_answer(
            BOOK_APPOINTMENT,
            json!({"clinicName": "Eastside Urgent Care", "date": "Tuesday", "time": "3pm"}),
            json!({
                "response": "You're all set for Tuesday!",
                "relevantClinics": [],
                "bookingConfirmation": {"confirmationId": "APT-123456", "clinicName": "Eastside Urgent Care", "date": "Tuesday"},
                "resourceLinks": [],
                "disclaimer": ""
            }),
        ),
        idle(),
        1.0,
    );

    let request = FlowRequest::new("Book me at Eastside Urgent Care on Tuesday at 3pm").with_user("u1");
    let response = h.runner.run(FlowKind::Care, &request).await;

    assert_eq!(response.outcome, FlowOutcome::Answered);
    assert!(response.output["bookingConfirmation"].is_null());
    assert!(response.side_effects.is_empty());
}

#[tokio::test]
async fn e2e_confirmed_booking_notifies_user() {
    let h = harness(
        tool_then_answer(
            BOOK_APPOINTMENT,
            json!({"clinicName": "Eastside Urgent Care", "date": "Tuesday", "time": "3pm"}),
            json!({"response": "Booked.", "relevantClinics": [], "resourceLinks": [], "disclaimer": ""}),
        ),
        idle(),
        0.0,
    );

    let request = FlowRequest::new("Book me at Eastside Urgent Care on Tuesday at 3pm").with_user("u1");
    let response = h.runner.run(FlowKind::Care, &request).await;

    let confirmation = &response.output["bookingConfirmation"];
    assert!(confirmation["confirmationId"].as_str().unwrap().starts_with("APT-"));
    assert_eq!(confirmation["clinicName"], "Eastside Urgent Care");
    assert_eq!(response.side_effects, vec!["notify:appointment"]);

    let sink = h.sink.clone();
    wait_for(move || !sink.notifications().is_empty()).await;
    let (user, notification) = &h.sink.notifications()[0];
    assert_eq!(user, "u1");
    assert_eq!(notification.category, NotificationCategory::Appointment);
}

// ── Directory ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_directory_lookup_is_idempotent() {
    let tool = SearchDirectoryTool::new(Arc::new(ClinicDirectory::sample()));
    let args = json!({"query": "walk-in urgent care"});

    let first = tool.execute(args.clone()).await.unwrap();
    let second = tool.execute(args).await.unwrap();

    assert_eq!(first.data, second.data);
    assert!(!first.data.unwrap()["matches"].as_array().unwrap().is_empty());
}

// ── Document interpreter ─────────────────────────────────────────────────

#[tokio::test]
async fn e2e_lab_report_mentions_doctor() {
    let h = harness(
        answer(json!({
            "documentType": "lab report",
            "summary": "Your cholesterol panel.",
            "plainLanguageExplanation": "Your LDL is a little above the usual range",
            "keyFindings": ["LDL 142 mg/dL", "HDL 51 mg/dL"],
            "nextStepSuggestion": "Add more fibre to your meals.",
            "resourceLinks": [],
            "disclaimer": ""
        })),
        idle(),
        0.0,
    );

    let response = h.runner.run(FlowKind::Document, &FlowRequest::new("LDL 142 mg/dL, HDL 51 mg/dL")).await;

    assert_eq!(response.output["documentType"], "Lab Report");
    let explanation = response.output["plainLanguageExplanation"].as_str().unwrap();
    let next_step = response.output["nextStepSuggestion"].as_str().unwrap();
    assert!(explanation.contains(CONSULT_PHRASE) || next_step.contains(CONSULT_PHRASE));
    assert_eq!(declared_tools(&h.primary), vec![healthflow_tools::FETCH_PAGE]);
}

// ── Policies across flows ────────────────────────────────────────────────

#[tokio::test]
async fn e2e_disclaimer_and_list_caps_hold_for_every_flow() {
    let long: Vec<String> = (1..=12).map(|i| format!("item {i}")).collect();
    let clinics: Vec<Value> = (1..=12).map(|i| json!({"name": format!("Clinic {i}")})).collect();
    let links: Vec<Value> = (1..=12)
        .map(|i| json!({"title": format!("Page {i}"), "url": format!("https://medlineplus.gov/page{i}.html")}))
        .collect();

    for kind in FlowKind::ALL {
        let mut output = json!({
            "response": "Here is some guidance.",
            "summary": "A summary.",
            "plainLanguageExplanation": "Plain words.",
            "nextStepSuggestion": "Keep an eye on it.",
            "documentType": "Other",
            "emergencyDetected": false,
            "crisisDetected": false,
            "disclaimer": "Ask a professional."
        });
        let sizing = harness(idle(), idle(), 0.0);
        let contract = sizing.runner.contract(kind).unwrap().clone();
        for (field, _) in contract.list_caps() {
            let oversized = match field.as_str() {
                "relevantClinics" | "suggestedFacilities" | "matchedProfessionals" => json!(clinics),
                "resourceLinks" => json!(links),
                _ => json!(long),
            };
            output[field.as_str()] = oversized;
        }

        for locale_tag in ["en", "es-MX", "fr"] {
            let h = harness(answer(output.clone()), idle(), 0.0);
            let request = FlowRequest::new("Tell me more").with_locale(locale_tag);
            let response = h.runner.run(kind, &request).await;

            assert_eq!(response.outcome, FlowOutcome::Answered, "{kind} {locale_tag}");
            let disclaimer = response.output["disclaimer"].as_str().unwrap();
            assert!(
                disclaimer.starts_with(locale::canonical_disclaimer(Some(locale_tag))),
                "{kind} {locale_tag}: {disclaimer}"
            );
            for (field, max) in contract.list_caps() {
                let len = response.output[field.as_str()].as_array().map(Vec::len).unwrap_or(0);
                assert!(len <= max, "{kind}.{field} has {len} > {max}");
            }
        }
    }
}

#[tokio::test]
async fn e2e_missing_profile_renders_not_provided() {
    let h = harness(
        answer(json!({"response": "Start with a short walk.", "actionPlan": [], "disclaimer": ""})),
        idle(),
        0.0,
    );

    let response = h.runner.run(FlowKind::Lifestyle, &FlowRequest::new("I want more energy")).await;

    assert_eq!(response.outcome, FlowOutcome::Answered);
    let prompt: String = h.primary.requests()[0]
        .messages
        .iter()
        .map(|m| m.content.clone())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(prompt.contains("I want more energy"));
    assert!(prompt.contains("Not provided"));
}

// ── Emergencies ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_chest_pain_escalates_on_both_backends() {
    let calm = json!({
        "response": "Try to relax.",
        "emergencyDetected": false,
        "possibleCauses": [],
        "quickSuggestions": [],
        "resourceLinks": [],
        "suggestedFacilities": [],
        "disclaimer": ""
    });

    for backend in [BackendChoice::Primary, BackendChoice::Fallback] {
        let h = harness(answer(calm.clone()), ScriptedProvider::always("Try to relax."), 0.0);
        let request = FlowRequest::new(CHEST_PAIN).with_backend(backend).with_user("u7");
        let response = h.runner.run(FlowKind::Symptom, &request).await;

        assert_eq!(response.backend, backend);
        assert_eq!(response.output["emergencyDetected"], true, "{backend:?}");
        assert_eq!(response.output["emergencyAdvice"], locale::emergency_advice(Some("en")));
        assert_eq!(response.side_effects, vec!["alert:symptom"]);

        let sink = h.sink.clone();
        wait_for(move || !sink.alerts().is_empty()).await;
        let (user, alert) = &h.sink.alerts()[0];
        assert_eq!(user, "u7");
        assert_eq!(alert.kind, AlertKind::Emergency);
        assert!(!alert.dismissible);
        // Alerts never go through the routine notification sink.
        assert!(h.sink.notifications().is_empty());
    }
}

#[tokio::test]
async fn e2e_crisis_language_raises_anonymous_alert() {
    let h = harness(
        answer(json!({
            "response": "I'm really glad you told me.",
            "crisisDetected": false,
            "crisisResources": [],
            "copingStrategies": ["Breathe in for four counts"],
            "matchedProfessionals": [],
            "disclaimer": ""
        })),
        idle(),
        0.0,
    );

    let response = h
        .runner
        .run(FlowKind::MentalHealth, &FlowRequest::new("Some days I want to end my life"))
        .await;

    assert_eq!(response.output["crisisDetected"], true);
    assert_eq!(response.output["crisisResources"], json!([CRISIS_RESOURCE]));

    let sink = h.sink.clone();
    wait_for(move || !sink.alerts().is_empty()).await;
    let (user, alert) = &h.sink.alerts()[0];
    assert_eq!(user, healthflow_effects::ANONYMOUS_USER);
    assert_eq!(alert.kind, AlertKind::Crisis);
}

// ── Lifestyle: reminders and follow-ups ──────────────────────────────────

#[tokio::test]
async fn e2e_reminder_and_follow_up_are_delivered() {
    let h = harness(
        tool_then_answer(
            SET_REMINDER,
            json!({"title": "Evening walk", "time": "18:00"}),
            json!({
                "response": "Great plan. I set a reminder for your walk.",
                "actionPlan": ["Walk 20 minutes after dinner"],
                "quickSuggestions": [],
                "resourceLinks": [],
                "followUp": {"delayHours": 0.001, "checkInMessage": "How did the walk go?"},
                "disclaimer": ""
            }),
        ),
        idle(),
        0.0,
    );

    let request = FlowRequest::new("Remind me to walk every evening").with_user("u1");
    let response = h.runner.run(FlowKind::Lifestyle, &request).await;

    assert_eq!(response.output["reminderConfirmation"]["title"], "Evening walk");
    assert_eq!(response.output["reminderConfirmation"]["time"], "18:00");
    assert!(response.side_effects.contains(&"notify:reminder".to_string()));
    assert!(response.side_effects.iter().any(|s| s.starts_with("follow_up:")));
    assert_eq!(h.store.pending_count().await.unwrap(), 1);

    let worker = FollowUpWorker::new(h.store.clone(), h.sink.clone(), &SchedulerConfig::default());
    assert_eq!(worker.run_once().await.unwrap(), 1);
    assert_eq!(h.store.pending_count().await.unwrap(), 0);

    let sink = h.sink.clone();
    wait_for(move || sink.notifications().len() >= 2).await;
    let categories: Vec<NotificationCategory> = h.sink.notifications().iter().map(|(_, n)| n.category).collect();
    assert!(categories.contains(&NotificationCategory::Reminder));
    assert!(categories.contains(&NotificationCategory::FollowUp));
}

#[tokio::test]
async fn e2e_anonymous_follow_up_is_not_scheduled() {
    let h = harness(
        answer(json!({
            "response": "Keep it up.",
            "actionPlan": [],
            "followUp": {"delayHours": 24, "checkInMessage": "How is it going?"},
            "disclaimer": ""
        })),
        idle(),
        0.0,
    );

    let response = h.runner.run(FlowKind::Lifestyle, &FlowRequest::new("I started running")).await;

    assert!(response.output["reminderConfirmation"].is_null());
    assert!(response.side_effects.is_empty());
    assert_eq!(h.store.pending_count().await.unwrap(), 0);
}

// ── Backend failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_fallback_failure_surfaces_localized_error() {
    let fallback = ScriptedProvider::new(vec![Err(healthflow_core::error::ProviderError::Network(
        "connection refused".into(),
    ))]);
    let h = harness(idle(), fallback, 0.0);

    let request = FlowRequest::new("¿Qué significa mi análisis?")
        .with_backend(BackendChoice::Fallback)
        .with_locale("es");
    let response = h.runner.run(FlowKind::Symptom, &request).await;

    assert_eq!(response.outcome, FlowOutcome::BackendError);
    assert_eq!(response.output["response"], locale::backend_error(Some("es")));
    assert!(response.output["disclaimer"]
        .as_str()
        .unwrap()
        .starts_with(locale::canonical_disclaimer(Some("es"))));
    assert_eq!(h.fallback.call_count(), 1);
    assert_eq!(h.primary.call_count(), 0);
}
