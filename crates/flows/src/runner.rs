//! The flow runner: one invocation, end to end.
//!
//! classify → compose → generate (with tools on the primary backend) →
//! merge tool data → fill → enforce policies → dispatch side effects.
//!
//! A run never fails for lack of an answer. Refusals and malformed output
//! become the localized apology; an unreachable fallback backend becomes the
//! localized "temporarily unavailable" sentence. Both still pass through the
//! policy engine, so the caller always gets a contract-valid value.

use crate::composer::ContextComposer;
use crate::dispatcher::{DEFAULT_TOOL_TIMEOUT, ToolDispatcher};
use crate::generation::{FreeformGenerator, Generation, GenerationRequest, Generator, StructuredGenerator};
use crate::handlers::{self, FlowHandler, TypedFlow};
use crate::normalize::canonicalize_enums;
use crate::severity::KeywordSeverityClassifier;
use chrono::Utc;
use healthflow_config::AppConfig;
use healthflow_core::contract::OutputContract;
use healthflow_core::error::{FlowError, StoreError, ToolError};
use healthflow_core::event::{DomainEvent, EventBus};
use healthflow_core::flow::{BackendChoice, FlowKind, FlowOutcome, FlowRequest, FlowResponse};
use healthflow_core::severity::{Severity, SeverityClassifier};
use healthflow_core::tool::ToolRegistry;
use healthflow_effects::SideEffectCoordinator;
use healthflow_policy::{PolicyEngine, PolicyError, PolicyInput, PolicySet, locale};
use healthflow_providers::BackendRouter;
use healthflow_tools::ToolKit;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default caller-side limit on one generation, tool round included.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors building a runner from configuration.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("policy setup failed: {0}")]
    Policy(#[from] PolicyError),

    #[error("tool setup failed: {0}")]
    Tool(#[from] ToolError),

    #[error("job store setup failed: {0}")]
    Store(#[from] StoreError),
}

struct RegisteredFlow {
    handler: Box<dyn FlowHandler>,
    contract: OutputContract,
    engine: PolicyEngine,
}

pub struct FlowRunner {
    flows: Vec<RegisteredFlow>,
    router: BackendRouter,
    toolkit: ToolKit,
    composer: ContextComposer,
    classifier: Arc<dyn SeverityClassifier>,
    dispatcher: Arc<ToolDispatcher>,
    coordinator: Arc<SideEffectCoordinator>,
    event_bus: Option<Arc<EventBus>>,
    timeout: Duration,
    tool_timeout: Duration,
}

impl FlowRunner {
    /// All built-in flows with their baseline and flow-specific policies.
    pub fn new(
        router: BackendRouter,
        toolkit: ToolKit,
        coordinator: Arc<SideEffectCoordinator>,
    ) -> Result<Self, PolicyError> {
        Self::build(router, toolkit, coordinator, &[])
    }

    /// Like [`FlowRunner::new`], adding the `[[policies]]` from config and
    /// taking the locale and timeout defaults from it.
    pub fn from_config(
        config: &AppConfig,
        router: BackendRouter,
        toolkit: ToolKit,
        coordinator: Arc<SideEffectCoordinator>,
    ) -> Result<Self, PolicyError> {
        let runner = Self::build(router, toolkit, coordinator, &config.policies)?;
        Ok(runner
            .with_composer(ContextComposer::new(&config.generation.default_locale))
            .with_timeout(Duration::from_secs(config.generation.timeout_secs)))
    }

    /// Everything from config: both backends, the tool kit, the SQLite job
    /// store and notification sinks. Events from the runner, the dispatcher
    /// and the coordinator all go to `bus`.
    pub async fn assemble(config: &AppConfig, bus: Arc<EventBus>) -> Result<Self, SetupError> {
        let router = healthflow_providers::build_from_config(config);
        let toolkit = ToolKit::from_config(&config.tools)?;
        let coordinator = SideEffectCoordinator::from_config(config).await?.with_event_bus(bus.clone());
        let runner = Self::from_config(config, router, toolkit, Arc::new(coordinator))?;
        info!(
            primary = %config.primary.model,
            fallback = %config.fallback.model,
            default_backend = config.generation.default_backend.as_str(),
            "Flow runner ready"
        );
        Ok(runner.with_event_bus(bus))
    }

    fn build(
        router: BackendRouter,
        toolkit: ToolKit,
        coordinator: Arc<SideEffectCoordinator>,
        extra: &[healthflow_config::PolicyConfig],
    ) -> Result<Self, PolicyError> {
        let mut flows = Vec::new();
        for handler in handlers::builtin() {
            let contract = handler.contract();
            let mut set = PolicySet::baseline(&contract);
            set.extend(handler.policies());
            set.extend(PolicySet::from_config(extra, handler.kind())?);
            set.validate_against(&contract)?;
            flows.push(RegisteredFlow {
                engine: PolicyEngine::new(set)?,
                contract,
                handler,
            });
        }

        Ok(Self {
            flows,
            router,
            toolkit,
            composer: ContextComposer::default(),
            classifier: Arc::new(KeywordSeverityClassifier::default()),
            dispatcher: Arc::new(ToolDispatcher::new(DEFAULT_TOOL_TIMEOUT)),
            coordinator,
            event_bus: None,
            timeout: DEFAULT_GENERATION_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SeverityClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_composer(mut self, composer: ContextComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self.rebuild_dispatcher();
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self.rebuild_dispatcher();
        self
    }

    fn rebuild_dispatcher(&mut self) {
        let mut dispatcher = ToolDispatcher::new(self.tool_timeout);
        if let Some(bus) = &self.event_bus {
            dispatcher = dispatcher.with_event_bus(bus.clone());
        }
        self.dispatcher = Arc::new(dispatcher);
    }

    /// The policy engine of one flow, for inspection and hot reload.
    pub fn policies(&self, kind: FlowKind) -> Option<&PolicyEngine> {
        self.flow(kind).map(|f| &f.engine)
    }

    pub fn contract(&self, kind: FlowKind) -> Option<&OutputContract> {
        self.flow(kind).map(|f| &f.contract)
    }

    pub fn coordinator(&self) -> &Arc<SideEffectCoordinator> {
        &self.coordinator
    }

    fn flow(&self, kind: FlowKind) -> Option<&RegisteredFlow> {
        self.flows.iter().find(|f| f.handler.kind() == kind)
    }

    /// Run one flow and deserialize its output.
    pub async fn run_typed<F: TypedFlow>(
        &self,
        request: &FlowRequest,
    ) -> Result<FlowResponse<F::Output>, FlowError> {
        let response = self.run(F::KIND, request).await;
        let output = serde_json::from_value(response.output)
            .map_err(|e| FlowError::MalformedOutput(format!("{} output: {e}", F::KIND)))?;
        Ok(FlowResponse {
            flow: response.flow,
            backend: response.backend,
            outcome: response.outcome,
            severity: response.severity,
            output,
            repairs: response.repairs,
            side_effects: response.side_effects,
        })
    }

    /// Run one flow. Always returns a contract-valid output.
    pub async fn run(&self, kind: FlowKind, request: &FlowRequest) -> FlowResponse {
        let started = Instant::now();
        let (choice, _) = self.router.resolve(request.backend);
        let severity = self.classifier.classify(&request.query);
        let locale = request.locale.as_deref().or(Some(self.composer.default_locale()));

        let Some(flow) = self.flow(kind) else {
            // Every kind is registered at construction.
            warn!(flow = %kind, "No handler registered");
            return FlowResponse {
                flow: kind,
                backend: choice,
                outcome: FlowOutcome::Apology,
                severity,
                output: json!({}),
                repairs: Vec::new(),
                side_effects: Vec::new(),
            };
        };

        debug!(flow = %kind, backend = choice.as_str(), severity = %severity, "Running flow");

        let (mut output, outcome) = if request.query.trim().is_empty() && request.image.is_none() {
            debug!(flow = %kind, "Empty request, skipping generation");
            (fallback_output(&flow.contract, locale::apology(locale)), FlowOutcome::Apology)
        } else {
            match self.generate(flow, request, choice, severity).await {
                Ok(generation) => {
                    let mut output = generation.output;
                    canonicalize_enums(&mut output, &flow.contract);
                    flow.handler.merge(&mut output, request, &generation.ledger);
                    (output, FlowOutcome::Answered)
                }
                Err(e) => self.recover(kind, choice, &flow.contract, locale, e),
            }
        };

        flow.contract.fill_missing(&mut output);
        let input = PolicyInput::new(kind)
            .with_locale(locale)
            .with_severity(severity);
        let (output, report) = flow.engine.enforce(output, &input);
        if let Some(bus) = &self.event_bus {
            for repair in &report.repairs {
                bus.publish(DomainEvent::PolicyRepaired {
                    flow: kind.to_string(),
                    rule: repair.rule.clone(),
                    field: repair.field.clone(),
                    timestamp: Utc::now(),
                });
            }
        }

        let intents = flow.handler.intents(&output, request);
        let side_effects = self.coordinator.dispatch(intents).await.descriptions;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            flow = %kind,
            backend = choice.as_str(),
            outcome = outcome.as_str(),
            severity = %severity,
            repairs = report.len(),
            side_effects = side_effects.len(),
            duration_ms,
            "Flow completed"
        );
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::FlowCompleted {
                flow: kind.to_string(),
                backend: choice.as_str().to_string(),
                outcome: outcome.as_str().to_string(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        FlowResponse {
            flow: kind,
            backend: choice,
            outcome,
            severity,
            output,
            repairs: report.summaries(),
            side_effects,
        }
    }

    async fn generate(
        &self,
        flow: &RegisteredFlow,
        request: &FlowRequest,
        choice: BackendChoice,
        severity: Severity,
    ) -> Result<Generation, FlowError> {
        let instruction = self.composer.compose(request, &flow.handler.profile());
        let backend = self.router.get(choice).clone();

        let (generator, tools): (Box<dyn Generator>, ToolRegistry) = match choice {
            BackendChoice::Primary => (
                Box::new(StructuredGenerator::new(backend, self.dispatcher.clone())),
                self.toolkit.registry(&flow.handler.tools(request, severity)),
            ),
            BackendChoice::Fallback => (Box::new(FreeformGenerator::new(backend)), ToolRegistry::new()),
        };

        let generation = generator.generate(GenerationRequest {
            instruction: &instruction,
            contract: &flow.contract,
            tools: &tools,
        });
        match tokio::time::timeout(self.timeout, generation).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::BackendUnavailable(format!(
                "no response within {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    fn recover(
        &self,
        kind: FlowKind,
        choice: BackendChoice,
        contract: &OutputContract,
        locale: Option<&str>,
        error: FlowError,
    ) -> (Value, FlowOutcome) {
        warn!(flow = %kind, backend = choice.as_str(), error = %error, "Generation failed");
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ErrorOccurred {
                context: format!("flow:{kind}"),
                error_message: error.to_string(),
                timestamp: Utc::now(),
            });
        }
        match (&error, choice) {
            (FlowError::BackendUnavailable(_), BackendChoice::Fallback) => (
                fallback_output(contract, locale::backend_error(locale)),
                FlowOutcome::BackendError,
            ),
            _ => (fallback_output(contract, locale::apology(locale)), FlowOutcome::Apology),
        }
    }
}

/// The contract skeleton with `text` in the primary field.
fn fallback_output(contract: &OutputContract, text: &str) -> Value {
    let mut output = contract.skeleton();
    if let Some(obj) = output.as_object_mut() {
        obj.insert(contract.primary_field.clone(), json!(text));
    }
    output
}
