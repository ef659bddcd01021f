//! Flow orchestration for HealthFlow.
//!
//! Each of the five flows (symptom assistant, lifestyle coach, care
//! navigator, document interpreter, mental-health companion) is a
//! [`FlowHandler`]: an output contract plus a handful of hooks. The
//! [`FlowRunner`] drives every invocation through the same pipeline:
//!
//! 1. [`ContextComposer`] builds the instruction from the request.
//! 2. A [`Generator`] produces a contract-shaped value. The primary backend
//!    may call tools once, through the [`ToolDispatcher`]; the fallback
//!    backend answers in free text, which [`normalize`] maps onto the contract.
//! 3. Tool-sourced data is merged over model-authored data.
//! 4. The flow's policy engine repairs the value.
//! 5. Side-effect intents go to the coordinator.

pub mod composer;
pub mod dispatcher;
pub mod generation;
pub mod handlers;
pub mod normalize;
pub mod runner;
pub mod severity;

pub use composer::{ComposedInstruction, ComposerProfile, ContextComposer, Section};
pub use dispatcher::{ToolDispatcher, ToolLedger, ToolOutcome};
pub use generation::{FreeformGenerator, Generation, GenerationRequest, Generator, StructuredGenerator};
pub use handlers::{
    CareNavigator, CareOutput, DocumentInterpreter, DocumentOutput, DocumentType, FlowHandler, LifestyleCoach,
    LifestyleOutput, MentalHealthCompanion, MentalHealthOutput, SymptomAssistant, SymptomOutput, TypedFlow,
};
pub use normalize::normalize;
pub use runner::{DEFAULT_GENERATION_TIMEOUT, FlowRunner, SetupError};
pub use severity::KeywordSeverityClassifier;
