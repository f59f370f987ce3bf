//! mastery-core: Adaptive assessment engine, session storage, and the
//! content generation port.
//!
//! This crate defines the lesson model, the per-session state machine that
//! routes each answer to feedback, a rephrased question, or re-teaching, and
//! the traits the rest of the mastery system plugs into.

pub mod assessor;
pub mod controller;
pub mod error;
pub mod mock;
pub mod model;
pub mod parser;
pub mod report;
pub mod router;
pub mod selector;
pub mod service;
pub mod session;
pub mod store;
pub mod traits;

pub use controller::{AssessmentController, EngineConfig, OutputEvent};
pub use error::{EngineError, ErrorCode, GenerationError};
pub use model::{LearningOutcome, Lesson, MasteryConfig};
pub use service::AssessmentService;
pub use session::{Phase, SessionId, SessionState};
pub use store::{FileSessionStore, InMemorySessionStore, SessionStore};
