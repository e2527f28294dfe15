pub mod controller;
pub mod dispatcher;
pub mod failure;
pub mod gate;
pub mod orchestrator;
pub mod session;

pub use controller::{Effect, StageController};
pub use dispatcher::{CommandDispatcher, DispatchOutcome};
pub use failure::{ErrorRecord, FailureKind, FailureReporter, Presentation};
pub use gate::ConvergenceGate;
pub use orchestrator::{BootstrapOrchestrator, SessionHandle, SessionSubscriptions};
pub use session::{BootstrapSession, Handoff, SessionSnapshot, StageChange};
