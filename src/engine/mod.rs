//! Reconciliation and rotation engine.
//!
//! The orchestrator lists the group once and fans identities through the
//! per-identity reconciler; the waiter bridges the secret store's
//! asynchronous mutations and the reads that follow them.

pub mod cancel;
pub mod orchestrator;
pub mod reconciler;
pub mod report;
pub mod waiter;

pub use cancel::CancelSignal;
pub use orchestrator::{Orchestrator, PlanKind, PlannedAction, RunSettings};
pub use reconciler::{ReconcileState, Reconciler, RotationPath};
pub use report::{FailureStage, RotationOutcome, RotationStatus, RunReport, RunSummary};
pub use waiter::{wait_until, Poll, PollPolicy, WaitError};
