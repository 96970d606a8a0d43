//! Test doubles for sessions without audio hardware.
//!
//! Simulated patients implement [`TrialRunner`](crate::trial::TrialRunner)
//! directly, so the threshold algorithm and the session orchestrator can be
//! exercised deterministically and instantly. Used by the integration tests
//! and by the CLI `simulate` command.

pub mod patient;
pub mod recording;

pub use patient::{ScriptedPatient, SimulatedPatient};
pub use recording::RecordingObserver;
