//! Hands-free voice front end for a remote reasoning service.
//!
//! The [`orchestrator`] ties a speech engine, an optional wake-word detector
//! and a [`gateway::ReasoningGateway`] into one conversational turn loop.
//! Presentation layers drive it through an
//! [`orchestrator::OrchestratorHandle`] and render published snapshots.

pub mod config;
pub mod console;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod orchestrator;
pub mod session;
pub mod speech;
pub mod wakeword;

pub use error::{PulseError, Result};
