use tokio::sync::{mpsc, watch};

use super::state::Snapshot;
use super::{Command, Inbound};
use crate::error::{PulseError, Result};
use crate::session::TurnMode;

/// Command surface handed to the presentation layer.
///
/// Commands are queued onto the orchestrator's event sequence; their effect
/// shows up in the next published [`Snapshot`].
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Inbound>,
    snapshots: watch::Receiver<Snapshot>,
}

impl OrchestratorHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>, snapshots: watch::Receiver<Snapshot>) -> Self {
        Self { tx, snapshots }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(Inbound::Command(command))
            .map_err(|_| PulseError::OrchestratorStopped)
    }

    pub fn start_listening(&self, mode: TurnMode) -> Result<()> {
        self.send(Command::StartListening(mode))
    }

    pub fn stop_listening(&self) -> Result<()> {
        self.send(Command::StopListening)
    }

    pub fn send_text(&self, text: impl Into<String>, mode: TurnMode) -> Result<()> {
        self.send(Command::SendText {
            text: text.into(),
            mode,
        })
    }

    pub fn set_locale(&self, tag: impl Into<String>) -> Result<()> {
        self.send(Command::SetLocale(tag.into()))
    }

    pub fn toggle_privacy_mode(&self) -> Result<()> {
        self.send(Command::TogglePrivacyMode)
    }

    pub fn toggle_text_input_mode(&self) -> Result<()> {
        self.send(Command::ToggleTextInputMode)
    }

    pub fn clear_and_reset_context(&self) -> Result<()> {
        self.send(Command::ClearAndResetContext)
    }

    pub fn cancel_active_exchange(&self) -> Result<()> {
        self.send(Command::CancelActiveExchange)
    }

    /// Replace the service-wide prompt context shared by all sessions
    pub fn set_global_context(&self, context: impl Into<String>) -> Result<()> {
        self.send(Command::SetGlobalContext(context.into()))
    }

    /// Release every adapter and stop the event loop
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Latest published state
    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }
}
