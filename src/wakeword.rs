//! Wake-word detector adapter interface.

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::orchestrator::Inbound;
use crate::session::TurnMode;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WakewordError {
    #[error("Wake-word detector unavailable: {0}")]
    Unavailable(String),
    #[error("Wake-word detector failed to start: {0}")]
    Start(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WakewordEvent {
    /// Index of the keyword that fired, as configured in the detector
    KeywordDetected(usize),
    Error(String),
}

#[derive(Clone)]
pub struct WakewordEventSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl WakewordEventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { tx }
    }

    /// Queue an event. Returns false once the orchestrator has stopped.
    pub fn send(&self, event: WakewordEvent) -> bool {
        self.tx.send(Inbound::Wakeword(event)).is_ok()
    }
}

/// Continuous low-power keyword listener
pub trait WakewordDetector: Send {
    fn initialize(&mut self, events: WakewordEventSender) -> Result<(), WakewordError>;

    fn start(&mut self) -> Result<(), WakewordError>;

    fn stop(&mut self);

    fn release(&mut self);
}

/// Which turn mode each keyword index starts
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMap {
    modes: HashMap<usize, TurnMode>,
}

impl KeywordMap {
    pub fn new(modes: HashMap<usize, TurnMode>) -> Self {
        Self { modes }
    }

    pub fn with_keyword(mut self, index: usize, mode: TurnMode) -> Self {
        self.modes.insert(index, mode);
        self
    }

    pub fn mode_for(&self, index: usize) -> Option<TurnMode> {
        self.modes.get(&index).copied()
    }
}

impl Default for KeywordMap {
    fn default() -> Self {
        Self::new(HashMap::from([
            (0, TurnMode::Conversational),
            (1, TurnMode::Conversational),
            (2, TurnMode::Dictation),
        ]))
    }
}
