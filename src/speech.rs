//! Speech-to-text and text-to-speech engine adapter interface.
//!
//! Engines run on their own threads and report back through a
//! [`SpeechEventSender`], which marshals every callback onto the
//! orchestrator's single event sequence.

use std::fmt;
use strum::{Display, EnumString};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::orchestrator::Inbound;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeechError {
    #[error("Speech engine unavailable: {0}")]
    Unavailable(String),
    #[error("Recognition failed to start: {0}")]
    Recognition(String),
    #[error("Synthesis failed: {0}")]
    Synthesis(String),
}

/// Identifies one `speak` request so its lifecycle events can be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtteranceId(pub u64);

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "utt-{}", self.0)
    }
}

/// Recognition failure reasons, mirroring the usual platform recognizer codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RecognitionErrorCode {
    NetworkTimeout,
    Network,
    Audio,
    Server,
    Client,
    SpeechTimeout,
    NoMatch,
    RecognizerBusy,
    InsufficientPermissions,
    Unknown,
}

impl RecognitionErrorCode {
    /// Map a numeric platform recognizer code
    pub fn from_platform_code(code: i32) -> Self {
        match code {
            1 => Self::NetworkTimeout,
            2 => Self::Network,
            3 => Self::Audio,
            4 => Self::Server,
            5 => Self::Client,
            6 => Self::SpeechTimeout,
            7 => Self::NoMatch,
            8 => Self::RecognizerBusy,
            9 => Self::InsufficientPermissions,
            _ => Self::Unknown,
        }
    }
}

/// Lifecycle and result events emitted by a speech engine
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    RecognitionStarted,
    RecognitionStopped,
    PartialResult(String),
    FinalResult(String),
    RecognitionError(RecognitionErrorCode),
    TtsReady,
    TtsInitError(String),
    TtsStart(UtteranceId),
    TtsDone(UtteranceId),
    TtsError(UtteranceId, String),
}

/// Thread-safe handle engines use to deliver events
#[derive(Clone)]
pub struct SpeechEventSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl SpeechEventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { tx }
    }

    /// Queue an event. Returns false once the orchestrator has stopped.
    pub fn send(&self, event: SpeechEvent) -> bool {
        self.tx.send(Inbound::Speech(event)).is_ok()
    }
}

/// Combined recognizer and synthesizer.
///
/// All calls are fire-and-forget: outcomes arrive later as [`SpeechEvent`]s.
/// After a successful `start_recognition` the engine must eventually emit
/// either `FinalResult` or `RecognitionError`.
pub trait SpeechEngine: Send {
    fn initialize(&mut self, events: SpeechEventSender) -> Result<(), SpeechError>;

    fn start_recognition(&mut self, locale: &str) -> Result<(), SpeechError>;

    fn stop_recognition(&mut self);

    fn speak(&mut self, text: &str, locale: &str, utterance: UtteranceId)
        -> Result<(), SpeechError>;

    fn stop_speaking(&mut self);

    fn release(&mut self);
}
