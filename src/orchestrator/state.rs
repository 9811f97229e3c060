use crate::gateway::RequestId;
use crate::session::{Session, TurnMode};
use crate::speech::UtteranceId;

/// Transition record for one user round trip.
///
/// `hands_free` is set only when the round began from a wake word and is
/// carried from `Recognizing` through `NetworkBusy` into `Speaking`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Round {
    pub mode: TurnMode,
    pub hands_free: bool,
}

impl Round {
    pub fn manual(mode: TurnMode) -> Self {
        Self {
            mode,
            hands_free: false,
        }
    }

    pub fn hands_free(mode: TurnMode) -> Self {
        Self {
            mode,
            hands_free: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExchange {
    /// Local generation number, bumped for every submission
    pub exchange: u64,
    /// Assigned by the service once the submit call returns
    pub request_id: Option<RequestId>,
    pub round: Round,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    WakeListening,
    Recognizing(Round),
    NetworkBusy(PendingExchange),
    Speaking { utterance: UtteranceId, round: Round },
}

impl OrchestratorState {
    pub fn round(&self) -> Option<&Round> {
        match self {
            OrchestratorState::Recognizing(round) => Some(round),
            OrchestratorState::NetworkBusy(pending) => Some(&pending.round),
            OrchestratorState::Speaking { round, .. } => Some(round),
            OrchestratorState::Idle | OrchestratorState::WakeListening => None,
        }
    }

    pub(crate) fn round_mut(&mut self) -> Option<&mut Round> {
        match self {
            OrchestratorState::Recognizing(round) => Some(round),
            OrchestratorState::NetworkBusy(pending) => Some(&mut pending.round),
            OrchestratorState::Speaking { round, .. } => Some(round),
            OrchestratorState::Idle | OrchestratorState::WakeListening => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, OrchestratorState::Idle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::WakeListening => "wake-listening",
            OrchestratorState::Recognizing(_) => "recognizing",
            OrchestratorState::NetworkBusy(_) => "network-busy",
            OrchestratorState::Speaking { .. } => "speaking",
        }
    }
}

/// What each leaf adapter has reported it can do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub recognizer: bool,
    pub tts: bool,
    pub wakeword: bool,
}

/// Read-only view published to the presentation layer after every event
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub session: Session,
    pub state: OrchestratorState,
    pub capabilities: Capabilities,
    pub reset_pending: bool,
    pub last_error: Option<String>,
}

impl Snapshot {
    pub fn is_listening(&self) -> bool {
        matches!(self.state, OrchestratorState::Recognizing(_))
    }

    pub fn is_speaking(&self) -> bool {
        matches!(self.state, OrchestratorState::Speaking { .. })
    }

    pub fn is_network_busy(&self) -> bool {
        matches!(self.state, OrchestratorState::NetworkBusy(_))
    }

    pub fn is_wake_armed(&self) -> bool {
        matches!(self.state, OrchestratorState::WakeListening)
    }
}
