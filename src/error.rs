use thiserror::Error;

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::speech::SpeechError;
use crate::wakeword::WakewordError;

pub type Result<T> = std::result::Result<T, PulseError>;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Speech engine error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Wake-word error: {0}")]
    Wakeword(#[from] WakewordError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Orchestrator is no longer running")]
    OrchestratorStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
