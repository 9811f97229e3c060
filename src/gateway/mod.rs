//! Remote reasoning service interface.
//!
//! The orchestrator only ever sees the [`ReasoningGateway`] trait; the HTTP
//! implementation lives in [`http`].

pub mod http;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::session::TurnMode;

pub use http::HttpGateway;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Response parsing error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Identifier the service assigns to a submitted request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One chat or record submission
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub session_id: String,
    pub text: String,
    pub locale: String,
    pub hands_free: bool,
    pub mode: TurnMode,
}

/// Payload of a completed request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Answer {
    pub response: String,
    pub patient_name: Option<String>,
    /// Unmasked identifier as sent by the service
    pub patient_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Processing,
    Cancelling,
    Completed(Answer),
    Cancelled,
    Error(String),
    /// Status string this client does not understand
    Unknown(String),
}

impl PollStatus {
    /// True while the service is still working on the request
    pub fn is_pending(&self) -> bool {
        matches!(self, PollStatus::Processing | PollStatus::Cancelling)
    }
}

#[async_trait]
pub trait ReasoningGateway: Send + Sync {
    /// Submit to the chat or record endpoint depending on `request.mode`
    async fn submit(&self, request: &SubmitRequest) -> Result<RequestId, GatewayError>;

    async fn poll(&self, request_id: &RequestId) -> Result<PollStatus, GatewayError>;

    async fn cancel(&self, request_id: &RequestId) -> Result<String, GatewayError>;

    async fn reset_context(&self, session_id: &str) -> Result<String, GatewayError>;

    async fn set_global_context(&self, context: &str) -> Result<String, GatewayError>;

    async fn health_check(&self) -> Result<String, GatewayError>;
}
