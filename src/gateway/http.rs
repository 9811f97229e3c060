use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::{Answer, GatewayError, PollStatus, ReasoningGateway, RequestId, SubmitRequest};
use crate::config::ServiceConfig;
use crate::session::TurnMode;

#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    user_id: &'a str,
    message: &'a str,
    language: &'a str,
    hands_free: bool,
}

#[derive(Debug, Serialize)]
struct SessionBody<'a> {
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ContextBody<'a> {
    context: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    result: Option<AnswerPayload>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnswerPayload {
    response: String,
    patient_name: Option<String>,
    #[serde(rename = "SSN")]
    ssn: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Reasoning service reached over HTTP/JSON
pub struct HttpGateway {
    client: Client,
    base_url: Url,
    api_token: Option<SecretBox<String>>,
}

impl HttpGateway {
    pub fn new(config: &ServiceConfig) -> Result<Self, GatewayError> {
        let mut gateway = Self::with_timeouts(
            config.server_url.as_str(),
            config.connect_timeout,
            config.response_timeout,
        )?;
        gateway.api_token = config
            .api_token()
            .map(|token| SecretBox::new(Box::new(token.to_string())));
        Ok(gateway)
    }

    pub fn with_timeouts(
        base_url: &str,
        connect_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::Config(format!("invalid base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Config(format!(
                "URL '{}' cannot be used as a base",
                base_url
            )));
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(response_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_token: None,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Config(format!("bad base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<Response, GatewayError> {
        let url = self.endpoint(segments)?;
        log::debug!("POST {}", url);
        let response = self.authorize(self.client.post(url)).json(body).send().await?;
        check_status(response).await
    }

    async fn post_empty(&self, segments: &[&str]) -> Result<Response, GatewayError> {
        let url = self.endpoint(segments)?;
        log::debug!("POST {}", url);
        let response = self.authorize(self.client.post(url)).send().await?;
        check_status(response).await
    }

    async fn get(&self, segments: &[&str]) -> Result<Response, GatewayError> {
        let url = self.endpoint(segments)?;
        log::debug!("GET {}", url);
        let response = self.authorize(self.client.get(url)).send().await?;
        check_status(response).await
    }
}

#[async_trait]
impl ReasoningGateway for HttpGateway {
    async fn submit(&self, request: &SubmitRequest) -> Result<RequestId, GatewayError> {
        let path = match request.mode {
            TurnMode::Conversational => "chat",
            TurnMode::Dictation => "record",
        };
        let body = MessageBody {
            user_id: &request.session_id,
            message: &request.text,
            language: &request.locale,
            hands_free: request.hands_free,
        };

        let response = self.post_json(&[path], &body).await?;
        let submitted: SubmitResponse = parse_json(response).await?;
        if submitted.request_id.trim().is_empty() {
            return Err(GatewayError::ParseError("empty request_id".to_string()));
        }
        Ok(RequestId(submitted.request_id))
    }

    async fn poll(&self, request_id: &RequestId) -> Result<PollStatus, GatewayError> {
        let response = self.get(&["status", &request_id.0]).await?;
        let status: StatusResponse = parse_json(response).await?;
        Ok(interpret_status(status))
    }

    async fn cancel(&self, request_id: &RequestId) -> Result<String, GatewayError> {
        let response = self.post_empty(&["cancel", &request_id.0]).await?;
        ack_message(response).await
    }

    async fn reset_context(&self, session_id: &str) -> Result<String, GatewayError> {
        let body = SessionBody { user_id: session_id };
        let response = self.post_json(&["reset_user_context"], &body).await?;
        ack_message(response).await
    }

    async fn set_global_context(&self, context: &str) -> Result<String, GatewayError> {
        let body = ContextBody { context };
        let response = self.post_json(&["set_global_context"], &body).await?;
        ack_message(response).await
    }

    async fn health_check(&self) -> Result<String, GatewayError> {
        let response = self.get(&["test"]).await?;
        ack_message(response).await
    }
}

/// Turn non-2xx responses into `ApiError`, preferring the service's own message
async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.error.or(body.message))
        .unwrap_or(text);

    Err(GatewayError::ApiError {
        status: status.as_u16(),
        message,
    })
}

async fn parse_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, GatewayError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| GatewayError::ParseError(format!("{}: {}", e, text)))
}

async fn ack_message(response: Response) -> Result<String, GatewayError> {
    let ack: AckResponse = parse_json(response).await?;
    Ok(ack.message.unwrap_or_default())
}

fn interpret_status(status: StatusResponse) -> PollStatus {
    match status.status.trim().to_ascii_lowercase().as_str() {
        "processing" => PollStatus::Processing,
        "cancelling" => PollStatus::Cancelling,
        "cancelled" => PollStatus::Cancelled,
        "completed" => match status.result {
            Some(payload) => PollStatus::Completed(Answer {
                response: payload.response,
                patient_name: payload.patient_name,
                patient_id: payload.ssn,
            }),
            None => PollStatus::Error("completed without an answer".to_string()),
        },
        "error" => PollStatus::Error(
            status
                .error
                .unwrap_or_else(|| "unknown server error".to_string()),
        ),
        _ => PollStatus::Unknown(status.status),
    }
}
