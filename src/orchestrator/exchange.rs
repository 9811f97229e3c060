//! One submit + poll (+ cancel) round trip against the reasoning service.
//!
//! The task never touches session state. It reports back through the
//! orchestrator's queue, tagged with its generation number, and exits
//! without reporting once its token is cancelled.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Inbound;
use crate::gateway::{Answer, PollStatus, ReasoningGateway, RequestId, SubmitRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollPolicy {
    pub interval: Duration,
    pub max_failures: u32,
}

#[derive(Debug)]
pub(crate) struct ExchangeEvent {
    pub exchange: u64,
    pub update: ExchangeUpdate,
}

#[derive(Debug)]
pub(crate) enum ExchangeUpdate {
    Submitted(RequestId),
    Finished(ExchangeOutcome),
}

#[derive(Debug)]
pub(crate) enum ExchangeOutcome {
    Completed(Answer),
    Cancelled,
    Failed(String),
}

/// Orchestrator-side bookkeeping for the exchange in flight
pub(crate) struct ActiveExchange {
    pub id: u64,
    pub token: CancellationToken,
    /// Transcript index of the "processing" system turn
    pub placeholder: usize,
}

pub(crate) struct ExchangeReporter {
    exchange: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl ExchangeReporter {
    pub fn new(exchange: u64, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { exchange, tx }
    }

    fn report(&self, update: ExchangeUpdate) {
        let event = ExchangeEvent {
            exchange: self.exchange,
            update,
        };
        if self.tx.send(Inbound::Exchange(event)).is_err() {
            log::debug!("Orchestrator gone, dropping update for exchange {}", self.exchange);
        }
    }
}

pub(crate) async fn run_exchange(
    gateway: Arc<dyn ReasoningGateway>,
    request: SubmitRequest,
    policy: PollPolicy,
    token: CancellationToken,
    reporter: ExchangeReporter,
) {
    // The submit is allowed to finish so a request the service already
    // accepted can still be cancelled on its side.
    let request_id = match gateway.submit(&request).await {
        Ok(id) => id,
        Err(e) => {
            if token.is_cancelled() {
                log::debug!("Submit failed after cancellation: {}", e);
            } else {
                log::warn!("📡 Submit failed: {}", e);
                reporter.report(ExchangeUpdate::Finished(ExchangeOutcome::Failed(
                    e.to_string(),
                )));
            }
            return;
        }
    };

    if token.is_cancelled() {
        send_cancel(gateway.as_ref(), &request_id).await;
        return;
    }

    log::info!("📡 Request {} accepted ({})", request_id, request.mode);
    reporter.report(ExchangeUpdate::Submitted(request_id.clone()));

    let mut failures = 0u32;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(policy.interval) => {}
            _ = token.cancelled() => {
                send_cancel(gateway.as_ref(), &request_id).await;
                return;
            }
        }

        let status = tokio::select! {
            status = gateway.poll(&request_id) => status,
            _ = token.cancelled() => {
                send_cancel(gateway.as_ref(), &request_id).await;
                return;
            }
        };

        let outcome = match status {
            Ok(status) if status.is_pending() => {
                failures = 0;
                continue;
            }
            // Covered by the `is_pending()` guard above
            Ok(PollStatus::Processing | PollStatus::Cancelling) => unreachable!(),
            Ok(PollStatus::Completed(answer)) => ExchangeOutcome::Completed(answer),
            Ok(PollStatus::Cancelled) => ExchangeOutcome::Cancelled,
            Ok(PollStatus::Error(message)) => ExchangeOutcome::Failed(message),
            Ok(PollStatus::Unknown(status)) => {
                ExchangeOutcome::Failed(format!("unknown request status '{}'", status))
            }
            Err(e) => {
                failures += 1;
                log::warn!(
                    "Poll {} of {} for request {} failed: {}",
                    failures,
                    policy.max_failures,
                    request_id,
                    e
                );
                if failures < policy.max_failures {
                    continue;
                }
                ExchangeOutcome::Failed(e.to_string())
            }
        };

        if token.is_cancelled() {
            log::debug!("Request {} superseded while resolving, dropping result", request_id);
            return;
        }
        reporter.report(ExchangeUpdate::Finished(outcome));
        return;
    }
}

async fn send_cancel(gateway: &dyn ReasoningGateway, request_id: &RequestId) {
    match gateway.cancel(request_id).await {
        Ok(message) => log::info!("🛑 Cancelled request {}: {}", request_id, message),
        Err(e) => log::warn!("Cancel for request {} failed: {}", request_id, e),
    }
}
