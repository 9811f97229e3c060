//! Turn orchestrator.
//!
//! A single-consumer event loop owning the session, the three leaf adapters
//! and the network exchange. Adapter callbacks, exchange updates and
//! presentation commands are all funnelled through one unbounded queue, so
//! every state mutation happens on one logical sequence.
//!
//! ```text
//!  speech engine ──┐
//!  wake detector ──┼──► Inbound queue ──► Orchestrator ──► watch<Snapshot>
//!  exchange task ──┤                          │
//!  handle (cmds) ──┘                          └──► leaves / gateway
//! ```

mod exchange;
mod handle;
mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{self, ServiceConfig};
use crate::gateway::{GatewayError, ReasoningGateway, SubmitRequest};
use crate::messages;
use crate::session::{Session, TurnMode, TurnOrigin};
use crate::speech::{SpeechEngine, SpeechEvent, SpeechEventSender, UtteranceId};
use crate::wakeword::{KeywordMap, WakewordDetector, WakewordEvent, WakewordEventSender};

use exchange::{
    ActiveExchange, ExchangeEvent, ExchangeOutcome, ExchangeReporter, ExchangeUpdate, PollPolicy,
};

pub use handle::OrchestratorHandle;
pub use state::{Capabilities, OrchestratorState, PendingExchange, Round, Snapshot};

/// Everything the orchestrator's queue can carry
pub(crate) enum Inbound {
    Command(Command),
    Speech(SpeechEvent),
    Wakeword(WakewordEvent),
    Exchange(ExchangeEvent),
    ServiceAck {
        operation: ServiceOperation,
        result: Result<String, String>,
    },
}

#[derive(Debug)]
pub(crate) enum Command {
    StartListening(TurnMode),
    StopListening,
    SendText { text: String, mode: TurnMode },
    SetLocale(String),
    TogglePrivacyMode,
    ToggleTextInputMode,
    ClearAndResetContext,
    CancelActiveExchange,
    SetGlobalContext(String),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceOperation {
    ResetContext,
    GlobalContext,
    HealthCheck,
}

/// What happens to the placeholder of an exchange that is abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeFate {
    MarkCancelled,
    Discard,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Generated when absent
    pub session_id: Option<String>,
    pub locale: String,
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    pub keyword_map: KeywordMap,
    /// Probe the service once during `initialize`
    pub health_check: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            locale: config::DEFAULT_LOCALE.to_string(),
            poll_interval: Duration::from_secs(2),
            max_poll_failures: 3,
            keyword_map: KeywordMap::default(),
            health_check: true,
        }
    }
}

impl From<&ServiceConfig> for OrchestratorConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            locale: config.locale.clone(),
            poll_interval: config.poll_interval,
            max_poll_failures: config.max_poll_failures,
            ..Self::default()
        }
    }
}

/// Leaf adapters, moved into the orchestrator at construction
pub struct Adapters {
    pub speech: Box<dyn SpeechEngine>,
    pub wakeword: Option<Box<dyn WakewordDetector>>,
    pub gateway: Arc<dyn ReasoningGateway>,
}

pub struct Orchestrator {
    session: Session,
    state: OrchestratorState,
    capabilities: Capabilities,
    speech: Box<dyn SpeechEngine>,
    wakeword: Option<Box<dyn WakewordDetector>>,
    gateway: Arc<dyn ReasoningGateway>,
    keyword_map: KeywordMap,
    poll_policy: PollPolicy,
    health_check: bool,
    exchange: Option<ActiveExchange>,
    next_exchange: u64,
    next_utterance: u64,
    pending_resets: usize,
    last_error: Option<String>,
    initialized: bool,
    running: bool,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    snapshots: watch::Sender<Snapshot>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, adapters: Adapters) -> (Self, OrchestratorHandle) {
        let session_id = config
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = Session::new(session_id, config.locale);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let initial = Snapshot {
            session: session.clone(),
            state: OrchestratorState::Idle,
            capabilities: Capabilities::default(),
            reset_pending: false,
            last_error: None,
        };
        let (snapshots, snapshot_rx) = watch::channel(initial);
        let handle = OrchestratorHandle::new(inbound_tx.clone(), snapshot_rx);

        let orchestrator = Self {
            session,
            state: OrchestratorState::Idle,
            capabilities: Capabilities::default(),
            speech: adapters.speech,
            wakeword: adapters.wakeword,
            gateway: adapters.gateway,
            keyword_map: config.keyword_map,
            poll_policy: PollPolicy {
                interval: config.poll_interval,
                max_failures: config.max_poll_failures.max(1),
            },
            health_check: config.health_check,
            exchange: None,
            next_exchange: 0,
            next_utterance: 0,
            pending_resets: 0,
            last_error: None,
            initialized: false,
            running: true,
            inbound_tx,
            inbound_rx,
            snapshots,
        };

        (orchestrator, handle)
    }

    /// Bring up the adapters and arm the wake word if possible.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        log::info!("🚀 Initializing orchestrator for session {}", self.session.id);

        match self
            .speech
            .initialize(SpeechEventSender::new(self.inbound_tx.clone()))
        {
            Ok(()) => self.capabilities.recognizer = true,
            Err(e) => self.surface_error(format!("Speech recognition disabled: {}", e)),
        }

        let wake_result = self
            .wakeword
            .as_mut()
            .map(|detector| detector.initialize(WakewordEventSender::new(self.inbound_tx.clone())));
        match wake_result {
            Some(Ok(())) => self.capabilities.wakeword = true,
            Some(Err(e)) => self.surface_error(format!("Hands-free activation disabled: {}", e)),
            None => log::info!("No wake-word detector configured, hands-free activation off"),
        }

        if self.health_check {
            let gateway = Arc::clone(&self.gateway);
            self.spawn_service_call(ServiceOperation::HealthCheck, async move {
                gateway.health_check().await
            });
        }

        self.rearm();
        self.publish();
    }

    /// Process one queued event. Returns false once shut down.
    pub async fn step(&mut self) -> bool {
        if !self.running {
            return false;
        }
        match self.inbound_rx.recv().await {
            Some(event) => {
                self.dispatch(event);
                self.publish();
                self.running
            }
            None => false,
        }
    }

    /// Initialize and run the event loop until shutdown
    pub async fn run(mut self) {
        self.initialize();
        while self.step().await {}
        log::info!("👋 Orchestrator stopped");
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            session: self.session.clone(),
            state: self.state.clone(),
            capabilities: self.capabilities,
            reset_pending: self.pending_resets > 0,
            last_error: self.last_error.clone(),
        }
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn dispatch(&mut self, event: Inbound) {
        match event {
            Inbound::Command(command) => self.handle_command(command),
            Inbound::Speech(event) => self.handle_speech(event),
            Inbound::Wakeword(event) => self.handle_wakeword(event),
            Inbound::Exchange(event) => self.handle_exchange(event),
            Inbound::ServiceAck { operation, result } => self.handle_ack(operation, result),
        }
    }

    fn handle_command(&mut self, command: Command) {
        log::debug!("Command {:?} in state {}", command, self.state.name());
        match command {
            Command::StartListening(mode) => self.begin_listening(Round::manual(mode)),
            Command::StopListening => self.stop_listening(),
            Command::SendText { text, mode } => self.send_text(&text, mode),
            Command::SetLocale(tag) => self.set_locale(&tag),
            Command::TogglePrivacyMode => self.toggle_privacy_mode(),
            Command::ToggleTextInputMode => self.toggle_text_input_mode(),
            Command::ClearAndResetContext => self.reset_conversation(None),
            Command::CancelActiveExchange => self.cancel_active_exchange(),
            Command::SetGlobalContext(context) => {
                let gateway = Arc::clone(&self.gateway);
                self.spawn_service_call(ServiceOperation::GlobalContext, async move {
                    gateway.set_global_context(&context).await
                });
            }
            Command::Shutdown => self.shutdown(),
        }
    }

    fn begin_listening(&mut self, round: Round) {
        if self.session.privacy_mode {
            self.surface_error("Microphone is disabled in privacy mode".to_string());
            return;
        }
        if !self.capabilities.recognizer {
            self.surface_error("Speech recognition is unavailable".to_string());
            return;
        }

        self.stop_current(ExchangeFate::MarkCancelled);
        self.session.turn_mode = round.mode;

        match self.speech.start_recognition(&self.session.locale) {
            Ok(()) => {
                log::info!(
                    "🎤 Listening ({}, {})",
                    round.mode,
                    if round.hands_free { "hands-free" } else { "manual" }
                );
                self.state = OrchestratorState::Recognizing(round);
            }
            Err(e) => {
                self.surface_error(e.to_string());
                self.settle();
            }
        }
    }

    fn stop_listening(&mut self) {
        if let OrchestratorState::Recognizing(round) = &mut self.state {
            round.hands_free = false;
            // The engine answers with a final result or an error
            self.speech.stop_recognition();
        }
    }

    fn send_text(&mut self, text: &str, mode: TurnMode) {
        let text = text.trim();
        if text.is_empty() {
            log::debug!("Ignoring empty text input");
            return;
        }
        self.stop_current(ExchangeFate::MarkCancelled);
        self.start_exchange(text, Round::manual(mode));
    }

    fn set_locale(&mut self, tag: &str) {
        let locale = match config::validate_locale(tag) {
            Ok(locale) => locale,
            Err(reason) => {
                self.surface_error(reason);
                return;
            }
        };
        if locale == self.session.locale {
            return;
        }
        log::info!("🌐 Locale {} -> {}", self.session.locale, locale);
        self.reset_conversation(Some(locale));
    }

    fn toggle_privacy_mode(&mut self) {
        self.session.privacy_mode = !self.session.privacy_mode;
        if self.session.privacy_mode {
            log::info!("🔒 Privacy mode on");
            self.stop_current(ExchangeFate::MarkCancelled);
            self.settle();
        } else {
            // A typed request sent while private may still be in flight
            log::info!("🔓 Privacy mode off");
            self.rearm();
        }
    }

    fn toggle_text_input_mode(&mut self) {
        self.session.text_input_mode = !self.session.text_input_mode;

        // Switching input mode ends any hands-free continuation
        if let Some(round) = self.state.round_mut() {
            round.hands_free = false;
        }

        if self.session.text_input_mode
            && matches!(self.state, OrchestratorState::Recognizing(_))
        {
            self.speech.stop_recognition();
            self.session.partial.clear();
            self.settle();
        }
    }

    fn cancel_active_exchange(&mut self) {
        if !matches!(self.state, OrchestratorState::NetworkBusy(_)) {
            log::debug!("No exchange to cancel");
            return;
        }
        log::info!("🛑 Cancelling active exchange");
        self.stop_current(ExchangeFate::MarkCancelled);
        self.settle();
    }

    /// Stop everything in flight, clear local conversation state and ask the
    /// service to forget this session. Local state is not restored if the
    /// reset call fails.
    fn reset_conversation(&mut self, locale: Option<String>) {
        self.stop_current(ExchangeFate::Discard);
        self.session.clear_conversation();
        if let Some(locale) = locale {
            self.session.locale = locale;
        }

        self.pending_resets += 1;
        let gateway = Arc::clone(&self.gateway);
        let session_id = self.session.id.clone();
        self.spawn_service_call(ServiceOperation::ResetContext, async move {
            gateway.reset_context(&session_id).await
        });

        self.settle();
    }

    fn shutdown(&mut self) {
        log::info!("Shutting down orchestrator");
        self.stop_current(ExchangeFate::Discard);
        if let Some(detector) = self.wakeword.as_mut() {
            detector.release();
        }
        self.speech.release();
        self.capabilities = Capabilities::default();
        self.state = OrchestratorState::Idle;
        self.running = false;
    }

    fn handle_speech(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::RecognitionStarted => log::debug!("Recognition started"),
            SpeechEvent::RecognitionStopped => log::debug!("Recognition stopped"),
            SpeechEvent::PartialResult(text) => {
                if matches!(self.state, OrchestratorState::Recognizing(_)) {
                    self.session.partial = text;
                }
            }
            SpeechEvent::FinalResult(text) => self.on_final_result(&text),
            SpeechEvent::RecognitionError(code) => {
                if !matches!(self.state, OrchestratorState::Recognizing(_)) {
                    log::debug!("Ignoring recognition error {} outside recognition", code);
                    return;
                }
                log::warn!("Recognition error: {}", code);
                self.session.partial.clear();
                let message = messages::recognition_error(&self.session.locale, code);
                self.session.push_turn(message, TurnOrigin::System);
                self.surface_error(message.to_string());
                self.settle();
            }
            SpeechEvent::TtsReady => {
                log::info!("🔊 Text-to-speech ready");
                self.capabilities.tts = true;
                self.rearm();
            }
            SpeechEvent::TtsInitError(message) => {
                self.capabilities.tts = false;
                self.surface_error(format!("Speech output disabled: {}", message));
                match self.state {
                    OrchestratorState::WakeListening | OrchestratorState::Speaking { .. } => {
                        self.stop_current(ExchangeFate::Discard);
                        self.settle();
                    }
                    _ => {}
                }
            }
            SpeechEvent::TtsStart(utterance) => log::debug!("Speaking {}", utterance),
            SpeechEvent::TtsDone(utterance) => self.on_speech_done(utterance),
            SpeechEvent::TtsError(utterance, message) => {
                if !self.is_speaking(utterance) {
                    log::debug!("Ignoring TTS error for stale {}", utterance);
                    return;
                }
                log::warn!("TTS error on {}: {}", utterance, message);
                self.surface_error(format!("Speech output failed: {}", message));
                self.settle();
            }
        }
    }

    fn on_final_result(&mut self, text: &str) {
        let OrchestratorState::Recognizing(round) = self.state else {
            log::debug!("Ignoring final result outside recognition");
            return;
        };
        self.session.partial.clear();

        let text = text.trim();
        if text.is_empty() {
            log::info!("📝 Empty transcript, back to idle");
            self.settle();
            return;
        }
        log::info!("📝 Transcript: '{}'", text);
        self.start_exchange(text, round);
    }

    fn on_speech_done(&mut self, utterance: UtteranceId) {
        let OrchestratorState::Speaking { round, .. } = self.state else {
            log::debug!("Ignoring completion of stale {}", utterance);
            return;
        };
        if !self.is_speaking(utterance) {
            log::debug!("Ignoring completion of stale {}", utterance);
            return;
        }

        self.state = OrchestratorState::Idle;
        if round.hands_free && !self.session.privacy_mode && self.capabilities.recognizer {
            log::info!("🔁 Hands-free round finished, listening again");
            self.begin_listening(Round::hands_free(round.mode));
        } else {
            self.settle();
        }
    }

    fn is_speaking(&self, utterance: UtteranceId) -> bool {
        matches!(self.state, OrchestratorState::Speaking { utterance: current, .. } if current == utterance)
    }

    fn handle_wakeword(&mut self, event: WakewordEvent) {
        match event {
            WakewordEvent::KeywordDetected(index) => {
                if !matches!(self.state, OrchestratorState::WakeListening) {
                    log::debug!("Ignoring keyword {} in state {}", index, self.state.name());
                    return;
                }
                let Some(mode) = self.keyword_map.mode_for(index) else {
                    log::warn!("Keyword index {} has no turn mode, ignoring", index);
                    return;
                };
                log::info!("🎯 Wake word {} detected ({})", index, mode);
                self.begin_listening(Round::hands_free(mode));
            }
            WakewordEvent::Error(message) => {
                self.capabilities.wakeword = false;
                self.surface_error(format!("Hands-free activation disabled: {}", message));
                if matches!(self.state, OrchestratorState::WakeListening) {
                    self.stop_current(ExchangeFate::Discard);
                    self.settle();
                }
            }
        }
    }

    fn start_exchange(&mut self, text: &str, round: Round) {
        let locale = self.session.locale.clone();
        self.session.turn_mode = round.mode;
        self.session.push_turn(text, round.mode.user_origin());
        let placeholder = self
            .session
            .push_turn(messages::processing(&locale), TurnOrigin::System);
        self.last_error = None;

        self.next_exchange += 1;
        let id = self.next_exchange;
        let token = CancellationToken::new();
        let request = SubmitRequest {
            session_id: self.session.id.clone(),
            text: text.to_string(),
            locale,
            hands_free: round.hands_free,
            mode: round.mode,
        };

        tokio::spawn(exchange::run_exchange(
            Arc::clone(&self.gateway),
            request,
            self.poll_policy,
            token.clone(),
            ExchangeReporter::new(id, self.inbound_tx.clone()),
        ));

        self.exchange = Some(ActiveExchange {
            id,
            token,
            placeholder,
        });
        self.state = OrchestratorState::NetworkBusy(PendingExchange {
            exchange: id,
            request_id: None,
            round,
        });
    }

    fn handle_exchange(&mut self, event: ExchangeEvent) {
        let current = matches!(&self.exchange, Some(active) if active.id == event.exchange);
        if !current {
            log::debug!("Ignoring update from superseded exchange {}", event.exchange);
            return;
        }

        match event.update {
            ExchangeUpdate::Submitted(request_id) => {
                if let OrchestratorState::NetworkBusy(pending) = &mut self.state {
                    pending.request_id = Some(request_id);
                }
            }
            ExchangeUpdate::Finished(outcome) => self.finish_exchange(outcome),
        }
    }

    fn finish_exchange(&mut self, outcome: ExchangeOutcome) {
        let Some(active) = self.exchange.take() else {
            return;
        };
        let round = match &self.state {
            OrchestratorState::NetworkBusy(pending) => pending.round,
            _ => Round::manual(self.session.turn_mode),
        };
        self.state = OrchestratorState::Idle;
        let locale = self.session.locale.clone();

        match outcome {
            ExchangeOutcome::Completed(answer) => {
                let text = answer.response.trim().to_string();
                log::info!("💬 Answer: '{}'", text);
                self.session.replace_turn_text(active.placeholder, text.clone());
                self.session
                    .patient
                    .update(answer.patient_name, answer.patient_id.as_deref());
                self.speak_answer(&text, round);
            }
            ExchangeOutcome::Cancelled => {
                log::info!("Request cancelled by the service");
                self.session
                    .replace_turn_text(active.placeholder, messages::cancelled(&locale));
                self.settle();
            }
            ExchangeOutcome::Failed(message) => {
                log::warn!("Exchange failed: {}", message);
                self.session.replace_turn_text(
                    active.placeholder,
                    messages::request_failed(&locale, &message),
                );
                self.surface_error(message);
                self.settle();
            }
        }
    }

    fn speak_answer(&mut self, text: &str, round: Round) {
        if text.is_empty() || self.session.privacy_mode || !self.capabilities.tts {
            self.settle();
            return;
        }

        self.next_utterance += 1;
        let utterance = UtteranceId(self.next_utterance);
        match self.speech.speak(text, &self.session.locale, utterance) {
            Ok(()) => self.state = OrchestratorState::Speaking { utterance, round },
            Err(e) => {
                self.surface_error(e.to_string());
                self.settle();
            }
        }
    }

    fn handle_ack(&mut self, operation: ServiceOperation, result: Result<String, String>) {
        if operation == ServiceOperation::ResetContext {
            self.pending_resets = self.pending_resets.saturating_sub(1);
        }
        match (operation, result) {
            (_, Ok(message)) => log::info!("✅ {:?}: {}", operation, message),
            (ServiceOperation::ResetContext, Err(e)) => {
                self.surface_error(format!("Failed to reset conversation context: {}", e));
            }
            (ServiceOperation::GlobalContext, Err(e)) => {
                self.surface_error(format!("Failed to update global context: {}", e));
            }
            (ServiceOperation::HealthCheck, Err(e)) => {
                self.surface_error(format!("Reasoning service unreachable: {}", e));
            }
        }
    }

    /// Stop whatever leaf or exchange owns the current state and drop to
    /// Idle without re-arming
    fn stop_current(&mut self, fate: ExchangeFate) {
        match std::mem::replace(&mut self.state, OrchestratorState::Idle) {
            OrchestratorState::WakeListening => {
                if let Some(detector) = self.wakeword.as_mut() {
                    detector.stop();
                }
            }
            OrchestratorState::Recognizing(_) => {
                self.speech.stop_recognition();
                self.session.partial.clear();
            }
            OrchestratorState::Speaking { .. } => self.speech.stop_speaking(),
            OrchestratorState::NetworkBusy(_) | OrchestratorState::Idle => {}
        }
        self.abandon_exchange(fate);
    }

    fn abandon_exchange(&mut self, fate: ExchangeFate) {
        let Some(active) = self.exchange.take() else {
            return;
        };
        // The exchange task notices the token and tells the service
        active.token.cancel();
        if fate == ExchangeFate::MarkCancelled {
            let text = messages::cancelled(&self.session.locale);
            self.session.replace_turn_text(active.placeholder, text);
        }
    }

    /// Return to Idle and re-evaluate wake-word arming
    fn settle(&mut self) {
        if let Some(active) = &self.exchange {
            log::debug!("Exchange {} still in flight, not settling", active.id);
            return;
        }
        self.state = OrchestratorState::Idle;
        self.rearm();
    }

    fn can_arm(&self) -> bool {
        self.wakeword.is_some()
            && !self.session.privacy_mode
            && self.capabilities.recognizer
            && self.capabilities.tts
            && self.capabilities.wakeword
    }

    fn rearm(&mut self) {
        if !self.state.is_idle() || !self.can_arm() {
            return;
        }
        let Some(detector) = self.wakeword.as_mut() else {
            return;
        };
        match detector.start() {
            Ok(()) => {
                log::info!("👂 Waiting for wake word...");
                self.state = OrchestratorState::WakeListening;
            }
            Err(e) => {
                self.capabilities.wakeword = false;
                self.surface_error(format!("Hands-free activation disabled: {}", e));
            }
        }
    }

    fn surface_error(&mut self, message: String) {
        log::error!("❌ {}", message);
        self.last_error = Some(message);
    }

    fn spawn_service_call<F>(&self, operation: ServiceOperation, call: F)
    where
        F: Future<Output = Result<String, GatewayError>> + Send + 'static,
    {
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            let result = call.await.map_err(|e| e.to_string());
            let _ = tx.send(Inbound::ServiceAck { operation, result });
        });
    }
}
