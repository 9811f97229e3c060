use async_trait::async_trait;
use pulse_voice::{
    gateway::{Answer, GatewayError, PollStatus, ReasoningGateway, RequestId, SubmitRequest},
    orchestrator::{
        Adapters, Orchestrator, OrchestratorConfig, OrchestratorHandle, OrchestratorState, Round,
    },
    session::{TurnMode, TurnOrigin},
    speech::{
        RecognitionErrorCode, SpeechEngine, SpeechError, SpeechEvent, SpeechEventSender,
        UtteranceId,
    },
    wakeword::{KeywordMap, WakewordDetector, WakewordError, WakewordEvent, WakewordEventSender},
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    StartRecognition(String),
    StopRecognition,
    Speak(String, UtteranceId),
    StopSpeaking,
    ReleaseSpeech,
    WakeStart,
    WakeStop,
    ReleaseWake,
}

type CallLog = Arc<Mutex<Vec<Call>>>;

struct FakeSpeech {
    calls: CallLog,
    events: Arc<Mutex<Option<SpeechEventSender>>>,
    tts_ready: bool,
}

impl SpeechEngine for FakeSpeech {
    fn initialize(&mut self, events: SpeechEventSender) -> Result<(), SpeechError> {
        if self.tts_ready {
            events.send(SpeechEvent::TtsReady);
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn start_recognition(&mut self, locale: &str) -> Result<(), SpeechError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::StartRecognition(locale.to_string()));
        Ok(())
    }

    fn stop_recognition(&mut self) {
        self.calls.lock().unwrap().push(Call::StopRecognition);
    }

    fn speak(&mut self, text: &str, _locale: &str, utterance: UtteranceId) -> Result<(), SpeechError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Speak(text.to_string(), utterance));
        Ok(())
    }

    fn stop_speaking(&mut self) {
        self.calls.lock().unwrap().push(Call::StopSpeaking);
    }

    fn release(&mut self) {
        self.calls.lock().unwrap().push(Call::ReleaseSpeech);
    }
}

struct FakeWakeword {
    calls: CallLog,
    events: Arc<Mutex<Option<WakewordEventSender>>>,
}

impl WakewordDetector for FakeWakeword {
    fn initialize(&mut self, events: WakewordEventSender) -> Result<(), WakewordError> {
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn start(&mut self) -> Result<(), WakewordError> {
        self.calls.lock().unwrap().push(Call::WakeStart);
        Ok(())
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push(Call::WakeStop);
    }

    fn release(&mut self) {
        self.calls.lock().unwrap().push(Call::ReleaseWake);
    }
}

/// Gateway whose poll answers are scripted per request id. Unscripted polls
/// report "processing".
#[derive(Default)]
struct FakeGateway {
    submissions: Mutex<Vec<SubmitRequest>>,
    polls: Mutex<HashMap<String, VecDeque<Result<PollStatus, GatewayError>>>>,
    cancels: Mutex<Vec<RequestId>>,
    resets: Mutex<Vec<String>>,
    fail_resets: bool,
}

impl FakeGateway {
    fn script(&self, request_id: &str, answers: Vec<Result<PollStatus, GatewayError>>) {
        self.polls
            .lock()
            .unwrap()
            .entry(request_id.to_string())
            .or_default()
            .extend(answers);
    }

    fn submissions(&self) -> Vec<SubmitRequest> {
        self.submissions.lock().unwrap().clone()
    }

    fn cancels(&self) -> Vec<RequestId> {
        self.cancels.lock().unwrap().clone()
    }

    fn resets(&self) -> Vec<String> {
        self.resets.lock().unwrap().clone()
    }
}

fn completed(response: &str) -> Result<PollStatus, GatewayError> {
    Ok(PollStatus::Completed(Answer {
        response: response.to_string(),
        ..Answer::default()
    }))
}

fn service_unavailable() -> Result<PollStatus, GatewayError> {
    Err(GatewayError::ApiError {
        status: 503,
        message: "service unavailable".to_string(),
    })
}

#[async_trait]
impl ReasoningGateway for FakeGateway {
    async fn submit(&self, request: &SubmitRequest) -> Result<RequestId, GatewayError> {
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(request.clone());
        Ok(RequestId(format!("req-{}", submissions.len())))
    }

    async fn poll(&self, request_id: &RequestId) -> Result<PollStatus, GatewayError> {
        self.polls
            .lock()
            .unwrap()
            .get_mut(&request_id.0)
            .and_then(|answers| answers.pop_front())
            .unwrap_or(Ok(PollStatus::Processing))
    }

    async fn cancel(&self, request_id: &RequestId) -> Result<String, GatewayError> {
        self.cancels.lock().unwrap().push(request_id.clone());
        Ok("Cancellation requested".to_string())
    }

    async fn reset_context(&self, session_id: &str) -> Result<String, GatewayError> {
        self.resets.lock().unwrap().push(session_id.to_string());
        if self.fail_resets {
            return Err(GatewayError::ApiError {
                status: 500,
                message: "reset failed".to_string(),
            });
        }
        Ok("Context reset".to_string())
    }

    async fn set_global_context(&self, _context: &str) -> Result<String, GatewayError> {
        Ok("Global context updated".to_string())
    }

    async fn health_check(&self) -> Result<String, GatewayError> {
        Ok("ok".to_string())
    }
}

struct Rig {
    orchestrator: Orchestrator,
    handle: OrchestratorHandle,
    gateway: Arc<FakeGateway>,
    calls: CallLog,
    speech_events: Arc<Mutex<Option<SpeechEventSender>>>,
    wake_events: Arc<Mutex<Option<WakewordEventSender>>>,
}

struct RigOptions {
    tts_ready: bool,
    wakeword: bool,
    fail_resets: bool,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            tts_ready: true,
            wakeword: true,
            fail_resets: false,
        }
    }
}

impl Rig {
    fn new() -> Self {
        Self::with_options(RigOptions::default())
    }

    fn with_options(options: RigOptions) -> Self {
        let calls: CallLog = Arc::default();
        let speech_events = Arc::new(Mutex::new(None));
        let wake_events = Arc::new(Mutex::new(None));
        let gateway = Arc::new(FakeGateway {
            fail_resets: options.fail_resets,
            ..FakeGateway::default()
        });

        let wakeword: Option<Box<dyn WakewordDetector>> = if options.wakeword {
            Some(Box::new(FakeWakeword {
                calls: calls.clone(),
                events: wake_events.clone(),
            }))
        } else {
            None
        };
        let adapters = Adapters {
            speech: Box::new(FakeSpeech {
                calls: calls.clone(),
                events: speech_events.clone(),
                tts_ready: options.tts_ready,
            }),
            wakeword,
            gateway: gateway.clone(),
        };
        let config = OrchestratorConfig {
            session_id: Some("session-1".to_string()),
            locale: "en".to_string(),
            poll_interval: Duration::from_millis(5),
            max_poll_failures: 3,
            keyword_map: KeywordMap::default(),
            health_check: false,
        };
        let (mut orchestrator, handle) = Orchestrator::new(config, adapters);
        orchestrator.initialize();

        Self {
            orchestrator,
            handle,
            gateway,
            calls,
            speech_events,
            wake_events,
        }
    }

    fn speech(&self, event: SpeechEvent) {
        let sender = self.speech_events.lock().unwrap().clone().unwrap();
        assert!(sender.send(event));
    }

    fn wake(&self, index: usize) {
        let sender = self.wake_events.lock().unwrap().clone().unwrap();
        assert!(sender.send(WakewordEvent::KeywordDetected(index)));
    }

    fn wake_error(&self, message: &str) {
        let sender = self.wake_events.lock().unwrap().clone().unwrap();
        assert!(sender.send(WakewordEvent::Error(message.to_string())));
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn state(&self) -> OrchestratorState {
        self.orchestrator.state().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.orchestrator
            .session()
            .transcript
            .iter()
            .map(|turn| turn.text.clone())
            .collect()
    }

    /// Process events until `done` holds, failing after two seconds
    async fn pump_until(&mut self, what: &str, done: impl Fn(&Orchestrator) -> bool) {
        let orchestrator = &mut self.orchestrator;
        let reached = tokio::time::timeout(Duration::from_secs(2), async {
            while !done(orchestrator) {
                assert!(orchestrator.step().await, "orchestrator stopped");
            }
        })
        .await;
        assert!(
            reached.is_ok(),
            "timed out waiting for {} (state: {:?})",
            what,
            self.orchestrator.state()
        );
    }

    /// Process whatever arrives within `window`
    async fn drain(&mut self, window: Duration) {
        let _ = tokio::time::timeout(window, async {
            while self.orchestrator.step().await {}
        })
        .await;
    }

    async fn wait_armed(&mut self) {
        self.pump_until("wake listening", |o| {
            matches!(o.state(), OrchestratorState::WakeListening)
        })
        .await;
    }

    async fn wait_speaking(&mut self) -> UtteranceId {
        self.pump_until("speaking", |o| {
            matches!(o.state(), OrchestratorState::Speaking { .. })
        })
        .await;
        match self.state() {
            OrchestratorState::Speaking { utterance, .. } => utterance,
            other => panic!("expected speaking, got {:?}", other),
        }
    }

    async fn wait_submitted(&mut self) {
        self.pump_until("request id", |o| {
            matches!(o.state(), OrchestratorState::NetworkBusy(p) if p.request_id.is_some())
        })
        .await;
    }
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {}", what);
}

#[test_log::test(tokio::test)]
async fn test_hands_free_dictation_relistens_in_dictation() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.wake(2);
    rig.pump_until("recognizing", |o| {
        matches!(o.state(), OrchestratorState::Recognizing(_))
    })
    .await;
    assert_eq!(
        rig.state(),
        OrchestratorState::Recognizing(Round::hands_free(TurnMode::Dictation))
    );
    assert_eq!(rig.count(&Call::WakeStop), 1);

    rig.gateway.script("req-1", vec![completed("Noted.")]);
    rig.speech(SpeechEvent::FinalResult("patient is stable".to_string()));
    let utterance = rig.wait_speaking().await;

    let submissions = rig.gateway.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].mode, TurnMode::Dictation);
    assert!(submissions[0].hands_free);
    assert_eq!(submissions[0].session_id, "session-1");

    let transcript = &rig.orchestrator.session().transcript;
    assert_eq!(transcript[0].origin, TurnOrigin::UserDictation);
    assert_eq!(transcript[0].text, "patient is stable");
    assert_eq!(transcript[1].origin, TurnOrigin::System);
    assert_eq!(transcript[1].text, "Noted.");
    assert!(rig
        .calls()
        .contains(&Call::Speak("Noted.".to_string(), utterance)));

    rig.speech(SpeechEvent::TtsDone(utterance));
    rig.pump_until("relisten", |o| {
        matches!(o.state(), OrchestratorState::Recognizing(_))
    })
    .await;
    assert_eq!(
        rig.state(),
        OrchestratorState::Recognizing(Round::hands_free(TurnMode::Dictation))
    );
    // Only the initial arming, the continuation skips the wake word
    assert_eq!(rig.count(&Call::WakeStart), 1);
}

#[tokio::test]
async fn test_manual_round_returns_to_wake_listening() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.handle.start_listening(TurnMode::Conversational).unwrap();
    rig.pump_until("recognizing", |o| {
        matches!(o.state(), OrchestratorState::Recognizing(_))
    })
    .await;
    assert_eq!(
        rig.state(),
        OrchestratorState::Recognizing(Round::manual(TurnMode::Conversational))
    );

    rig.gateway.script("req-1", vec![completed("Blood pressure is normal.")]);
    rig.speech(SpeechEvent::PartialResult("how is".to_string()));
    rig.speech(SpeechEvent::FinalResult("how is the patient".to_string()));
    let utterance = rig.wait_speaking().await;
    assert!(rig.orchestrator.session().partial.is_empty());
    assert!(!rig.gateway.submissions()[0].hands_free);

    rig.speech(SpeechEvent::TtsDone(utterance));
    rig.wait_armed().await;
    assert_eq!(rig.count(&Call::WakeStart), 2);
    assert_eq!(rig.count(&Call::StartRecognition("en".to_string())), 1);
}

#[tokio::test]
async fn test_stale_tts_completion_is_ignored() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.gateway.script("req-1", vec![completed("Done.")]);
    rig.handle.send_text("status", TurnMode::Conversational).unwrap();
    let utterance = rig.wait_speaking().await;

    rig.speech(SpeechEvent::TtsDone(UtteranceId(utterance.0 + 10)));
    rig.drain(Duration::from_millis(30)).await;
    assert!(matches!(rig.state(), OrchestratorState::Speaking { .. }));
}

#[tokio::test]
async fn test_cancel_marks_placeholder_once_and_ignores_late_answer() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.handle.send_text("summarize the chart", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;
    assert_eq!(rig.texts(), vec!["summarize the chart", "Processing..."]);

    rig.handle.cancel_active_exchange().unwrap();
    rig.wait_armed().await;
    assert_eq!(rig.texts(), vec!["summarize the chart", "Request Cancelled."]);

    let gateway = rig.gateway.clone();
    wait_for("server cancel", || gateway.cancels().len() == 1).await;
    assert_eq!(rig.gateway.cancels(), vec![RequestId("req-1".to_string())]);

    // A result that was already on its way must not resurface
    rig.gateway.script("req-1", vec![completed("late answer")]);
    rig.drain(Duration::from_millis(50)).await;
    assert_eq!(rig.texts(), vec!["summarize the chart", "Request Cancelled."]);
    assert!(rig.calls().iter().all(|c| !matches!(c, Call::Speak(..))));
}

#[tokio::test]
async fn test_new_request_supersedes_pending_one() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.handle.send_text("first", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;

    rig.handle.send_text("second", TurnMode::Dictation).unwrap();
    rig.pump_until("second submission", |o| o.session().transcript.len() == 4)
        .await;
    assert_eq!(
        rig.texts(),
        vec!["first", "Request Cancelled.", "second", "Processing..."]
    );

    rig.gateway.script("req-2", vec![completed("Recorded.")]);
    rig.wait_speaking().await;
    assert_eq!(
        rig.texts(),
        vec!["first", "Request Cancelled.", "second", "Recorded."]
    );

    let gateway = rig.gateway.clone();
    wait_for("first request cancelled", || {
        gateway.cancels() == vec![RequestId("req-1".to_string())]
    })
    .await;
}

#[tokio::test]
async fn test_service_side_cancellation() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.gateway.script(
        "req-1",
        vec![Ok(PollStatus::Cancelling), Ok(PollStatus::Cancelled)],
    );
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;
    rig.wait_armed().await;
    assert_eq!(rig.texts(), vec!["hello", "Request Cancelled."]);
}

#[test_log::test(tokio::test)]
async fn test_locale_change_clears_and_resets_once() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.gateway.script(
        "req-1",
        vec![Ok(PollStatus::Completed(Answer {
            response: "Hello.".to_string(),
            patient_name: Some("Aino Virtanen".to_string()),
            patient_id: Some("010190-123A".to_string()),
        }))],
    );
    rig.handle.send_text("hi", TurnMode::Conversational).unwrap();
    rig.wait_speaking().await;
    assert_eq!(
        rig.orchestrator.session().patient.masked_id.as_deref(),
        Some("******123A")
    );

    rig.handle.set_locale("fi").unwrap();
    rig.pump_until("locale switch", |o| o.session().locale == "fi").await;
    let session = rig.orchestrator.session();
    assert!(session.transcript.is_empty());
    assert!(session.patient.is_empty());
    assert!(rig.calls().contains(&Call::StopSpeaking));
    assert!(rig.orchestrator.snapshot().reset_pending);

    rig.pump_until("reset ack", |o| !o.snapshot().reset_pending).await;
    assert_eq!(rig.gateway.resets(), vec!["session-1".to_string()]);
    assert!(rig.orchestrator.snapshot().last_error.is_none());

    // Same locale again is a no-op
    rig.handle.set_locale("FI").unwrap();
    rig.drain(Duration::from_millis(30)).await;
    assert_eq!(rig.gateway.resets().len(), 1);
}

#[tokio::test]
async fn test_failed_reset_keeps_cleared_state() {
    let mut rig = Rig::with_options(RigOptions {
        fail_resets: true,
        ..RigOptions::default()
    });
    rig.wait_armed().await;

    rig.handle.send_text("hi", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;

    rig.handle.set_locale("fi").unwrap();
    rig.pump_until("reset ack", |o| {
        o.session().locale == "fi" && !o.snapshot().reset_pending
    })
    .await;

    assert!(rig.orchestrator.session().transcript.is_empty());
    assert_eq!(rig.gateway.resets(), vec!["session-1".to_string()]);
    let error = rig.orchestrator.snapshot().last_error.unwrap_or_default();
    assert!(error.contains("reset"), "unexpected error: {}", error);
    assert!(matches!(rig.state(), OrchestratorState::WakeListening));
}

#[tokio::test]
async fn test_clear_and_reset_context() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.handle.send_text("hi", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;
    rig.handle.clear_and_reset_context().unwrap();
    rig.pump_until("cleared", |o| {
        o.session().transcript.is_empty() && !o.snapshot().reset_pending
    })
    .await;

    assert_eq!(rig.orchestrator.session().locale, "en");
    assert_eq!(rig.gateway.resets(), vec!["session-1".to_string()]);
    assert!(matches!(rig.state(), OrchestratorState::WakeListening));
}

#[tokio::test]
async fn test_repeated_poll_failures_fail_the_request() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.gateway
        .script("req-1", vec![service_unavailable(), service_unavailable(), service_unavailable()]);
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;
    rig.wait_armed().await;

    let texts = rig.texts();
    assert_eq!(texts.len(), 2);
    assert!(texts[1].starts_with("Error: "), "unexpected text: {}", texts[1]);
    assert!(rig.orchestrator.snapshot().last_error.is_some());
}

#[tokio::test]
async fn test_poll_failures_below_threshold_recover() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.gateway.script(
        "req-1",
        vec![service_unavailable(), service_unavailable(), completed("Recovered.")],
    );
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    rig.wait_speaking().await;
    assert_eq!(rig.texts(), vec!["hello", "Recovered."]);
}

#[tokio::test]
async fn test_service_error_status_is_shown() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.gateway
        .script("req-1", vec![Ok(PollStatus::Error("model crashed".to_string()))]);
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;
    rig.wait_armed().await;
    assert_eq!(rig.texts(), vec!["hello", "Error: model crashed"]);
}

#[tokio::test]
async fn test_privacy_mode_blocks_microphone_and_speech() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.handle.toggle_privacy_mode().unwrap();
    rig.pump_until("privacy on", |o| o.session().privacy_mode).await;
    assert!(rig.state().is_idle());
    assert_eq!(rig.count(&Call::WakeStop), 1);

    rig.handle.start_listening(TurnMode::Conversational).unwrap();
    rig.pump_until("refusal", |o| o.snapshot().last_error.is_some())
        .await;
    assert!(rig.state().is_idle());
    assert_eq!(rig.count(&Call::StartRecognition("en".to_string())), 0);

    // Text still works but the answer is only shown
    rig.gateway.script("req-1", vec![completed("Silent answer.")]);
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;
    rig.pump_until("answer", |o| o.state().is_idle()).await;
    assert_eq!(rig.texts(), vec!["hello", "Silent answer."]);
    assert!(rig.calls().iter().all(|c| !matches!(c, Call::Speak(..))));

    rig.handle.toggle_privacy_mode().unwrap();
    rig.wait_armed().await;
}

#[tokio::test]
async fn test_wake_word_needs_speech_output() {
    let mut rig = Rig::with_options(RigOptions {
        tts_ready: false,
        ..RigOptions::default()
    });
    rig.drain(Duration::from_millis(20)).await;
    assert!(rig.state().is_idle());
    assert_eq!(rig.count(&Call::WakeStart), 0);

    rig.speech(SpeechEvent::TtsReady);
    rig.wait_armed().await;
    assert!(rig.orchestrator.snapshot().capabilities.tts);
}

#[tokio::test]
async fn test_tts_init_error_disables_speaking_and_arming() {
    let mut rig = Rig::with_options(RigOptions {
        tts_ready: false,
        ..RigOptions::default()
    });
    rig.speech(SpeechEvent::TtsInitError("no voices installed".to_string()));
    rig.pump_until("init error", |o| o.snapshot().last_error.is_some())
        .await;
    assert!(!rig.orchestrator.snapshot().capabilities.tts);

    rig.gateway.script("req-1", vec![completed("Text only.")]);
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;
    rig.pump_until("answer", |o| o.state().is_idle()).await;
    assert_eq!(rig.texts(), vec!["hello", "Text only."]);
    assert!(rig.calls().iter().all(|c| !matches!(c, Call::Speak(..))));
    assert_eq!(rig.count(&Call::WakeStart), 0);
}

#[tokio::test]
async fn test_no_wake_detector_stays_idle() {
    let mut rig = Rig::with_options(RigOptions {
        wakeword: false,
        ..RigOptions::default()
    });
    rig.pump_until("tts ready", |o| o.snapshot().capabilities.tts).await;
    assert!(rig.state().is_idle());
    assert!(!rig.orchestrator.snapshot().capabilities.wakeword);
}

#[tokio::test]
async fn test_wake_error_disables_hands_free() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.wake_error("microphone lost");
    rig.pump_until("wake disabled", |o| !o.snapshot().capabilities.wakeword)
        .await;
    assert!(rig.state().is_idle());

    rig.gateway.script("req-1", vec![completed("ok")]);
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    let utterance = rig.wait_speaking().await;
    rig.speech(SpeechEvent::TtsDone(utterance));
    rig.pump_until("idle", |o| o.state().is_idle()).await;
    assert_eq!(rig.count(&Call::WakeStart), 1);
}

#[tokio::test]
async fn test_unknown_keyword_is_ignored() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.wake(9);
    rig.drain(Duration::from_millis(20)).await;
    assert!(matches!(rig.state(), OrchestratorState::WakeListening));
}

#[tokio::test]
async fn test_empty_final_result_returns_without_submitting() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.wake(0);
    rig.pump_until("recognizing", |o| {
        matches!(o.state(), OrchestratorState::Recognizing(_))
    })
    .await;
    rig.speech(SpeechEvent::FinalResult("   ".to_string()));
    rig.wait_armed().await;

    assert!(rig.gateway.submissions().is_empty());
    assert!(rig.texts().is_empty());
}

#[tokio::test]
async fn test_no_match_reports_and_rearms() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.wake(1);
    rig.pump_until("recognizing", |o| {
        matches!(o.state(), OrchestratorState::Recognizing(_))
    })
    .await;
    rig.speech(SpeechEvent::RecognitionError(RecognitionErrorCode::NoMatch));
    rig.wait_armed().await;

    let last = rig.orchestrator.session().last_turn().cloned().unwrap();
    assert_eq!(last.text, "Sorry, I didn't catch that.");
    assert!(last.is_system());
    assert!(rig.gateway.submissions().is_empty());
}

#[tokio::test]
async fn test_stop_listening_ends_hands_free_round() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.wake(0);
    rig.pump_until("recognizing", |o| {
        matches!(o.state(), OrchestratorState::Recognizing(_))
    })
    .await;
    rig.handle.stop_listening().unwrap();
    rig.pump_until("stop", |o| {
        o.state() == &OrchestratorState::Recognizing(Round::manual(TurnMode::Conversational))
    })
    .await;
    assert!(rig.calls().contains(&Call::StopRecognition));

    rig.gateway.script("req-1", vec![completed("Answer.")]);
    rig.speech(SpeechEvent::FinalResult("what was said so far".to_string()));
    let utterance = rig.wait_speaking().await;
    assert!(!rig.gateway.submissions()[0].hands_free);

    rig.speech(SpeechEvent::TtsDone(utterance));
    rig.wait_armed().await;
}

#[tokio::test]
async fn test_text_input_mode_stops_recognition() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.handle.start_listening(TurnMode::Dictation).unwrap();
    rig.pump_until("recognizing", |o| {
        matches!(o.state(), OrchestratorState::Recognizing(_))
    })
    .await;

    rig.handle.toggle_text_input_mode().unwrap();
    rig.wait_armed().await;
    assert!(rig.orchestrator.session().text_input_mode);
    assert!(rig.calls().contains(&Call::StopRecognition));

    // Late final result from the stopped recognizer
    rig.speech(SpeechEvent::FinalResult("ignored".to_string()));
    rig.drain(Duration::from_millis(20)).await;
    assert!(rig.gateway.submissions().is_empty());
}

#[tokio::test]
async fn test_shutdown_releases_adapters() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.handle.shutdown().unwrap();
    while rig.orchestrator.step().await {}

    let calls = rig.calls();
    assert!(calls.contains(&Call::ReleaseSpeech));
    assert!(calls.contains(&Call::ReleaseWake));
    assert!(rig.state().is_idle());
}

#[tokio::test]
async fn test_handle_publishes_snapshots() {
    let mut rig = Rig::new();
    let mut snapshots = rig.handle.subscribe();
    rig.wait_armed().await;

    assert!(snapshots.has_changed().unwrap());
    let snapshot = snapshots.borrow_and_update().clone();
    assert!(snapshot.is_wake_armed());
    assert_eq!(snapshot.session.id, "session-1");
    assert_eq!(rig.handle.snapshot(), snapshot);
}

#[tokio::test]
async fn test_privacy_off_keeps_typed_request_in_flight() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.handle.toggle_privacy_mode().unwrap();
    rig.pump_until("privacy on", |o| o.session().privacy_mode).await;
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;

    rig.handle.toggle_privacy_mode().unwrap();
    rig.pump_until("privacy off", |o| !o.session().privacy_mode).await;
    assert!(matches!(rig.state(), OrchestratorState::NetworkBusy(_)));
    assert_eq!(rig.count(&Call::WakeStart), 1);

    rig.gateway.script("req-1", vec![completed("Answer.")]);
    let utterance = rig.wait_speaking().await;
    assert_eq!(rig.texts(), vec!["hello", "Answer."]);
    // Detector stays off until the answer has been spoken
    assert_eq!(rig.count(&Call::WakeStart), 1);

    rig.speech(SpeechEvent::TtsDone(utterance));
    rig.wait_armed().await;
    assert_eq!(rig.count(&Call::WakeStart), 2);
}

#[tokio::test]
async fn test_privacy_on_while_recognizing() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.wake(0);
    rig.pump_until("recognizing", |o| {
        matches!(o.state(), OrchestratorState::Recognizing(_))
    })
    .await;
    rig.speech(SpeechEvent::PartialResult("the pati".to_string()));

    rig.handle.toggle_privacy_mode().unwrap();
    rig.pump_until("privacy on", |o| o.session().privacy_mode).await;
    assert!(rig.state().is_idle());
    assert!(rig.calls().contains(&Call::StopRecognition));
    assert!(rig.orchestrator.session().partial.is_empty());

    rig.speech(SpeechEvent::FinalResult("the patient".to_string()));
    rig.drain(Duration::from_millis(20)).await;
    assert!(rig.gateway.submissions().is_empty());
    assert!(rig.texts().is_empty());
}

#[tokio::test]
async fn test_privacy_on_cancels_network_exchange() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;

    rig.handle.toggle_privacy_mode().unwrap();
    rig.pump_until("privacy on", |o| o.session().privacy_mode).await;
    assert!(rig.state().is_idle());
    assert_eq!(rig.texts(), vec!["hello", "Request Cancelled."]);

    let gateway = rig.gateway.clone();
    wait_for("server cancel", || gateway.cancels().len() == 1).await;
    assert_eq!(rig.gateway.cancels(), vec![RequestId("req-1".to_string())]);
}

#[tokio::test]
async fn test_privacy_on_while_speaking() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.gateway.script("req-1", vec![completed("Long answer.")]);
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    let utterance = rig.wait_speaking().await;

    rig.handle.toggle_privacy_mode().unwrap();
    rig.pump_until("privacy on", |o| o.session().privacy_mode).await;
    assert!(rig.state().is_idle());
    assert!(rig.calls().contains(&Call::StopSpeaking));

    rig.speech(SpeechEvent::TtsDone(utterance));
    rig.drain(Duration::from_millis(20)).await;
    assert!(rig.state().is_idle());
    assert_eq!(rig.count(&Call::StartRecognition("en".to_string())), 0);
}

#[tokio::test]
async fn test_tts_error_ends_hands_free_round() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.wake(0);
    rig.pump_until("recognizing", |o| {
        matches!(o.state(), OrchestratorState::Recognizing(_))
    })
    .await;
    rig.gateway.script("req-1", vec![completed("Vitals are stable.")]);
    rig.speech(SpeechEvent::FinalResult("how are the vitals".to_string()));
    let utterance = rig.wait_speaking().await;

    rig.speech(SpeechEvent::TtsError(utterance, "audio device lost".to_string()));
    rig.wait_armed().await;

    assert_eq!(rig.count(&Call::StartRecognition("en".to_string())), 1);
    assert_eq!(rig.count(&Call::WakeStart), 2);
    let error = rig.orchestrator.snapshot().last_error.unwrap_or_default();
    assert!(error.contains("audio device lost"), "unexpected error: {}", error);
    assert_eq!(rig.texts(), vec!["how are the vitals", "Vitals are stable."]);
}

#[tokio::test]
async fn test_unknown_status_fails_the_request() {
    let mut rig = Rig::new();
    rig.wait_armed().await;

    rig.gateway
        .script("req-1", vec![Ok(PollStatus::Unknown("queued".to_string()))]);
    rig.handle.send_text("hello", TurnMode::Conversational).unwrap();
    rig.wait_submitted().await;
    rig.wait_armed().await;

    assert_eq!(
        rig.texts(),
        vec!["hello", "Error: unknown request status 'queued'"]
    );
    assert!(rig.orchestrator.snapshot().last_error.is_some());
}
