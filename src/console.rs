//! Terminal stand-ins for the speech engine and wake-word detector.
//!
//! Typed lines play the role of recognized speech and spoken answers are
//! printed. Both adapters share a [`ConsoleShared`] so the input loop can
//! route a line to whichever one is currently listening.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::speech::{SpeechEngine, SpeechError, SpeechEvent, SpeechEventSender, UtteranceId};
use crate::wakeword::{WakewordDetector, WakewordError, WakewordEvent, WakewordEventSender};

#[derive(Default)]
pub struct ConsoleShared {
    speech: Mutex<Option<SpeechEventSender>>,
    wakeword: Mutex<Option<WakewordEventSender>>,
    listening: AtomicBool,
    wake_armed: AtomicBool,
}

impl ConsoleShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn is_wake_armed(&self) -> bool {
        self.wake_armed.load(Ordering::SeqCst)
    }

    /// Hand a typed line to an active recognition. Returns false if nothing
    /// was listening.
    pub fn deliver_line(&self, line: &str) -> bool {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.emit_speech(SpeechEvent::FinalResult(line.to_string()));
        self.emit_speech(SpeechEvent::RecognitionStopped);
        true
    }

    /// Simulate a keyword detection. Ignored while the detector is stopped.
    pub fn trigger_keyword(&self, index: usize) -> bool {
        if !self.is_wake_armed() {
            return false;
        }
        self.emit_wakeword(WakewordEvent::KeywordDetected(index))
    }

    fn emit_speech(&self, event: SpeechEvent) -> bool {
        match self.speech.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|sender| sender.send(event)),
            Err(_) => false,
        }
    }

    fn emit_wakeword(&self, event: WakewordEvent) -> bool {
        match self.wakeword.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|sender| sender.send(event)),
            Err(_) => false,
        }
    }
}

pub struct ConsoleSpeech {
    shared: Arc<ConsoleShared>,
}

impl ConsoleSpeech {
    pub fn new(shared: Arc<ConsoleShared>) -> Self {
        Self { shared }
    }
}

impl SpeechEngine for ConsoleSpeech {
    fn initialize(&mut self, events: SpeechEventSender) -> Result<(), SpeechError> {
        let mut slot = self
            .shared
            .speech
            .lock()
            .map_err(|_| SpeechError::Unavailable("console state poisoned".to_string()))?;
        *slot = Some(events);
        drop(slot);

        self.shared.emit_speech(SpeechEvent::TtsReady);
        Ok(())
    }

    fn start_recognition(&mut self, locale: &str) -> Result<(), SpeechError> {
        self.shared.listening.store(true, Ordering::SeqCst);
        println!("🎤 Listening ({}), type what you would say:", locale);
        self.shared.emit_speech(SpeechEvent::RecognitionStarted);
        Ok(())
    }

    fn stop_recognition(&mut self) {
        // Nothing was typed, so the final result is empty
        if self.shared.listening.swap(false, Ordering::SeqCst) {
            self.shared.emit_speech(SpeechEvent::FinalResult(String::new()));
            self.shared.emit_speech(SpeechEvent::RecognitionStopped);
        }
    }

    fn speak(&mut self, text: &str, _locale: &str, utterance: UtteranceId) -> Result<(), SpeechError> {
        self.shared.emit_speech(SpeechEvent::TtsStart(utterance));
        println!("🗣️  {}", text);
        self.shared.emit_speech(SpeechEvent::TtsDone(utterance));
        Ok(())
    }

    fn stop_speaking(&mut self) {}

    fn release(&mut self) {
        self.shared.listening.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.shared.speech.lock() {
            *slot = None;
        }
    }
}

pub struct ConsoleWakeword {
    shared: Arc<ConsoleShared>,
}

impl ConsoleWakeword {
    pub fn new(shared: Arc<ConsoleShared>) -> Self {
        Self { shared }
    }
}

impl WakewordDetector for ConsoleWakeword {
    fn initialize(&mut self, events: WakewordEventSender) -> Result<(), WakewordError> {
        let mut slot = self
            .shared
            .wakeword
            .lock()
            .map_err(|_| WakewordError::Unavailable("console state poisoned".to_string()))?;
        *slot = Some(events);
        Ok(())
    }

    fn start(&mut self) -> Result<(), WakewordError> {
        self.shared.wake_armed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.wake_armed.store(false, Ordering::SeqCst);
    }

    fn release(&mut self) {
        self.stop();
        if let Ok(mut slot) = self.shared.wakeword.lock() {
            *slot = None;
        }
    }
}
