//! In-memory conversation state for one app run.

use chrono::{DateTime, Utc};
use strum::{Display, EnumString};

/// Number of identifier characters left readable after masking
const VISIBLE_ID_CHARS: usize = 4;
const ID_MASK: &str = "******";

/// Which endpoint and transcript bucket a turn belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TurnMode {
    /// Question/answer interaction
    Conversational,
    /// Free-form note recording
    Dictation,
}

impl TurnMode {
    /// Origin tag for user turns produced in this mode
    pub fn user_origin(self) -> TurnOrigin {
        match self {
            TurnMode::Conversational => TurnOrigin::UserConversational,
            TurnMode::Dictation => TurnOrigin::UserDictation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TurnOrigin {
    UserConversational,
    UserDictation,
    System,
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub text: String,
    pub origin: TurnOrigin,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(text: impl Into<String>, origin: TurnOrigin) -> Self {
        Self {
            text: text.into(),
            origin,
            created_at: Utc::now(),
        }
    }

    pub fn is_system(&self) -> bool {
        self.origin == TurnOrigin::System
    }
}

/// Patient the reasoning service currently associates with this session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientContext {
    pub name: Option<String>,
    pub masked_id: Option<String>,
}

impl PatientContext {
    /// Merge fields reported by the service, keeping what it did not mention
    pub fn update(&mut self, name: Option<String>, raw_id: Option<&str>) {
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            self.name = Some(name);
        }
        if let Some(id) = raw_id.filter(|id| !id.trim().is_empty()) {
            self.masked_id = Some(mask_identifier(id));
        }
    }

    pub fn clear(&mut self) {
        self.name = None;
        self.masked_id = None;
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.masked_id.is_none()
    }
}

/// Keep the last four characters of an identifier for display
pub fn mask_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    let chars: Vec<char> = trimmed.chars().collect();
    let start = chars.len().saturating_sub(VISIBLE_ID_CHARS);
    let tail: String = chars[start..].iter().collect();
    format!("{ID_MASK}{tail}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub locale: String,
    pub privacy_mode: bool,
    pub text_input_mode: bool,
    pub turn_mode: TurnMode,
    pub transcript: Vec<Turn>,
    pub partial: String,
    pub patient: PatientContext,
}

impl Session {
    pub fn new(id: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locale: locale.into(),
            privacy_mode: false,
            text_input_mode: false,
            turn_mode: TurnMode::Conversational,
            transcript: Vec::new(),
            partial: String::new(),
            patient: PatientContext::default(),
        }
    }

    /// Append a turn and return its index
    pub fn push_turn(&mut self, text: impl Into<String>, origin: TurnOrigin) -> usize {
        self.transcript.push(Turn::new(text, origin));
        self.transcript.len() - 1
    }

    /// Rewrite a system turn in place. Returns false if the index is stale.
    pub fn replace_turn_text(&mut self, index: usize, text: impl Into<String>) -> bool {
        match self.transcript.get_mut(index) {
            Some(turn) if turn.is_system() => {
                turn.text = text.into();
                true
            }
            _ => false,
        }
    }

    /// Drop transcript, partial text and patient context
    pub fn clear_conversation(&mut self) {
        self.transcript.clear();
        self.partial.clear();
        self.patient.clear();
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.transcript.last()
    }
}
