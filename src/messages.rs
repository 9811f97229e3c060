//! User-visible system texts, in English and Finnish.

use crate::speech::RecognitionErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    English,
    Finnish,
}

impl Language {
    fn from_locale(locale: &str) -> Self {
        let primary = locale.split(['-', '_']).next().unwrap_or_default();
        if primary.eq_ignore_ascii_case("fi") {
            Language::Finnish
        } else {
            Language::English
        }
    }
}

/// Placeholder shown while a request is in flight
pub fn processing(locale: &str) -> &'static str {
    match Language::from_locale(locale) {
        Language::English => "Processing...",
        Language::Finnish => "Käsitellään...",
    }
}

pub fn cancelled(locale: &str) -> &'static str {
    match Language::from_locale(locale) {
        Language::English => "Request Cancelled.",
        Language::Finnish => "Pyyntö peruttu.",
    }
}

pub fn request_failed(locale: &str, detail: &str) -> String {
    match Language::from_locale(locale) {
        Language::English => format!("Error: {}", detail),
        Language::Finnish => format!("Virhe: {}", detail),
    }
}

pub fn recognition_error(locale: &str, code: RecognitionErrorCode) -> &'static str {
    use RecognitionErrorCode::*;

    match Language::from_locale(locale) {
        Language::English => match code {
            NoMatch => "Sorry, I didn't catch that.",
            SpeechTimeout => "No speech detected.",
            Audio => "Audio recording error.",
            InsufficientPermissions => "Microphone permission is required.",
            Network | NetworkTimeout => "Network error during speech recognition.",
            RecognizerBusy => "Speech recognizer is busy.",
            Server => "Speech recognition server error.",
            Client | Unknown => "Speech recognition failed.",
        },
        Language::Finnish => match code {
            NoMatch => "Anteeksi, en saanut selvää.",
            SpeechTimeout => "Puhetta ei havaittu.",
            Audio => "Äänen tallennusvirhe.",
            InsufficientPermissions => "Mikrofonin käyttöoikeus tarvitaan.",
            Network | NetworkTimeout => "Verkkovirhe puheentunnistuksessa.",
            RecognizerBusy => "Puheentunnistin on varattu.",
            Server => "Puheentunnistuspalvelimen virhe.",
            Client | Unknown => "Puheentunnistus epäonnistui.",
        },
    }
}
