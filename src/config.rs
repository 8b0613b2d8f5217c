//! Konfiguration der Voice-Engine
//!
//! Alle Werte kommen aus Umgebungsvariablen mit sinnvollen Defaults.
//! Nur der API-Key ist Pflicht; ohne ihn startet kein Anruf.

use thiserror::Error;

// ============================================================================
// DEFAULTS
// ============================================================================

/// WebSocket-Endpoint für die Gemini Live API (BidiGenerateContent)
const DEFAULT_LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// HTTP-Endpoint für die One-Shot-Textanalyse
const DEFAULT_HTTP_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Modell für den Sprachanruf (native audio)
const DEFAULT_LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Modell für die Symptom-Textanalyse
const DEFAULT_TEXT_MODEL: &str = "gemini-3-flash-preview";

/// Stimme für die Sprachausgabe
const DEFAULT_VOICE_NAME: &str = "Kore";

/// System-Instruktion für den Sprachassistenten
const VOICE_SYSTEM_INSTRUCTION: &str = "You are Aura Health's advanced medical voice assistant. \
Listen to the user's symptoms and provide empathetic, concise, and helpful guidance. \
You can speak in any language the user speaks. Always clarify you are an AI.";

/// System-Instruktion für die Symptom-Textanalyse
const TEXT_SYSTEM_INSTRUCTION: &str = "You are Aura Health's AI medical assistant. \
Your goal is to provide preliminary information based on symptoms described by the user. \

RULES:
1. Always include a disclaimer that you are an AI and not a doctor.
2. If the symptoms sound life-threatening (chest pain, stroke signs, severe bleeding), advise them to call emergency services immediately.
3. Keep responses concise, empathetic, and structured (use bullet points).
4. Suggest potential causes and recommended next steps (e.g., \"See a GP\", \"Rest and hydrate\").
5. Do not make definitive diagnoses. Use phrases like \"This could be...\", \"Possible causes include...\".";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No API key found. Set GEMINI_API_KEY (or API_KEY).")]
    MissingApiKey,
}

// ============================================================================
// CONFIG
// ============================================================================

/// Laufzeit-Konfiguration für Live-Anruf und Textanalyse
#[derive(Clone)]
pub struct VoiceConfig {
    pub api_key: String,
    pub live_endpoint: String,
    pub http_endpoint: String,
    pub live_model: String,
    pub text_model: String,
    pub voice_name: String,
    pub voice_instruction: String,
    pub text_instruction: String,
}

impl VoiceConfig {
    /// Liest die Konfiguration aus der Umgebung
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .map_err(|_| ConfigError::MissingApiKey)?;
        Ok(Self::with_api_key(api_key))
    }

    /// Baut eine Konfiguration mit Defaults um den gegebenen API-Key
    pub fn with_api_key(api_key: String) -> Self {
        Self {
            api_key,
            live_endpoint: env_or("AURA_LIVE_ENDPOINT", DEFAULT_LIVE_ENDPOINT),
            http_endpoint: env_or("AURA_HTTP_ENDPOINT", DEFAULT_HTTP_ENDPOINT),
            live_model: env_or("AURA_LIVE_MODEL", DEFAULT_LIVE_MODEL),
            text_model: env_or("AURA_TEXT_MODEL", DEFAULT_TEXT_MODEL),
            voice_name: env_or("AURA_VOICE_NAME", DEFAULT_VOICE_NAME),
            voice_instruction: VOICE_SYSTEM_INSTRUCTION.to_string(),
            text_instruction: TEXT_SYSTEM_INSTRUCTION.to_string(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

// Der API-Key darf nicht in Logs landen
impl std::fmt::Debug for VoiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceConfig")
            .field("api_key", &"<redacted>")
            .field("live_endpoint", &self.live_endpoint)
            .field("live_model", &self.live_model)
            .field("text_model", &self.text_model)
            .field("voice_name", &self.voice_name)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_api_key_uses_defaults() {
        let config = VoiceConfig::with_api_key("test-key".to_string());

        assert_eq!(config.api_key, "test-key");
        assert!(config.live_endpoint.starts_with("wss://"));
        assert_eq!(config.voice_name, "Kore");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = VoiceConfig::with_api_key("super-secret".to_string());
        let printed = format!("{:?}", config);

        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
