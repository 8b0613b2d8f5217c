//! Message Types für die Gemini Live API (BidiGenerateContent)
//!
//! Diese Strukturen spiegeln das JSON-Protokoll des WebSocket-Endpoints
//! wider und ermöglichen typsichere Kommunikation. Feldnamen auf dem Draht
//! sind camelCase, daher überall explizite Renames.

use crate::audio::EncodedChunk;
use serde::{Deserialize, Serialize};

// ============================================================================
// SHARED CONTENT TYPES
// ============================================================================

/// Ein Inhaltsblock aus Teilen (Text oder Inline-Media)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn from_text(text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.to_string()),
                inline_data: None,
            }],
        }
    }
}

/// Ein einzelner Teil: entweder Text oder Base64-Media
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

/// Base64-kodierte Mediendaten mit MIME-Tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaBlob {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Erste Nachricht auf der Verbindung: Modell, Modalität, Stimme, Instruktion
#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Clone, Serialize)]
pub struct Setup {
    pub model: String,
    #[serde(rename = "generationConfig")]
    pub generation_config: LiveGenerationConfig,
    #[serde(rename = "systemInstruction")]
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveGenerationConfig {
    #[serde(rename = "responseModalities")]
    pub response_modalities: Vec<String>,
    #[serde(rename = "speechConfig")]
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    pub voice_config: VoiceSelection,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceSelection {
    #[serde(rename = "prebuiltVoiceConfig")]
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrebuiltVoice {
    #[serde(rename = "voiceName")]
    pub voice_name: String,
}

impl SetupMessage {
    pub fn new(model: &str, voice_name: &str, system_instruction: &str) -> Self {
        Self {
            setup: Setup {
                model: model.to_string(),
                generation_config: LiveGenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceSelection {
                            prebuilt_voice_config: PrebuiltVoice {
                                voice_name: voice_name.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content::from_text(system_instruction),
            },
        }
    }
}

/// Ein Mikrofon-Chunk Richtung Modell
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaBlob>,
}

impl RealtimeInputMessage {
    pub fn new(chunk: &EncodedChunk) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaBlob {
                    mime_type: chunk.mime_type.clone(),
                    data: chunk.data.clone(),
                }],
            },
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Eine Server-Nachricht trägt genau eines der optionalen Felder
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerMessage {
    #[serde(rename = "setupComplete")]
    pub setup_complete: Option<SetupComplete>,
    #[serde(rename = "serverContent")]
    pub server_content: Option<ServerContent>,
}

/// Bestätigung des Setups - ab hier ist die Session offen
#[derive(Debug, Clone, Deserialize)]
pub struct SetupComplete {}

/// Modell-Antwort: Audio-Teile plus Turn-Signale
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerContent {
    #[serde(rename = "modelTurn")]
    pub model_turn: Option<Content>,
    #[serde(rename = "turnComplete", default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

impl ServerContent {
    /// Erster Audio-Teil des Turns, falls vorhanden
    pub fn audio_data(&self) -> Option<&MediaBlob> {
        self.model_turn
            .as_ref()?
            .parts
            .iter()
            .find_map(|part| part.inline_data.as_ref())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_message_wire_format() {
        let msg = SetupMessage::new("models/test-model", "Kore", "Be helpful.");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["setup"]["model"], "models/test-model");
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
                ["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be helpful."
        );
    }

    #[test]
    fn test_realtime_input_wire_format() {
        let chunk = EncodedChunk {
            data: "AAAA".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        };
        let msg = RealtimeInputMessage::new(&chunk);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            json["realtimeInput"]["mediaChunks"][0]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], "AAAA");
    }

    #[test]
    fn test_parse_setup_complete() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn test_parse_server_content_with_audio() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "UklGRg=="}}
                    ]
                },
                "turnComplete": false
            }
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();

        let content = msg.server_content.unwrap();
        let audio = content.audio_data().unwrap();
        assert_eq!(audio.mime_type, "audio/pcm;rate=24000");
        assert_eq!(audio.data, "UklGRg==");
        assert!(!content.turn_complete);
    }

    #[test]
    fn test_parse_server_content_without_audio() {
        let raw = r#"{"serverContent": {"turnComplete": true}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();

        let content = msg.server_content.unwrap();
        assert!(content.audio_data().is_none());
        assert!(content.turn_complete);
    }
}
