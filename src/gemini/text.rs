//! One-Shot Symptom-Analyse über generateContent
//!
//! Der Text-Tab des Assistenten braucht keine Session: eine einzelne
//! HTTP-Anfrage mit der Symptombeschreibung, eine Textantwort zurück.

use super::messages::Content;
use crate::config::VoiceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Antwort, wenn das Modell keinen Text liefert
const EMPTY_RESPONSE_FALLBACK: &str =
    "I apologize, but I couldn't generate a response at this time.";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum TextError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
    #[serde(rename = "generationConfig")]
    generation_config: TextGenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct TextGenerationConfig {
    temperature: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateContentResponse {
    /// Erster Text-Teil des ersten Kandidaten
    fn first_text(&self) -> Option<String> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|content| content.parts.iter())
            .find_map(|part| part.text.clone())
    }
}

// ============================================================================
// API
// ============================================================================

/// Analysiert eine Symptombeschreibung mit dem Text-Modell
pub async fn analyze_symptoms(config: &VoiceConfig, symptoms: &str) -> Result<String, TextError> {
    let url = format!(
        "{}/models/{}:generateContent",
        config.http_endpoint, config.text_model
    );

    let request = GenerateContentRequest {
        contents: vec![Content::from_text(symptoms)],
        system_instruction: Content::from_text(&config.text_instruction),
        generation_config: TextGenerationConfig { temperature: 0.7 },
    };

    let client = reqwest::Client::new();
    let response = client
        .post(&url)
        .query(&[("key", config.api_key.as_str())])
        .json(&request)
        .send()
        .await
        .map_err(|e| TextError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(TextError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let body: GenerateContentResponse = response
        .json()
        .await
        .map_err(|e| TextError::Request(e.to_string()))?;

    Ok(body
        .first_text()
        .unwrap_or_else(|| EMPTY_RESPONSE_FALLBACK.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================
