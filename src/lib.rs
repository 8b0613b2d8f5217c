//! Aura Voice - Sprachassistent für die Aura Health Klinik
//!
//! Eine Echtzeit-Sprachpipeline mit:
//! - Gemini Live API über WebSocket für bidirektionales Audio
//! - cpal für Mikrofon-Capture und lückenlose Wiedergabe
//! - One-Shot Symptom-Analyse über generateContent

pub mod audio;
pub mod call;
pub mod config;
pub mod gemini;

use call::{CallEngine, CallEvent, CallState};
use config::VoiceConfig;
use once_cell::sync::OnceCell;
use std::sync::Arc;

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Globaler Application State
pub struct AppState {
    config: VoiceConfig,
    engine: Arc<CallEngine>,
}

/// Singleton für den AppState
static APP_STATE: OnceCell<Arc<AppState>> = OnceCell::new();

impl AppState {
    /// Initialisiert den Application State
    pub fn init() -> Result<Arc<Self>, String> {
        // Logging initialisieren
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("aura_voice=debug".parse().unwrap()),
            )
            .init();

        tracing::info!("Initializing Aura Voice...");

        let config = VoiceConfig::from_env().map_err(|e| e.to_string())?;
        tracing::info!("Loaded config: {:?}", config);

        let state = Arc::new(Self {
            engine: Arc::new(CallEngine::new(config.clone())),
            config,
        });

        APP_STATE
            .set(Arc::clone(&state))
            .map_err(|_| "AppState already initialized")?;

        Ok(state)
    }

    /// Gibt den globalen AppState zurück
    pub fn get() -> Option<Arc<Self>> {
        APP_STATE.get().cloned()
    }

    // ========================================================================
    // COMMANDS - CALLS
    // ========================================================================

    /// Startet den Sprach-Anruf
    pub async fn start_voice_call(&self) -> Result<(), String> {
        tracing::info!("Starting voice call");
        self.engine.start_call().await.map_err(|e| e.to_string())
    }

    /// Beendet den Sprach-Anruf
    pub fn stop_voice_call(&self) {
        tracing::info!("Stopping voice call");
        self.engine.stop_call();
    }

    /// Gibt den aktuellen Call-Status zurück
    pub fn call_state(&self) -> CallState {
        self.engine.state()
    }

    /// Call-Status als String (für UI-Anbindung)
    pub fn call_state_label(&self) -> &'static str {
        match self.engine.state() {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Active => "active",
            CallState::Error => "error",
        }
    }

    /// Aktueller Mikrofon-Pegel (0.0 - 1.0)
    pub fn audio_level(&self) -> f32 {
        self.engine.audio_level()
    }

    /// Gibt einen Event-Receiver für Anruf-Events zurück
    pub fn subscribe_call_events(&self) -> tokio::sync::broadcast::Receiver<CallEvent> {
        self.engine.subscribe()
    }

    // ========================================================================
    // COMMANDS - TEXT ANALYSIS
    // ========================================================================

    /// Analysiert eine Symptombeschreibung (Text-Tab)
    pub async fn analyze_symptoms(&self, symptoms: &str) -> Result<String, String> {
        gemini::analyze_symptoms(&self.config, symptoms)
            .await
            .map_err(|e| e.to_string())
    }
}
