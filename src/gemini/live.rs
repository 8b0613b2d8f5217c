//! WebSocket Client für die Gemini Live Session
//!
//! Verwaltet die bidirektionale Verbindung zum BidiGenerateContent-Endpoint:
//! - Setup-Nachricht als erstes auf der Write-Queue
//! - Read-Task parst Server-Nachrichten und verteilt sie als Events
//! - Write-Task entleert die Queue in Reihenfolge (Sends während des
//!   Verbindungsaufbaus warten einfach hinter dem Setup)
//! - Idempotentes Schließen

use super::messages::{RealtimeInputMessage, ServerContent, ServerMessage, SetupMessage};
use crate::audio::EncodedChunk;
use crate::config::VoiceConfig;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum LiveError {
    #[error("Invalid live endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),
}

// ============================================================================
// LIVE EVENTS
// ============================================================================

/// Events die von der Live-Session ausgelöst werden
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// Setup bestätigt - die Session ist offen
    Opened,

    /// Ein Audio-Chunk des Modells (Base64-PCM, 24 kHz Mono)
    Audio(String),

    /// Das Modell hat seinen Turn beendet
    TurnComplete,

    /// Der Nutzer hat das Modell unterbrochen
    Interrupted,

    /// Verbindung geschlossen (Server oder lokal)
    Closed,

    /// Transportfehler
    Error(String),
}

// ============================================================================
// SESSION STATE
// ============================================================================

#[derive(Debug, Default)]
struct SessionState {
    is_open: bool,
}

// ============================================================================
// LIVE CLIENT
// ============================================================================

/// Client für genau eine Live-Session
///
/// Pro Anruf existiert höchstens eine Instanz; der Lifecycle-Controller
/// besitzt sie exklusiv und verwirft sie beim Teardown.
pub struct LiveClient {
    state: Arc<RwLock<SessionState>>,
    tx: Option<mpsc::Sender<Message>>,
    event_tx: broadcast::Sender<LiveEvent>,
}

impl LiveClient {
    /// Verbindet mit dem Live-Endpoint und schickt die Setup-Nachricht
    ///
    /// Gibt zurück sobald der WebSocket steht; das `Opened`-Event folgt
    /// asynchron, wenn der Server das Setup bestätigt. Der zurückgegebene
    /// Receiver existiert bereits bevor der Read-Task startet: auch eine
    /// sofortige Server-Antwort geht nicht verloren.
    pub async fn connect(
        config: &VoiceConfig,
    ) -> Result<(Self, broadcast::Receiver<LiveEvent>), LiveError> {
        let mut ws_url = Url::parse(&config.live_endpoint)
            .map_err(|e| LiveError::InvalidEndpoint(e.to_string()))?;
        ws_url.query_pairs_mut().append_pair("key", &config.api_key);

        tracing::info!("Connecting to live endpoint: {}", config.live_endpoint);

        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        // Message-Sender erstellen
        let (tx, mut rx) = mpsc::channel::<Message>(64);
        let state = Arc::new(RwLock::new(SessionState::default()));
        let (event_tx, _) = broadcast::channel(100);

        // Setup zuerst in die Queue; alles Weitere wartet dahinter
        let setup = SetupMessage::new(
            &config.live_model,
            &config.voice_name,
            &config.voice_instruction,
        );
        let setup_json = serde_json::to_string(&setup)
            .map_err(|e| LiveError::SendFailed(e.to_string()))?;
        tx.try_send(Message::Text(setup_json))
            .map_err(|e| LiveError::SendFailed(e.to_string()))?;

        // Receiver vor dem Read-Task anlegen; broadcast verwirft Sends
        // ohne Empfänger
        let events = event_tx.subscribe();

        // Read-Task starten
        let state_clone = Arc::clone(&state);
        let event_tx_read = event_tx.clone();

        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(server_msg) => {
                                Self::handle_server_message(server_msg, &state_clone, &event_tx_read)
                            }
                            Err(e) => {
                                tracing::warn!("Unparseable server message: {}", e);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("Live session closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Live session transport error: {}", e);
                        let _ = event_tx_read.send(LiveEvent::Error(e.to_string()));
                        break;
                    }
                    _ => {}
                }
            }

            // Disconnect-Status setzen
            state_clone.write().is_open = false;
            let _ = event_tx_read.send(LiveEvent::Closed);
        });

        // Write-Task starten
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        Ok((
            Self {
                state,
                tx: Some(tx),
                event_tx,
            },
            events,
        ))
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.event_tx.subscribe()
    }

    /// Hat der Server das Setup bestätigt?
    pub fn is_open(&self) -> bool {
        self.state.read().is_open
    }

    /// Gibt einen Sende-Handle zurück (für den Capture-Forward-Task)
    pub fn sender(&self) -> Option<LiveSender> {
        self.tx.clone().map(|tx| LiveSender { tx })
    }

    /// Schließt die Session
    ///
    /// Mehrfach aufrufbar: ohne offenes Handle ein No-op.
    pub fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            // Close-Frame in die Queue; der Write-Task beendet sich danach
            let _ = tx.try_send(Message::Close(None));
            tracing::info!("Live session close requested");
        }
        self.state.write().is_open = false;
    }

    /// Verarbeitet eingehende Server-Nachrichten
    fn handle_server_message(
        msg: ServerMessage,
        state: &Arc<RwLock<SessionState>>,
        event_tx: &broadcast::Sender<LiveEvent>,
    ) {
        if msg.setup_complete.is_some() {
            tracing::info!("Live session setup complete");
            state.write().is_open = true;
            let _ = event_tx.send(LiveEvent::Opened);
        }

        if let Some(content) = msg.server_content {
            Self::handle_server_content(content, event_tx);
        }
    }

    fn handle_server_content(content: ServerContent, event_tx: &broadcast::Sender<LiveEvent>) {
        if content.interrupted {
            let _ = event_tx.send(LiveEvent::Interrupted);
        }

        if let Some(blob) = content.audio_data() {
            let _ = event_tx.send(LiveEvent::Audio(blob.data.clone()));
        }

        if content.turn_complete {
            let _ = event_tx.send(LiveEvent::TurnComplete);
        }
    }
}

#[cfg(test)]
impl LiveClient {
    /// Baut einen Client ohne Verbindung, für Lifecycle-Tests
    pub(crate) fn disconnected() -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(4);
        let (event_tx, _) = broadcast::channel(16);
        (
            Self {
                state: Arc::new(RwLock::new(SessionState::default())),
                tx: Some(tx),
                event_tx,
            },
            rx,
        )
    }
}

impl Drop for LiveClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for LiveClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveClient")
            .field("is_open", &self.is_open())
            .field("has_sender", &self.tx.is_some())
            .finish()
    }
}

// ============================================================================
// LIVE SENDER
// ============================================================================

/// Sende-Handle, das unabhängig vom Client geklont und bewegt werden kann
#[derive(Clone)]
pub struct LiveSender {
    tx: mpsc::Sender<Message>,
}

impl LiveSender {
    /// Schickt einen Mikrofon-Chunk Richtung Modell (wartet auf Queue-Platz)
    pub async fn send_realtime_input(&self, chunk: &EncodedChunk) -> Result<(), LiveError> {
        let msg = RealtimeInputMessage::new(chunk);
        let json = serde_json::to_string(&msg).map_err(|e| LiveError::SendFailed(e.to_string()))?;

        self.tx
            .send(Message::Text(json))
            .await
            .map_err(|e| LiveError::SendFailed(e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
