//! Anruf-Lifecycle
//!
//! Koordiniert die drei Ressourcen eines Anrufs: Playback-Scheduler,
//! Mikrofon-Capture und die Live-Session. Der Teardown ist idempotent
//! und läuft bei jedem Endpfad in derselben Reihenfolge, egal ob der
//! Nutzer auflegt, der Aufbau scheitert oder der Server die Verbindung
//! schließt.

use crate::audio::{
    decode_chunk, decode_to_playback, AudioError, CaptureHandler, PlaybackScheduler, CHANNELS,
    OUTPUT_SAMPLE_RATE,
};
use crate::config::VoiceConfig;
use crate::gemini::{LiveClient, LiveError, LiveEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum CallEngineError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Live session error: {0}")]
    Live(#[from] LiveError),

    #[error("Already in a call")]
    AlreadyInCall,
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Aktueller Status des Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Kein aktiver Anruf
    Idle,
    /// Ressourcen werden beschafft, Session wartet auf Bestätigung
    Connecting,
    /// Anruf aktiv, Audio fließt in beide Richtungen
    Active,
    /// Der letzte Anruf endete mit einem Fehler
    Error,
}

/// Events die von der CallEngine ausgelöst werden
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged(CallState),
    Error(String),
}

// ============================================================================
// CALL ENGINE
// ============================================================================

/// Lifecycle-Controller für den Sprach-Anruf
///
/// Es existiert höchstens ein Anruf gleichzeitig; ein zweiter `start_call`
/// während Connecting oder Active wird abgewiesen.
pub struct CallEngine {
    config: VoiceConfig,
    state: Arc<Mutex<CallState>>,
    event_tx: broadcast::Sender<CallEvent>,
    session: Arc<Mutex<Option<LiveClient>>>,
    capture: Arc<Mutex<Option<CaptureHandler>>>,
    playback: Arc<Mutex<Option<PlaybackScheduler>>>,
    input_level: Arc<Mutex<f32>>,
    // Zählt Teardowns; ein Verbindungsversuch, dessen Zähler nicht mehr
    // stimmt, wurde zwischenzeitlich aufgelegt oder überholt
    generation: AtomicU64,
}

impl CallEngine {
    /// Erstellt eine neue CallEngine
    pub fn new(config: VoiceConfig) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            config,
            state: Arc::new(Mutex::new(CallState::Idle)),
            event_tx,
            session: Arc::new(Mutex::new(None)),
            capture: Arc::new(Mutex::new(None)),
            playback: Arc::new(Mutex::new(None)),
            input_level: Arc::new(Mutex::new(0.0)),
            generation: AtomicU64::new(0),
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// Gibt den aktuellen Call-Status zurück
    pub fn state(&self) -> CallState {
        *self.state.lock()
    }

    /// Aktueller Mikrofon-Pegel (0.0 - 1.0, für den Visualizer)
    pub fn audio_level(&self) -> f32 {
        *self.input_level.lock()
    }

    /// Startet einen Anruf
    ///
    /// Beschafft Playback und Mikrofon, verbindet die Live-Session und
    /// wechselt nach Connecting. Active wird erst erreicht, wenn der
    /// Server das Setup bestätigt. Scheitert ein Schritt, werden bereits
    /// beschaffte Ressourcen wieder freigegeben.
    pub async fn start_call(self: &Arc<Self>) -> Result<(), CallEngineError> {
        // Prüfen ob bereits ein Anruf läuft
        {
            let state = self.state.lock();
            if matches!(*state, CallState::Connecting | CallState::Active) {
                return Err(CallEngineError::AlreadyInCall);
            }
        }

        self.set_state(CallState::Connecting);
        let attempt = self.generation.load(Ordering::Acquire);

        // Playback zuerst: das Ausgabegerät ist die häufigste Fehlerquelle
        let playback = match PlaybackScheduler::open() {
            Ok(p) => p,
            Err(e) => {
                self.teardown();
                self.set_state(CallState::Error);
                return Err(e.into());
            }
        };
        *self.playback.lock() = Some(playback);

        // Mikrofon beschaffen, Stream startet erst beim Opened-Event
        let capture = match CaptureHandler::open(Arc::clone(&self.input_level)) {
            Ok(c) => c,
            Err(e) => {
                self.teardown();
                self.set_state(CallState::Error);
                return Err(e.into());
            }
        };
        *self.capture.lock() = Some(capture);

        // Live-Session verbinden; der Receiver kommt direkt aus connect,
        // damit eine sofortige Server-Antwort nicht verpufft
        let (session, mut events) = match LiveClient::connect(&self.config).await {
            Ok(pair) => pair,
            Err(e) => {
                // Scheitert der Versuch erst nach einem Auflegen, bleibt
                // es beim bereits beendeten Anruf
                if self.generation.load(Ordering::Acquire) != attempt {
                    return Ok(());
                }
                self.teardown();
                self.set_state(CallState::Error);
                return Err(e.into());
            }
        };

        // Während des Awaits kann der Nutzer aufgelegt (oder neu gestartet)
        // haben; die nachträglich aufgelöste Session gehört dann niemandem
        // mehr und wird sofort wieder geschlossen
        if !self.adopt_session(session, attempt) {
            tracing::info!("Call ended while connecting, closing late session");
            return Ok(());
        }

        // Event-Loop der Session: läuft bis Closed oder Lagged
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let is_closed = matches!(event, LiveEvent::Closed);
                        engine.handle_live_event(event);
                        if is_closed {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Call event loop lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(())
    }

    /// Beendet den aktuellen Anruf
    ///
    /// Auf einem bereits beendeten Anruf ein No-op.
    pub fn stop_call(&self) {
        self.teardown();
        self.set_state(CallState::Idle);
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Übernimmt eine frisch verbundene Session, falls der eigene
    /// Verbindungsversuch noch läuft
    ///
    /// Der Slot-Lock bleibt über Prüfung und Ablage gehalten; ein parallel
    /// laufender Teardown erhöht erst den Zähler und nimmt dann den Slot,
    /// kommt also in jedem Fall entweder vor der Prüfung oder an die
    /// abgelegte Session heran. Eine nicht übernommene Session wird sofort
    /// geschlossen.
    fn adopt_session(&self, mut session: LiveClient, attempt: u64) -> bool {
        let mut slot = self.session.lock();
        if self.state() != CallState::Connecting
            || self.generation.load(Ordering::Acquire) != attempt
        {
            drop(slot);
            session.close();
            return false;
        }
        *slot = Some(session);
        true
    }

    /// Verarbeitet Events der Live-Session
    fn handle_live_event(self: &Arc<Self>, event: LiveEvent) {
        match event {
            LiveEvent::Opened => self.on_session_opened(),

            LiveEvent::Audio(data) => self.on_audio_chunk(&data),

            LiveEvent::TurnComplete => {
                tracing::debug!("Model turn complete");
            }

            LiveEvent::Interrupted => {
                tracing::debug!("Model interrupted by user");
            }

            LiveEvent::Closed => {
                // Nach einem Fehler bleibt der Error-Status stehen; das
                // nachlaufende Closed der Session überschreibt ihn nicht
                let state = self.state();
                if matches!(state, CallState::Connecting | CallState::Active) {
                    tracing::info!("Live session closed, ending call");
                    self.teardown();
                    self.set_state(CallState::Idle);
                }
            }

            LiveEvent::Error(message) => {
                tracing::error!("Live session error: {}", message);
                self.teardown();
                self.set_state(CallState::Error);
                let _ = self.event_tx.send(CallEvent::Error(message));
            }
        }
    }

    /// Setup bestätigt: Capture starten, Zeitplan verankern, Active melden
    fn on_session_opened(self: &Arc<Self>) {
        if self.state() != CallState::Connecting {
            return;
        }

        let sender = match self.session.lock().as_ref().and_then(|s| s.sender()) {
            Some(sender) => sender,
            // Teardown war schneller als das Event
            None => return,
        };

        // Capture-Frames laufen über eine Queue zum Forward-Task; der
        // Audio-Callback selbst wartet nie auf das Netzwerk
        let (tx, mut rx) = mpsc::channel(64);

        {
            let mut capture = self.capture.lock();
            let handler = match capture.as_mut() {
                Some(h) => h,
                None => return,
            };
            if let Err(e) = handler.start(tx) {
                drop(capture);
                tracing::error!("Failed to start capture: {}", e);
                self.teardown();
                self.set_state(CallState::Error);
                let _ = self.event_tx.send(CallEvent::Error(e.to_string()));
                return;
            }
        }

        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if let Err(e) = sender.send_realtime_input(&chunk).await {
                    tracing::debug!("Stopping capture forward: {}", e);
                    break;
                }
            }
        });

        if let Some(playback) = self.playback.lock().as_ref() {
            playback.reset();
        }

        self.set_state(CallState::Active);
    }

    /// Ein Audio-Chunk des Modells: dekodieren und lückenlos einplanen
    ///
    /// Ein kaputter Chunk beendet den Anruf nicht, er wird verworfen.
    fn on_audio_chunk(&self, data: &str) {
        let bytes = match decode_chunk(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Dropping malformed audio chunk: {}", e);
                return;
            }
        };

        let buffer = match decode_to_playback(&bytes, OUTPUT_SAMPLE_RATE, CHANNELS) {
            Ok(buffer) => buffer,
            Err(e) => {
                tracing::warn!("Dropping malformed audio chunk: {}", e);
                return;
            }
        };

        if let Some(playback) = self.playback.lock().as_ref() {
            playback.enqueue(&buffer);
        }
    }

    /// Gibt alle Ressourcen frei
    ///
    /// Reihenfolge: Session, Mikrofon, Playback, Pegel. Jeder Schritt ist
    /// für sich ein No-op, wenn die Ressource schon weg ist; der gesamte
    /// Teardown ist dadurch beliebig oft aufrufbar.
    fn teardown(&self) {
        // Zähler zuerst: laufende Verbindungsversuche erkennen daran, dass
        // ihr Anruf vorbei ist
        self.generation.fetch_add(1, Ordering::AcqRel);

        if let Some(mut session) = self.session.lock().take() {
            session.close();
        }

        if let Some(mut capture) = self.capture.lock().take() {
            capture.stop();
        }

        if let Some(mut playback) = self.playback.lock().take() {
            playback.stop();
        }

        *self.input_level.lock() = 0.0;
    }

    /// Aktualisiert den State und sendet Event
    fn set_state(&self, new_state: CallState) {
        {
            let mut state = self.state.lock();
            if *state == new_state {
                return;
            }
            *state = new_state;
        }
        tracing::info!("Call state: {:?}", new_state);
        let _ = self.event_tx.send(CallEvent::StateChanged(new_state));
    }
}

impl std::fmt::Debug for CallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallEngine")
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoiceConfig;

    fn engine() -> Arc<CallEngine> {
        Arc::new(CallEngine::new(VoiceConfig::with_api_key(
            "test-key".to_string(),
        )))
    }

    #[test]
    fn test_initial_state_is_idle() {
        let engine = engine();
        assert_eq!(engine.state(), CallState::Idle);
        assert_eq!(engine.audio_level(), 0.0);
    }

    #[test]
    fn test_teardown_without_resources_is_noop() {
        let engine = engine();

        // Nie gestartet: Teardown darf trotzdem laufen, auch mehrfach
        engine.teardown();
        engine.teardown();
        assert!(engine.session.lock().is_none());
        assert!(engine.capture.lock().is_none());
        assert!(engine.playback.lock().is_none());
    }

    #[test]
    fn test_stop_call_when_idle_stays_idle() {
        let engine = engine();
        let mut events = engine.subscribe();

        engine.stop_call();
        assert_eq!(engine.state(), CallState::Idle);
        // Kein Zustandswechsel → kein Event
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_call_rejected_while_connecting() {
        let engine = engine();
        engine.set_state(CallState::Connecting);

        let result = engine.start_call().await;
        assert!(matches!(result, Err(CallEngineError::AlreadyInCall)));
    }

    #[test]
    fn test_error_event_tears_down_and_sets_error_state() {
        let engine = engine();
        engine.set_state(CallState::Active);
        *engine.input_level.lock() = 0.7;
        let mut events = engine.subscribe();

        engine.handle_live_event(LiveEvent::Error("transport failure".to_string()));

        assert_eq!(engine.state(), CallState::Error);
        assert_eq!(engine.audio_level(), 0.0);
        assert!(engine.session.lock().is_none());

        assert!(matches!(
            events.try_recv().unwrap(),
            CallEvent::StateChanged(CallState::Error)
        ));
        match events.try_recv().unwrap() {
            CallEvent::Error(msg) => assert_eq!(msg, "transport failure"),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_after_error_preserves_error_state() {
        let engine = engine();
        engine.set_state(CallState::Active);

        engine.handle_live_event(LiveEvent::Error("transport failure".to_string()));
        assert_eq!(engine.state(), CallState::Error);

        // Das Closed der sterbenden Session kommt danach und ändert nichts
        engine.handle_live_event(LiveEvent::Closed);
        assert_eq!(engine.state(), CallState::Error);
    }

    #[test]
    fn test_closed_while_active_returns_to_idle() {
        let engine = engine();
        engine.set_state(CallState::Active);

        engine.handle_live_event(LiveEvent::Closed);
        assert_eq!(engine.state(), CallState::Idle);
    }

    #[test]
    fn test_malformed_audio_chunk_keeps_call_alive() {
        let engine = engine();
        engine.set_state(CallState::Active);

        engine.handle_live_event(LiveEvent::Audio("not-base64!!".to_string()));
        assert_eq!(engine.state(), CallState::Active);
    }

    #[test]
    fn test_stop_while_connecting_closes_late_session() {
        use tokio_tungstenite::tungstenite::Message;

        let engine = engine();
        engine.set_state(CallState::Connecting);
        let attempt = engine.generation.load(Ordering::Acquire);

        // Der Nutzer legt auf, während der Verbindungsaufbau noch läuft
        engine.stop_call();
        assert_eq!(engine.state(), CallState::Idle);

        // Die Session löst danach auf: nicht übernehmen, sofort schließen
        let (session, mut rx) = LiveClient::disconnected();
        assert!(!engine.adopt_session(session, attempt));
        assert!(engine.session.lock().is_none());
        assert!(matches!(rx.try_recv().unwrap(), Message::Close(None)));
    }

    #[test]
    fn test_adopt_session_while_connecting_stores_it() {
        let engine = engine();
        engine.set_state(CallState::Connecting);
        let attempt = engine.generation.load(Ordering::Acquire);

        let (session, _rx) = LiveClient::disconnected();
        assert!(engine.adopt_session(session, attempt));
        assert!(engine.session.lock().is_some());
    }

    #[test]
    fn test_superseded_attempt_does_not_hijack_new_call() {
        use tokio_tungstenite::tungstenite::Message;

        let engine = engine();
        engine.set_state(CallState::Connecting);
        let first_attempt = engine.generation.load(Ordering::Acquire);

        // Auflegen und sofort neu anrufen: ein zweiter Versuch läuft
        engine.stop_call();
        engine.set_state(CallState::Connecting);

        // Die Session des ersten Versuchs darf den Slot des zweiten
        // nicht belegen
        let (session, mut rx) = LiveClient::disconnected();
        assert!(!engine.adopt_session(session, first_attempt));
        assert!(engine.session.lock().is_none());
        assert!(matches!(rx.try_recv().unwrap(), Message::Close(None)));
    }

    #[test]
    fn test_opened_outside_connecting_is_ignored() {
        let engine = engine();

        // Teardown war schneller: Opened auf Idle darf nichts starten
        engine.handle_live_event(LiveEvent::Opened);
        assert_eq!(engine.state(), CallState::Idle);
    }
}
