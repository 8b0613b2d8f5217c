//! Call Module - Lifecycle des Sprach-Anrufs
//!
//! Dieses Modul verwaltet:
//! - Aufbau von Playback, Capture und Live-Session
//! - Die Anruf-Zustandsmaschine (Idle/Connecting/Active/Error)
//! - Idempotenten Teardown aller Ressourcen

mod engine;

pub use engine::{CallEngine, CallEngineError, CallEvent, CallState};
