//! Audio Module - Codec, Capture und Playback
//!
//! Dieses Modul verwaltet die komplette Audio-Pipeline des Anrufs:
//! - PCM16/Base64 Codec für die Live API
//! - Mikrofon-Capture mit Pegelmessung (cpal)
//! - Lückenlose Wiedergabe der Modell-Antworten

mod capture;
mod codec;
mod playback;

pub use capture::{AudioError, CaptureHandler};
pub use codec::{decode_chunk, decode_to_playback, encode_frame, DecodeError, EncodedChunk, PlaybackBuffer};
pub use playback::{PlaybackScheduler, Timeline};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Eingangs-Sample-Rate (die Live API erwartet 16 kHz PCM)
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Ausgangs-Sample-Rate (die Live API liefert 24 kHz PCM)
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Channels (Mono für Voice)
pub const CHANNELS: u16 = 1;

/// Frame-Größe in Samples (4096 Samples @ 16 kHz = 256 ms pro Chunk)
pub const FRAME_SIZE: usize = 4096;
