//! Audio Codec - PCM16 ⇄ Float ⇄ Base64
//!
//! Die Live API transportiert Audio als Base64-kodiertes 16-bit PCM
//! (little-endian) mit einem MIME-Tag für die Sample-Rate. Dieses Modul
//! enthält die reinen Konvertierungsfunktionen ohne jeden Zustand.

use super::INPUT_SAMPLE_RATE;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Invalid PCM length: {len} bytes for {channels} channel(s)")]
    InvalidLength { len: usize, channels: u16 },
}

// ============================================================================
// TYPES
// ============================================================================

/// Ein transportfertiger Audio-Chunk (Base64-PCM16 + MIME-Tag)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pub data: String,
    pub mime_type: String,
}

/// Ein dekodierter Wiedergabe-Block, pro Kanal de-interleaved
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    /// Anzahl Frames pro Kanal
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Dauer des Blocks in Sekunden
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Mischt alle Kanäle auf Mono herunter (Mittelwert)
    pub fn mixdown_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => {
                let frames = self.frames();
                let mut mono = Vec::with_capacity(frames);
                for i in 0..frames {
                    let sum: f32 = self.channels.iter().map(|c| c[i]).sum();
                    mono.push(sum / n as f32);
                }
                mono
            }
        }
    }
}

// ============================================================================
// ENCODING (Mikrofon → Live API)
// ============================================================================

/// Kodiert einen Float-Frame als Base64-PCM16-Chunk
///
/// Hinweis: Werte außerhalb von [-1, 1] wrappen bei der Verengung auf i16,
/// exakt wie die Int16Array-Zuweisung im Web-Client. cpal liefert
/// normalisierte Samples, daher tritt der Fall praktisch nicht auf; das
/// Verhalten ist durch einen Test festgenagelt.
pub fn encode_frame(samples: &[f32]) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * 32768.0).round() as i32 as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    EncodedChunk {
        data: BASE64.encode(&bytes),
        mime_type: format!("audio/pcm;rate={}", INPUT_SAMPLE_RATE),
    }
}

// ============================================================================
// DECODING (Live API → Lautsprecher)
// ============================================================================

/// Dekodiert den Base64-Text eines eingehenden Chunks zu rohen Bytes
pub fn decode_chunk(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(BASE64.decode(text)?)
}

/// Interpretiert rohe Bytes als interleaved PCM16 LE und baut einen
/// de-interleaved Float-Wiedergabeblock
pub fn decode_to_playback(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackBuffer, DecodeError> {
    let stride = 2 * channels as usize;
    if channels == 0 || bytes.len() % stride != 0 {
        return Err(DecodeError::InvalidLength {
            len: bytes.len(),
            channels,
        });
    }

    let frames = bytes.len() / stride;
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels as usize];

    for frame in bytes.chunks_exact(stride) {
        for (channel, sample) in frame.chunks_exact(2).enumerate() {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            out[channel].push(value as f32 / 32768.0);
        }
    }

    Ok(PlaybackBuffer {
        channels: out,
        sample_rate,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_within_quantization_error() {
        let samples: Vec<f32> = (0..256)
            .map(|i| ((i as f32 / 256.0) * std::f32::consts::TAU).sin() * 0.8)
            .collect();

        let chunk = encode_frame(&samples);
        let bytes = decode_chunk(&chunk.data).unwrap();
        let buffer = decode_to_playback(&bytes, INPUT_SAMPLE_RATE, 1).unwrap();

        assert_eq!(buffer.frames(), samples.len());
        let decoded = buffer.mixdown_mono();
        for (original, restored) in samples.iter().zip(decoded.iter()) {
            // Quantisierungsfehler: maximal ein LSB (1/32768)
            assert!(
                (original - restored).abs() <= 1.0 / 32768.0,
                "sample drifted: {original} vs {restored}"
            );
        }
    }

    #[test]
    fn test_encode_mime_tag_carries_input_rate() {
        let chunk = encode_frame(&[0.0; 4]);
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn test_encode_wraps_out_of_range_samples() {
        // Quell-Verhalten: 1.0 * 32768 liegt außerhalb von i16 und wrappt
        // auf -32768 statt zu saturieren. Bewusst nicht "repariert".
        let chunk = encode_frame(&[1.0]);
        let bytes = decode_chunk(&chunk.data).unwrap();
        let value = i16::from_le_bytes([bytes[0], bytes[1]]);
        assert_eq!(value, i16::MIN);
    }

    #[test]
    fn test_decode_rejects_odd_length_for_stereo() {
        // Stereo braucht Vielfache von 4 Bytes; 6 Bytes sind keine
        let err = decode_to_playback(&[0u8; 6], 24_000, 2).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::InvalidLength { len: 6, channels: 2 }
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(decode_chunk("not@valid@base64").is_err());
    }

    #[test]
    fn test_decode_deinterleaves_stereo() {
        // Frames: [L=0x0100, R=0x0200], [L=0x0300, R=0x0400]
        let bytes = [0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04];
        let buffer = decode_to_playback(&bytes, 24_000, 2).unwrap();

        assert_eq!(buffer.frames(), 2);
        let mono = buffer.mixdown_mono();
        // Mittelwert von L und R pro Frame
        assert!((mono[0] - (0x0100 as f32 + 0x0200 as f32) / 2.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_duration_matches_rate() {
        let bytes = vec![0u8; 24_000 * 2]; // 1 Sekunde Mono @ 24 kHz
        let buffer = decode_to_playback(&bytes, 24_000, 1).unwrap();
        assert!((buffer.duration_secs() - 1.0).abs() < 1e-9);
    }
}
