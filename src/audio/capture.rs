//! Capture Pipeline - Mikrofon → EncodedChunks
//!
//! Verwendet cpal für das Mikrofon. Der Input-Callback mischt auf Mono
//! herunter, resampelt auf 16 kHz, schneidet feste Frames, misst den Pegel
//! und schickt jeden Frame kodiert in die Session-Queue. Der Callback
//! blockiert nie und wirft nie: Sendefehler werden geloggt und tauchen
//! über den Error-Pfad der Session wieder auf.

use super::codec::{encode_frame, EncodedChunk};
use super::{FRAME_SIZE, INPUT_SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedStreamConfigRange};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("No audio output device found")]
    NoOutputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

// ============================================================================
// CAPTURE HANDLER
// ============================================================================

/// Handler für das Mikrofon
///
/// Zweiphasig, passend zur Anruf-Zustandsmaschine: `open()` beschafft Gerät
/// und Konfiguration während `connecting`, `start()` baut den Stream erst,
/// wenn die Session offen ist.
///
/// Note: Stream ist nicht Send, daher wrappen wir in Send-fähige Container
pub struct CaptureHandler {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    input_level: Arc<Mutex<f32>>,
}

// CaptureHandler ist nicht automatisch Send wegen Stream
unsafe impl Send for CaptureHandler {}

impl CaptureHandler {
    /// Beschafft das Default-Mikrofon und eine passende Konfiguration
    pub fn open(input_level: Arc<Mutex<f32>>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;

        let config = find_best_input_config(&device)?;

        tracing::info!(
            "Input device ready: {} Hz, {} channel(s)",
            config.sample_rate.0,
            config.channels
        );

        Ok(Self {
            device,
            config,
            stream: None,
            input_level,
        })
    }

    /// Baut den Input-Stream und beginnt, Frames in die Queue zu schieben
    ///
    /// Die Frame-Reihenfolge entspricht der Aufnahme-Reihenfolge: ein
    /// einzelner Callback, eine einzelne Queue.
    pub fn start(&mut self, sink: mpsc::Sender<EncodedChunk>) -> Result<(), AudioError> {
        let source_rate = self.config.sample_rate.0;
        let source_channels = self.config.channels as usize;
        let input_level = Arc::clone(&self.input_level);
        let mut chunker = FrameChunker::new(FRAME_SIZE);

        tracing::info!(
            "Starting audio capture: {} Hz, {} channels",
            source_rate,
            source_channels
        );

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = downmix_to_mono(data, source_channels);
                    let samples = resample_linear(&mono, source_rate, INPUT_SAMPLE_RATE);

                    for frame in chunker.push(&samples) {
                        // Pegel für den Visualizer (best effort, letzter gewinnt)
                        *input_level.lock() = meter_level(&frame);

                        let chunk = encode_frame(&frame);
                        // try_send blockiert den Audio-Tick nie; wenn die Queue
                        // weg ist, ist die Session bereits im Abbau
                        if let Err(e) = sink.try_send(chunk) {
                            tracing::debug!("Dropping capture frame: {}", e);
                        }
                    }
                },
                |err| {
                    tracing::error!("Audio capture error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    /// Stoppt den Stream und setzt den Pegel zurück
    pub fn stop(&mut self) {
        self.stream = None;
        *self.input_level.lock() = 0.0;
        tracing::info!("Audio capture stopped");
    }

    /// Läuft gerade ein Capture-Stream?
    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

// ============================================================================
// CONFIG SELECTION
// ============================================================================

/// Findet die beste Input-Konfiguration
fn find_best_input_config(device: &Device) -> Result<StreamConfig, AudioError> {
    let configs = device
        .supported_input_configs()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

    select_best_config(configs.collect(), INPUT_SAMPLE_RATE)
}

/// Wählt die beste Konfiguration aus einer Liste
///
/// Priorität: exakt die Zielrate mit F32 > F32 mit anderer Rate > erste
/// verfügbare. Abweichende Raten werden im Callback umgerechnet.
pub(super) fn select_best_config(
    configs: Vec<SupportedStreamConfigRange>,
    target: u32,
) -> Result<StreamConfig, AudioError> {
    let target_rate = cpal::SampleRate(target);

    for config in &configs {
        if config.min_sample_rate() <= target_rate
            && config.max_sample_rate() >= target_rate
            && config.sample_format() == SampleFormat::F32
        {
            return Ok(config.clone().with_sample_rate(target_rate).into());
        }
    }

    for config in &configs {
        if config.sample_format() == SampleFormat::F32 {
            let rate = if config.min_sample_rate() <= target_rate
                && config.max_sample_rate() >= target_rate
            {
                target_rate
            } else {
                config.max_sample_rate()
            };
            return Ok(config.clone().with_sample_rate(rate).into());
        }
    }

    if let Some(config) = configs.first() {
        return Ok(config.clone().with_max_sample_rate().into());
    }

    Err(AudioError::UnsupportedConfig(
        "No suitable audio configuration found".to_string(),
    ))
}

// ============================================================================
// FRAME PROCESSING
// ============================================================================

/// Mischt interleaved Samples auf Mono herunter (Mittelwert pro Frame)
fn downmix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Einfaches Linear-Resampling (Capture- und Playback-Seite teilen es sich)
pub(super) fn resample_linear(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || data.is_empty() {
        return data.to_vec();
    }

    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

/// Schneidet einen kontinuierlichen Sample-Strom in feste Frames
///
/// Restbestände unterhalb der Frame-Größe bleiben bis zum nächsten Tick
/// liegen, es geht kein Sample verloren und nichts wird doppelt geliefert.
struct FrameChunker {
    pending: Vec<f32>,
    frame_size: usize,
}

impl FrameChunker {
    fn new(frame_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(frame_size * 2),
            frame_size,
        }
    }

    fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }
}

/// Root-Mean-Square Pegel eines Frames (0.0 - 1.0)
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    energy.sqrt().min(1.0)
}

/// Anzeige-Pegel für den Visualizer: RMS um Faktor 5 angehoben, auf 1.0
/// begrenzt. Sprache liegt weit unter Vollaussteuerung; ohne Anhebung
/// bewegt sich die Anzeige kaum.
fn meter_level(samples: &[f32]) -> f32 {
    (rms(samples) * 5.0).min(1.0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunker_emits_fixed_frames_in_order() {
        let mut chunker = FrameChunker::new(4);

        // 6 Samples: ein voller Frame, 2 bleiben liegen
        let frames = chunker.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(frames, vec![vec![1.0, 2.0, 3.0, 4.0]]);

        // Die Restsamples kommen vor den neuen
        let frames = chunker.push(&[7.0, 8.0]);
        assert_eq!(frames, vec![vec![5.0, 6.0, 7.0, 8.0]]);
    }

    #[test]
    fn test_chunker_handles_bursts() {
        let mut chunker = FrameChunker::new(2);
        let frames = chunker.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], vec![3.0, 4.0]);
    }

    #[test]
    fn test_downmix_averages_channels() {
        // Stereo-Frames (0.0, 1.0) und (0.5, 0.5)
        let mono = downmix_to_mono(&[0.0, 1.0, 0.5, 0.5], 2);
        assert_eq!(mono, vec![0.5, 0.5]);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let mono = downmix_to_mono(&[0.1, 0.2], 1);
        assert_eq!(mono, vec![0.1, 0.2]);
    }

    #[test]
    fn test_resample_identity_when_rates_match() {
        let data = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&data, 16_000, 16_000), data);
    }

    #[test]
    fn test_resample_halves_length_when_downsampling() {
        let data = vec![0.0; 480];
        let out = resample_linear(&data, 48_000, 16_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn test_rms_of_constant_signal() {
        // Konstante 0.5 → RMS exakt 0.5
        let level = rms(&[0.5; 128]);
        assert!((level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_empty_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn test_meter_level_boosts_quiet_signals() {
        // RMS 0.1 → Anzeige 0.5
        let level = meter_level(&[0.1; 128]);
        assert!((level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_meter_level_clamps_at_full_scale() {
        // RMS 0.5 angehoben wäre 2.5, die Anzeige endet bei 1.0
        assert_eq!(meter_level(&[0.5; 128]), 1.0);
    }
}
