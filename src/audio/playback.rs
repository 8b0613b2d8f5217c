//! Playback Scheduler - lückenlose Wiedergabe der Modell-Antworten
//!
//! Eingehende Chunks kommen in Ankunftsreihenfolge, aber zu beliebigen
//! Zeitpunkten. Die `Timeline` plant jeden Block exakt ans Ende des vorigen:
//! kein Loch, keine Überlappung. Kommen Chunks schneller als Echtzeit,
//! wandern sie weiter in die Zukunft; es wird nichts verworfen, nur die
//! Latenz wächst.

use super::capture::{resample_linear, select_best_config, AudioError};
use super::codec::PlaybackBuffer;
use super::OUTPUT_SAMPLE_RATE;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use parking_lot::Mutex;
use std::sync::Arc;

// ============================================================================
// TIMELINE
// ============================================================================

/// Eine eingeplante Quelle: ein Block Mono-Samples ab einem festen Startframe
struct ScheduledSource {
    start_frame: u64,
    samples: Vec<f32>,
}

impl ScheduledSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Der reine Planungs-Kern, getrennt vom cpal-Stream
///
/// Zustand: die Ausgabeuhr (in Frames), der nächste freie Startzeitpunkt
/// und die Menge der laufenden Quellen. Mutiert wird nur aus dem
/// Render-Callback und dem Teardown-Pfad.
pub struct Timeline {
    sample_rate: u32,
    clock_frames: u64,
    next_start_frame: u64,
    sources: Vec<ScheduledSource>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            clock_frames: 0,
            next_start_frame: 0,
            sources: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Aktuelle Position der Ausgabeuhr in Frames
    pub fn current_frame(&self) -> u64 {
        self.clock_frames
    }

    /// Anzahl der gerade eingeplanten/laufenden Quellen
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Verankert den nächsten Start an der aktuellen Uhr (bei Session-Open)
    pub fn reset(&mut self) {
        self.next_start_frame = self.clock_frames;
    }

    /// Plant einen Mono-Block ein und gibt seinen Startframe zurück
    ///
    /// `start = max(next_start, clock)` fängt Drift nach Leerlauf ab, damit
    /// nie in die Vergangenheit geplant wird; danach rückt `next_start` um
    /// die volle Blocklänge vor. Startzeiten sind dadurch monoton und
    /// lückenlos, solange Nachschub da ist.
    pub fn schedule(&mut self, samples: Vec<f32>) -> u64 {
        let start = self.next_start_frame.max(self.clock_frames);
        self.next_start_frame = start + samples.len() as u64;
        self.sources.push(ScheduledSource {
            start_frame: start,
            samples,
        });
        start
    }

    /// Stoppt alle Quellen sofort und leert die Menge
    ///
    /// Auf einer bereits leeren Menge ein No-op, damit Teardown und ein
    /// gleichzeitig auslaufender Block sich nicht beißen.
    pub fn stop_all(&mut self) {
        self.sources.clear();
    }

    /// Rendert `out.len() / channels` Frames und rückt die Uhr vor
    ///
    /// Mono-Quellen werden auf alle Ausgabekanäle dupliziert. Quellen,
    /// deren Ende hinter der Uhr liegt, verlassen die Menge von selbst.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let window_start = self.clock_frames;
        let window_end = window_start + frames;

        for source in &self.sources {
            let begin = source.start_frame.max(window_start);
            let end = source.end_frame().min(window_end);
            for t in begin..end {
                let sample = source.samples[(t - source.start_frame) as usize];
                let frame_idx = (t - window_start) as usize;
                for c in 0..channels {
                    out[frame_idx * channels + c] += sample;
                }
            }
        }

        self.clock_frames = window_end;
        let clock = self.clock_frames;
        self.sources.retain(|s| s.end_frame() > clock);
    }
}

// ============================================================================
// PLAYBACK SCHEDULER
// ============================================================================

/// Besitzt den Output-Stream und die Timeline dahinter
///
/// Note: Stream ist nicht Send, daher wrappen wir in Send-fähige Container
pub struct PlaybackScheduler {
    timeline: Arc<Mutex<Timeline>>,
    device_rate: u32,
    stream: Option<Stream>,
}

// PlaybackScheduler ist nicht automatisch Send wegen Stream
unsafe impl Send for PlaybackScheduler {}

impl PlaybackScheduler {
    /// Öffnet das Default-Ausgabegerät und startet den Render-Stream
    pub fn open() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)?;

        let config = find_best_output_config(&device)?;
        let device_rate = config.sample_rate.0;
        let channels = config.channels as usize;

        tracing::info!(
            "Starting audio playback: {} Hz, {} channels",
            device_rate,
            channels
        );

        let timeline = Arc::new(Mutex::new(Timeline::new(device_rate)));
        let timeline_render = Arc::clone(&timeline);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    timeline_render.lock().render(data, channels);
                },
                |err| {
                    tracing::error!("Audio playback error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

        Ok(Self {
            timeline,
            device_rate,
            stream: Some(stream),
        })
    }

    /// Verankert den Zeitplan neu (beim Öffnen der Session)
    pub fn reset(&self) {
        self.timeline.lock().reset();
    }

    /// Plant einen dekodierten Block lückenlos hinter dem letzten ein
    pub fn enqueue(&self, buffer: &PlaybackBuffer) {
        let mono = buffer.mixdown_mono();
        let samples = resample_linear(&mono, buffer.sample_rate(), self.device_rate);

        let mut timeline = self.timeline.lock();
        let start = timeline.schedule(samples);
        tracing::trace!(
            "Scheduled {:.3}s of audio at frame {} ({} sources in flight)",
            buffer.duration_secs(),
            start,
            timeline.active_sources()
        );
    }

    /// Anzahl der laufenden Quellen (für Diagnose und Tests)
    pub fn active_sources(&self) -> usize {
        self.timeline.lock().active_sources()
    }

    /// Stoppt den Stream und alle eingeplanten Quellen
    pub fn stop(&mut self) {
        self.stream = None;
        self.timeline.lock().stop_all();
        tracing::info!("Audio playback stopped");
    }
}

/// Findet die beste Output-Konfiguration (Ziel: 24 kHz, die Rate der Live API)
fn find_best_output_config(device: &Device) -> Result<StreamConfig, AudioError> {
    let configs = device
        .supported_output_configs()
        .map_err(|e| AudioError::UnsupportedConfig(e.to_string()))?;

    select_best_config(configs.collect(), OUTPUT_SAMPLE_RATE)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Sample-Rate 1000 macht Frames zu Millisekunden
    fn timeline() -> Timeline {
        Timeline::new(1000)
    }

    #[test]
    fn test_back_to_back_blocks_are_gapless() {
        let mut tl = timeline();
        tl.reset();

        // 1.0s und 0.5s direkt hintereinander → Starts T und T+1.0
        let first = tl.schedule(vec![0.0; 1000]);
        let second = tl.schedule(vec![0.0; 500]);

        assert_eq!(first, 0);
        assert_eq!(second, 1000);
        // Ende des Zeitplans bei T+1.5
        let third = tl.schedule(vec![0.0; 100]);
        assert_eq!(third, 1500);
    }

    #[test]
    fn test_starts_are_monotone_and_non_overlapping() {
        let mut tl = timeline();
        let durations = [250usize, 100, 400, 50];

        let mut previous_end = 0u64;
        for d in durations {
            let start = tl.schedule(vec![0.0; d]);
            // start[i+1] >= start[i] + d[i], hier ohne Backlog sogar gleich
            assert_eq!(start, previous_end);
            previous_end = start + d as u64;
        }
    }

    #[test]
    fn test_drift_guard_after_idle() {
        let mut tl = timeline();
        tl.schedule(vec![0.0; 100]);

        // 500 Frames rendern: der Block ist längst vorbei, die Uhr steht
        // hinter next_start
        let mut out = vec![0.0f32; 500];
        tl.render(&mut out, 1);
        assert_eq!(tl.current_frame(), 500);

        // Neuer Block darf nicht in der Vergangenheit starten
        let start = tl.schedule(vec![0.0; 100]);
        assert_eq!(start, 500);
    }

    #[test]
    fn test_burst_queues_into_the_future() {
        let mut tl = timeline();

        // Zehn Blöcke auf einmal: alles wird eingeplant, nichts verworfen
        for _ in 0..10 {
            tl.schedule(vec![0.0; 100]);
        }
        assert_eq!(tl.active_sources(), 10);

        // Nach 100 Frames ist genau der erste fertig
        let mut out = vec![0.0f32; 100];
        tl.render(&mut out, 1);
        assert_eq!(tl.active_sources(), 9);
    }

    #[test]
    fn test_render_duplicates_mono_to_all_channels() {
        let mut tl = timeline();
        tl.schedule(vec![0.25; 4]);

        let mut out = vec![0.0f32; 8]; // 4 Frames Stereo
        tl.render(&mut out, 2);
        assert_eq!(out, vec![0.25; 8]);
    }

    #[test]
    fn test_finished_sources_leave_the_set() {
        let mut tl = timeline();
        tl.schedule(vec![0.0; 64]);
        tl.schedule(vec![0.0; 64]);
        assert_eq!(tl.active_sources(), 2);

        let mut out = vec![0.0f32; 64];
        tl.render(&mut out, 1);
        // Erster Block fertig, zweiter läuft noch
        assert_eq!(tl.active_sources(), 1);

        tl.render(&mut out, 1);
        assert_eq!(tl.active_sources(), 0);
    }

    #[test]
    fn test_stop_all_is_idempotent() {
        let mut tl = timeline();
        tl.schedule(vec![0.0; 100]);

        tl.stop_all();
        assert_eq!(tl.active_sources(), 0);

        // Zweiter Aufruf auf leerer Menge ist ein No-op
        tl.stop_all();
        assert_eq!(tl.active_sources(), 0);

        // Rendern nach stop_all liefert Stille
        let mut out = vec![1.0f32; 16];
        tl.render(&mut out, 1);
        assert_eq!(out, vec![0.0; 16]);
    }

    #[test]
    fn test_reset_anchors_next_start_at_clock() {
        let mut tl = timeline();
        tl.schedule(vec![0.0; 1000]);

        let mut out = vec![0.0f32; 250];
        tl.render(&mut out, 1);

        // Session neu geöffnet: der Plan beginnt wieder bei "jetzt"
        tl.reset();
        let start = tl.schedule(vec![0.0; 10]);
        assert_eq!(start, 250);
    }
}
