// cpal output and the shared playback transport
//
// cpal::Stream is not Send on every platform, so each engine owns a small
// output thread that builds the stream, keeps it alive and drops it on stop.
// The stream callback renders from `Transport`, which the engine mutates.

use crate::decoder::PcmTrack;
use crate::resample::OutputSpec;
use audiofile_core::{AudioError, EngineEvent, EngineEventSink, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Result of rendering one device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    Continue,
    /// The last frame was rendered and looping is off
    Ended,
}

/// Playback cursor over a fully decoded track
#[derive(Debug)]
pub struct TransportState {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    /// Duration of the source before conversion
    duration_ms: Option<u64>,
    frame: usize,
    playing: bool,
    volume: f32,
    looping: bool,
}

impl TransportState {
    fn new(looping: bool) -> Self {
        Self {
            samples: Vec::new(),
            channels: 0,
            sample_rate: 0,
            duration_ms: None,
            frame: 0,
            playing: false,
            volume: 1.0,
            looping,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.duration_ms.is_some()
    }

    pub fn total_frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn is_at_end(&self) -> bool {
        let total = self.total_frames();
        total > 0 && self.frame >= total
    }

    pub fn position_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        let ms = self.frame as u64 * 1000 / self.sample_rate as u64;
        self.duration_ms.map_or(ms, |duration| ms.min(duration))
    }

    pub fn seek_ms(&mut self, position_ms: u64) {
        let frame = position_ms.saturating_mul(self.sample_rate as u64) / 1000;
        self.frame = (frame as usize).min(self.total_frames());
    }

    /// Fill `out` (interleaved, `channels` wide) and advance the cursor.
    pub fn render(&mut self, out: &mut [f32]) -> Render {
        let total = self.total_frames();
        if !self.playing || total == 0 || self.channels == 0 {
            out.fill(0.0);
            return Render::Continue;
        }

        let mut outcome = Render::Continue;
        for frame_out in out.chunks_mut(self.channels) {
            if self.frame >= total {
                if self.looping {
                    self.frame = 0;
                } else {
                    frame_out.fill(0.0);
                    if self.playing {
                        self.playing = false;
                        outcome = Render::Ended;
                    }
                    continue;
                }
            }
            let start = self.frame * self.channels;
            for (dst, src) in frame_out.iter_mut().zip(&self.samples[start..start + self.channels]) {
                *dst = src * self.volume;
            }
            self.frame += 1;
        }

        // A track ending exactly on the buffer boundary
        if outcome == Render::Continue && self.frame >= total && !self.looping {
            self.playing = false;
            outcome = Render::Ended;
        }
        outcome
    }
}

/// State shared between an engine and its output callback
#[derive(Debug)]
pub struct Transport {
    state: Mutex<TransportState>,
}

impl Transport {
    pub fn new(looping: bool) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TransportState::new(looping)),
        })
    }

    /// Install converted PCM; `duration_ms` is the source's own duration.
    pub fn load(&self, track: PcmTrack, duration_ms: u64) {
        let mut state = self.state.lock();
        state.channels = track.channels as usize;
        state.sample_rate = track.sample_rate;
        state.samples = track.samples;
        state.duration_ms = Some(duration_ms);
        state.frame = 0;
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut TransportState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.state.lock().duration_ms
    }

    pub fn set_playing(&self, playing: bool) {
        self.state.lock().playing = playing;
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn set_volume(&self, volume: f32) {
        self.state.lock().volume = volume;
    }

    /// Stop and drop the PCM
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.playing = false;
        state.samples = Vec::new();
        state.frame = 0;
    }
}

/// Handle to a running output thread
pub struct OutputHandle {
    spec: OutputSpec,
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl OutputHandle {
    /// Open the default output device and start rendering from `transport`.
    pub fn spawn(transport: Arc<Transport>, events: EngineEventSink) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded::<Result<OutputSpec>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let name = format!("audiofile-output-{}", events.key().audio_id);

        let join = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let stream = match build_stream(transport, events) {
                    Ok((stream, spec)) => {
                        let _ = ready_tx.send(Ok(spec));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until stop() or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("Output stream closed");
            })
            .map_err(|e| AudioError::ThreadError(format!("Failed to spawn output thread: {}", e)))?;

        let spec = ready_rx
            .recv()
            .map_err(|_| AudioError::DeviceError("Output thread exited during setup".to_string()))??;

        Ok(Self {
            spec,
            stop: Some(stop_tx),
            join: Some(join),
        })
    }

    pub fn spec(&self) -> OutputSpec {
        self.spec
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("Output thread panicked");
            }
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    transport: Arc<Transport>,
    events: EngineEventSink,
) -> Result<(cpal::Stream, OutputSpec)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceError("No output device available".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceError(format!("No default output config: {}", e)))?;

    let format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let spec = OutputSpec {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };
    log::debug!("Stream config: {:?} ({:?})", config, format);

    let stream = match format {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, transport, events)?,
        SampleFormat::I16 => build_typed::<i16>(&device, &config, transport, events)?,
        SampleFormat::U16 => build_typed::<u16>(&device, &config, transport, events)?,
        other => {
            return Err(AudioError::UnsupportedFormat(format!(
                "Output sample format {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::PlaybackError(format!("Failed to start stream: {}", e)))?;
    Ok((stream, spec))
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    transport: Arc<Transport>,
    events: EngineEventSink,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let error_events = events.clone();
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                let outcome = transport.with(|state| state.render(&mut scratch));
                for (dst, src) in data.iter_mut().zip(&scratch) {
                    *dst = T::from_sample(*src);
                }
                if outcome == Render::Ended {
                    events.emit(EngineEvent::Ended);
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
                error_events.emit(EngineEvent::Error {
                    message: err.to_string(),
                });
            },
            None,
        )
        .map_err(|e| AudioError::InitializationError(format!("Failed to build output stream: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(samples: Vec<f32>, channels: u16, looping: bool) -> TransportState {
        let mut state = TransportState::new(looping);
        state.channels = channels as usize;
        state.sample_rate = 1_000;
        state.duration_ms = Some((samples.len() / channels as usize) as u64);
        state.samples = samples;
        state
    }

    #[test]
    fn test_silence_while_paused() {
        let mut state = loaded(vec![0.5; 8], 2, false);
        let mut out = [1.0; 4];
        assert_eq!(state.render(&mut out), Render::Continue);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(state.position_ms(), 0);
    }

    #[test]
    fn test_render_applies_volume_and_advances() {
        let mut state = loaded(vec![1.0, -1.0, 0.5, -0.5, 0.25, -0.25], 2, false);
        state.playing = true;
        state.volume = 0.5;

        let mut out = [0.0; 4];
        assert_eq!(state.render(&mut out), Render::Continue);
        assert_eq!(out, [0.5, -0.5, 0.25, -0.25]);
        assert_eq!(state.position_ms(), 2);
    }

    #[test]
    fn test_end_of_media_reported_once() {
        let mut state = loaded(vec![0.1, 0.2, 0.3], 1, false);
        state.playing = true;

        let mut out = [9.0; 5];
        assert_eq!(state.render(&mut out), Render::Ended);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.0, 0.0]);
        assert!(!state.playing);

        assert_eq!(state.render(&mut out), Render::Continue);
        assert_eq!(out, [0.0; 5]);
    }

    #[test]
    fn test_end_on_buffer_boundary() {
        let mut state = loaded(vec![0.1, 0.2], 1, false);
        state.playing = true;
        let mut out = [0.0; 2];
        assert_eq!(state.render(&mut out), Render::Ended);
    }

    #[test]
    fn test_looping_wraps_without_ending() {
        let mut state = loaded(vec![0.1, 0.2], 1, true);
        state.playing = true;

        let mut out = [0.0; 5];
        assert_eq!(state.render(&mut out), Render::Continue);
        assert_eq!(out, [0.1, 0.2, 0.1, 0.2, 0.1]);
        assert!(state.playing);
    }

    #[test]
    fn test_seek_clamps_to_track() {
        let mut state = loaded(vec![0.0; 500], 1, false);
        state.seek_ms(200);
        assert_eq!(state.position_ms(), 200);
        state.seek_ms(60_000);
        assert_eq!(state.position_ms(), 500);
        assert!(state.is_at_end());
    }

    #[test]
    fn test_transport_load_and_clear() {
        let transport = Transport::new(false);
        assert_eq!(transport.duration_ms(), None);

        transport.load(
            PcmTrack {
                samples: vec![0.0; 96],
                sample_rate: 48,
                channels: 2,
            },
            1_000,
        );
        assert_eq!(transport.duration_ms(), Some(1_000));
        assert!(transport.with(|state| state.is_loaded()));

        transport.set_playing(true);
        transport.clear();
        assert!(!transport.is_playing());
        assert_eq!(transport.with(|state| state.total_frames()), 0);
    }
}
