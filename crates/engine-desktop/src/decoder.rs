// Audio decoding using Symphonia
// Decodes a whole track up front into interleaved f32 PCM

use audiofile_core::{AudioError, Result};
use std::fs::File;
use std::io::{Cursor, ErrorKind};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Largest decoded track accepted, in interleaved samples (512 MiB of f32)
pub const MAX_DECODED_SAMPLES: usize = 128 * 1024 * 1024;

/// Decoded audio, interleaved
#[derive(Debug, Clone, PartialEq)]
pub struct PcmTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmTrack {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Decode a file on disk
pub fn decode_file(path: &Path) -> Result<PcmTrack> {
    let file = File::open(path)
        .map_err(|e| AudioError::LoadError(format!("Failed to open {}: {}", path.display(), e)))?;
    let hint = hint_for_extension(path.extension().and_then(|ext| ext.to_str()));
    decode(Box::new(file), hint, MAX_DECODED_SAMPLES)
}

/// Decode an in-memory file image; `extension` helps the probe when known
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<PcmTrack> {
    if bytes.is_empty() {
        return Err(AudioError::LoadError("empty audio buffer".to_string()));
    }
    decode(
        Box::new(Cursor::new(bytes)),
        hint_for_extension(extension),
        MAX_DECODED_SAMPLES,
    )
}

pub(crate) fn hint_for_extension(extension: Option<&str>) -> Hint {
    let mut hint = Hint::new();
    if let Some(ext) = extension.filter(|ext| !ext.is_empty()) {
        hint.with_extension(&ext.to_ascii_lowercase());
    }
    hint
}

fn decode(source: Box<dyn MediaSource>, hint: Hint, max_samples: usize) -> Result<PcmTrack> {
    let stream = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioError::UnsupportedFormat(format!("Failed to probe media: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioError::LoadError("No default track found".to_string()))?;
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioError::UnsupportedFormat("Sample rate not specified".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::DecodingError(format!("Failed to create decoder: {}", e)))?;

    let mut samples = Vec::new();
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("Stream reset required, stopping decode");
                break;
            }
            Err(e) => {
                return Err(AudioError::DecodingError(format!("Failed to read packet: {}", e)))
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt frames are skipped
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => {
                return Err(AudioError::DecodingError(format!("Failed to decode packet: {}", e)))
            }
        };

        let spec = *decoded.spec();
        channels.get_or_insert(spec.channels.count() as u16);

        let needed = decoded.capacity() * spec.channels.count();
        if buffer.as_ref().map_or(true, |buf| buf.capacity() < needed) {
            buffer = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        if let Some(buf) = buffer.as_mut() {
            buf.copy_interleaved_ref(decoded);
            if samples.len() + buf.samples().len() > max_samples {
                log::warn!("Decoded audio exceeds {} samples, giving up", max_samples);
                return Err(AudioError::LoadError(format!(
                    "Decoded audio exceeds {} samples",
                    max_samples
                )));
            }
            samples.extend_from_slice(buf.samples());
        }
    }

    let channels = channels
        .filter(|&c| c > 0)
        .ok_or_else(|| AudioError::UnsupportedFormat("Channels not specified".to_string()))?;

    if samples.is_empty() {
        return Err(AudioError::DecodingError("No audio decoded".to_string()));
    }

    let track = PcmTrack {
        samples,
        sample_rate,
        channels,
    };
    log::info!(
        "Decoded audio: {}Hz, {} channels, {} ms",
        track.sample_rate,
        track.channels,
        track.duration_ms()
    );
    Ok(track)
}

/// Minimal 16-bit PCM WAV image for tests
#[cfg(test)]
pub(crate) fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
    let data_len = (frames * channels as usize * 2) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
    out.extend_from_slice(&(channels * 2).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..frames * channels as usize {
        let sample = if i % 2 == 0 { 8_192i16 } else { -8_192i16 };
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}
