// Sample-rate and channel conversion to the output device format

use crate::decoder::PcmTrack;

/// Format the output stream renders in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Convert a decoded track to `spec`. Channels first, then rate.
pub fn adapt(track: PcmTrack, spec: OutputSpec) -> PcmTrack {
    if !needs_conversion(&track, spec) {
        return track;
    }

    log::debug!(
        "Converting {}Hz/{}ch -> {}Hz/{}ch",
        track.sample_rate,
        track.channels,
        spec.sample_rate,
        spec.channels
    );

    let mapped = convert_channels(&track.samples, track.channels, spec.channels);
    let samples = if track.sample_rate != spec.sample_rate {
        resample_linear(&mapped, spec.channels, track.sample_rate, spec.sample_rate)
    } else {
        mapped
    };

    PcmTrack {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    }
}

pub fn needs_conversion(track: &PcmTrack, spec: OutputSpec) -> bool {
    track.sample_rate != spec.sample_rate || track.channels != spec.channels
}

/// Map interleaved frames between channel layouts
fn convert_channels(input: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from as usize, to as usize);
    if from == to || from == 0 || to == 0 {
        return input.to_vec();
    }

    let frames = input.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for frame in input.chunks_exact(from) {
        match (from, to) {
            // Mono to anything: duplicate
            (1, _) => output.extend(std::iter::repeat(frame[0]).take(to)),
            // Anything to mono: average
            (_, 1) => output.push(frame.iter().sum::<f32>() / from as f32),
            // Otherwise keep the leading channels and pad with silence
            _ => {
                for ch in 0..to {
                    output.push(frame.get(ch).copied().unwrap_or(0.0));
                }
            }
        }
    }
    output
}

/// Linear interpolation resampling
fn resample_linear(input: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let channels = channels as usize;
    if channels == 0 || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }

    let input_frames = input.len() / channels;
    if input_frames == 0 {
        return Vec::new();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_frames = (input_frames as f64 * ratio) as usize;
    let mut output = Vec::with_capacity(output_frames * channels);

    for frame_idx in 0..output_frames {
        let src = frame_idx as f64 / ratio;
        let floor = (src.floor() as usize).min(input_frames - 1);
        let ceil = (floor + 1).min(input_frames - 1);
        let frac = (src - floor as f64) as f32;

        for ch in 0..channels {
            let a = input[floor * channels + ch];
            let b = input[ceil * channels + ch];
            output.push(a + (b - a) * frac);
        }
    }

    output
}
