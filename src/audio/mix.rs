//! Sample-level mixing of two encoded clips.
//!
//! Both inputs are decoded to interleaved f32, brought to a common layout
//! (the higher sample rate and the larger channel count of the two), summed,
//! and written out as 16-bit WAV. If the sum would clip, the whole result is
//! scaled down so its peak sits at full scale.

use super::format::AudioFormat;
use super::wav_sink::{WAV_MIME_TYPE, encode_wav};
use crate::error::Error;
use crate::store::Blob;
use rodio::{Decoder, Source};
use std::io::Cursor;

/// Decoded interleaved audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub format: AudioFormat,
    pub samples: Vec<f32>,
}

impl Pcm {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }
}

pub fn decode(blob: Blob) -> Result<Pcm, Error> {
    blob.validate()?;
    let mime_type = blob.mime_type().to_string();
    let decoder = Decoder::new(Cursor::new(blob.into_bytes()))
        .map_err(|e| Error::Decode(format!("{}: {}", mime_type, e)))?;

    let format = AudioFormat {
        sample_rate: u32::from(decoder.sample_rate()),
        channels: u16::from(decoder.channels()),
    };
    if format.sample_rate == 0 || format.channels == 0 {
        return Err(Error::Decode(format!("{}: stream has no audio", mime_type)));
    }

    let samples: Vec<f32> = decoder.collect();
    Ok(Pcm { format, samples })
}

/// Mix two encoded clips into a WAV blob.
pub fn mix(a: Blob, b: Blob) -> Result<Blob, Error> {
    let a = decode(a)?;
    let b = decode(b)?;
    let mixed = mix_pcm(&a, &b);
    tracing::debug!(
        "Mixed {} + {} frames into {} frames at {} Hz x{}",
        a.frames(),
        b.frames(),
        mixed.frames(),
        mixed.format.sample_rate,
        mixed.format.channels
    );
    Ok(Blob::new(WAV_MIME_TYPE, encode_wav(mixed.format, &mixed.samples)?))
}

pub fn mix_pcm(a: &Pcm, b: &Pcm) -> Pcm {
    let format = AudioFormat {
        sample_rate: a.format.sample_rate.max(b.format.sample_rate),
        channels: a.format.channels.max(b.format.channels),
    };
    let a = conform(a, format);
    let b = conform(b, format);

    let len = a.len().max(b.len());
    let mut samples: Vec<f32> = (0..len)
        .map(|i| a.get(i).copied().unwrap_or(0.0) + b.get(i).copied().unwrap_or(0.0))
        .collect();

    let peak = peak_level(&samples);
    if peak > 1.0 {
        let gain = 1.0 / peak;
        samples.iter_mut().for_each(|s| *s *= gain);
    }

    Pcm { format, samples }
}

/// Remap channels, then resample, to reach `target`.
fn conform(pcm: &Pcm, target: AudioFormat) -> Vec<f32> {
    let remapped = remap_channels(&pcm.samples, pcm.format.channels, target.channels);
    resample(
        &remapped,
        target.channels,
        pcm.format.sample_rate,
        target.sample_rate,
    )
}

/// Up-mix by repeating source channels round-robin (mono fills every output
/// channel); down-mix averages into mono.
pub fn remap_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;

    samples
        .chunks_exact(from)
        .flat_map(|frame| {
            (0..to).map(move |ch| {
                if to == 1 {
                    frame.iter().sum::<f32>() / from as f32
                } else {
                    frame[ch % from]
                }
            })
        })
        .collect()
}

/// Linear interpolation resampling for interleaved audio.
pub fn resample(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let channels = channels as usize;
    let frame_count = samples.len() / channels;
    let ratio = to_rate as f64 / from_rate as f64;
    let output_frames = (frame_count as f64 * ratio) as usize;

    let mut output = vec![0.0f32; output_frames * channels];
    for i in 0..output_frames {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        for ch in 0..channels {
            output[i * channels + ch] = if index + 1 < frame_count {
                samples[index * channels + ch] * (1.0 - fraction)
                    + samples[(index + 1) * channels + ch] * fraction
            } else if index < frame_count {
                samples[index * channels + ch]
            } else {
                0.0
            };
        }
    }
    output
}

pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max)
}
