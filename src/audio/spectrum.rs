//! FFT analyser feeding the live spectrum view while recording.
//!
//! Output follows the byte frequency data of a Web Audio `AnalyserNode`:
//! `FFT_SIZE / 2` bins, each smoothed over time, converted to decibels and
//! mapped from `[MIN_DB, MAX_DB]` onto `0..=255`.

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

/// FFT size (must be power of 2)
pub const FFT_SIZE: usize = 256;

pub const BIN_COUNT: usize = FFT_SIZE / 2;

const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

pub struct SpectrumAnalyser {
    fft: Arc<dyn RealToComplex<f32>>,
    /// Most recent `FFT_SIZE` samples, oldest at `write_pos`
    history: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    windowed: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    /// Higher = smoother, slower response
    smoothing: f32,
}

impl SpectrumAnalyser {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let spectrum = fft.make_output_vec();

        // Hann window
        let window = (0..FFT_SIZE)
            .map(|i| {
                let x = i as f32 / FFT_SIZE as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * x).cos())
            })
            .collect();

        Self {
            fft,
            history: vec![0.0; FFT_SIZE],
            write_pos: 0,
            window,
            windowed: vec![0.0; FFT_SIZE],
            spectrum,
            smoothed: vec![0.0; BIN_COUNT],
            smoothing: 0.8,
        }
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % FFT_SIZE;
        }
    }

    /// Analyse the latest window and return one byte per frequency bin.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        for i in 0..FFT_SIZE {
            let sample = self.history[(self.write_pos + i) % FFT_SIZE];
            self.windowed[i] = sample * self.window[i];
        }

        if self.fft.process(&mut self.windowed, &mut self.spectrum).is_err() {
            return vec![0; BIN_COUNT];
        }

        let scale = 1.0 / FFT_SIZE as f32;
        let smoothing = self.smoothing;
        self.smoothed
            .iter_mut()
            .zip(&self.spectrum)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * scale;
                *smoothed = smoothing * *smoothed + (1.0 - smoothing) * magnitude;
                to_byte(*smoothed)
            })
            .collect()
    }
}

impl Default for SpectrumAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DB) / (MAX_DB - MIN_DB);
    scaled.clamp(0.0, 255.0) as u8
}
