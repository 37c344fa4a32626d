use std::f64::consts::PI;

use ndarray::{Array2, Axis};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::config::SpectrogramConfig;

/// Floor applied to power values before taking logarithms.
const AMIN: f64 = 1e-10;

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

pub fn hz_to_mel(f: f64) -> f64 {
    if f >= MIN_LOG_HZ {
        MIN_LOG_MEL + (f / MIN_LOG_HZ).ln() / log_step()
    } else {
        f / F_SP
    }
}

pub fn mel_to_hz(m: f64) -> f64 {
    if m >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (m - MIN_LOG_MEL)).exp()
    } else {
        F_SP * m
    }
}

/// Periodic Hann window, as used for spectral analysis.
pub fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / size as f64).cos())
        .collect()
}

/// Power spectrogram |X|^2 of centred, Hann-windowed frames.
///
/// The signal is zero padded by `n_fft / 2` on both sides, so frame `t` is centred
/// on sample `t * hop`. Output shape is `(n_fft / 2 + 1, 1 + len / hop)`.
pub fn power_spectrogram(samples: &[f32], n_fft: usize, hop: usize) -> Array2<f64> {
    let pad = n_fft / 2;
    let mut padded = vec![0.0f64; samples.len() + 2 * pad];
    for (dst, &s) in padded[pad..].iter_mut().zip(samples) {
        *dst = s as f64;
    }

    let n_bins = n_fft / 2 + 1;
    let n_frames = 1 + (padded.len() - n_fft) / hop;
    let window = hann_window(n_fft);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);

    let mut spectrogram = Array2::<f64>::zeros((n_bins, n_frames));
    let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];

    for (t, mut column) in spectrogram.axis_iter_mut(Axis(1)).enumerate() {
        let start = t * hop;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(padded[start + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);
        for (k, value) in column.iter_mut().enumerate() {
            *value = buffer[k].norm_sqr();
        }
    }

    spectrogram
}

/// Triangular mel filters with Slaney area normalisation, shape `(n_mels, n_fft / 2 + 1)`.
pub fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: f64) -> Array2<f64> {
    let n_bins = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate / n_fft as f64)
        .collect();

    // n_mels + 2 edges, equally spaced on the mel scale between 0 Hz and Nyquist
    let mel_max = hz_to_mel(sample_rate / 2.0);
    let hz_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filterbank = Array2::<f64>::zeros((n_mels, n_bins));
    for (m, mut filter) in filterbank.axis_iter_mut(Axis(0)).enumerate() {
        let (left, center, right) = (hz_points[m], hz_points[m + 1], hz_points[m + 2]);
        let enorm = 2.0 / (right - left);
        for (k, weight) in filter.iter_mut().enumerate() {
            let lower = (fft_freqs[k] - left) / (center - left);
            let upper = (right - fft_freqs[k]) / (right - center);
            *weight = lower.min(upper).max(0.0) * enorm;
        }
    }

    filterbank
}

/// Mel-scaled power spectrogram, shape `(n_mels, frames)`.
pub fn mel_spectrogram(samples: &[f32], sample_rate: u32, params: &SpectrogramConfig) -> Array2<f64> {
    let power = power_spectrogram(samples, params.n_fft, params.hop_length);
    let filterbank = mel_filterbank(params.n_mels, params.n_fft, sample_rate as f64);
    filterbank.dot(&power)
}

/// Convert power to decibels relative to the peak, floored `top_db` below it.
pub fn power_to_db(power: &Array2<f64>, top_db: f64) -> Array2<f64> {
    let peak = power.iter().cloned().fold(0.0f64, f64::max);
    let reference = 10.0 * peak.max(AMIN).log10();

    let db = power.mapv(|p| 10.0 * p.max(AMIN).log10() - reference);
    let floor = db.iter().cloned().fold(f64::NEG_INFINITY, f64::max) - top_db;
    db.mapv(|v| v.max(floor))
}
