//! # Audio Enhancement
//!
//! Optional cleanup applied between conversion and recognition:
//!
//! - spectral noise gating (STFT magnitude mask against an estimated
//!   global noise floor)
//! - peak normalization
//! - 80Hz high-pass to strip rumble and DC offset, run forward and
//!   backward for zero phase shift
//!
//! Enhancement is best-effort: a failing stage logs a warning and passes
//! its input through unchanged. The job never fails because of cleanup.

use crate::audio::decode;
use crate::error::{AppError, AppResult};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::Serialize;
use std::path::Path;

const FFT_SIZE: usize = 1024;
const HOP: usize = 256;
const GATE_THRESHOLD: f32 = 2.0;
const NORMALIZE_PEAK: f32 = 0.95;
const HIGHPASS_HZ: f32 = 80.0;

/// Which enhancement stages actually ran.
#[derive(Debug, Clone, Serialize)]
pub struct EnhancementInfo {
    pub applied: Vec<String>,
}

pub struct Enhancer {
    pub target_sample_rate: u32,
}

impl Enhancer {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    /// Read a WAV, run the enhancement stages, write the result as
    /// canonical mono WAV.
    pub fn enhance_file(&self, input: &Path, output: &Path) -> AppResult<EnhancementInfo> {
        let decoded = decode::decode_file(input)
            .map_err(|e| AppError::Internal(format!("Cannot read audio for enhancement: {}", e)))?;
        let mut applied = Vec::new();

        // Resample first, then fold the channels down
        let mut samples = decoded.samples;
        if decoded.sample_rate != self.target_sample_rate {
            match decode::resample(
                samples.clone(),
                decoded.channels,
                decoded.sample_rate,
                self.target_sample_rate,
            ) {
                Ok(resampled) => {
                    samples = resampled;
                    applied.push("resample".to_string());
                }
                Err(e) => tracing::warn!("Resample stage skipped: {}", e),
            }
        }
        if decoded.channels > 1 {
            samples = decode::downmix_to_mono(&samples, decoded.channels);
            applied.push("downmix".to_string());
        }

        samples = spectral_gate(&samples);
        applied.push("noise_gate".to_string());

        if peak_normalize(&mut samples) {
            applied.push("normalize".to_string());
        }

        samples = highpass_filtfilt(&samples, self.target_sample_rate as f32);
        applied.push("highpass".to_string());

        self.write_wav(&samples, output)
            .map_err(|e| AppError::Internal(format!("Failed to write enhanced audio: {}", e)))?;

        tracing::debug!(stages = ?applied, "Audio enhancement complete");
        Ok(EnhancementInfo { applied })
    }

    fn write_wav(&self, samples: &[f32], output: &Path) -> anyhow::Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.target_sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(output, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Zero out time-frequency bins that sit near the estimated noise floor.
///
/// The floor is the 10th percentile magnitude across every frame and bin;
/// bins below `GATE_THRESHOLD` times the floor are removed outright.
fn spectral_gate(samples: &[f32]) -> Vec<f32> {
    if samples.len() < FFT_SIZE {
        return samples.to_vec();
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);
    let ifft = planner.plan_fft_inverse(FFT_SIZE);
    let window: Vec<f32> = (0..FFT_SIZE)
        .map(|i| {
            let x = std::f32::consts::PI * 2.0 * i as f32 / FFT_SIZE as f32;
            0.5 * (1.0 - x.cos())
        })
        .collect();

    // Analysis pass: windowed STFT frames
    let starts: Vec<usize> = (0..=samples.len() - FFT_SIZE).step_by(HOP).collect();
    let mut spectra: Vec<Vec<Complex<f32>>> = Vec::with_capacity(starts.len());
    for &start in &starts {
        let mut frame: Vec<Complex<f32>> = samples[start..start + FFT_SIZE]
            .iter()
            .zip(&window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        fft.process(&mut frame);
        spectra.push(frame);
    }

    // Noise floor: 10th percentile magnitude over the whole spectrogram
    let bins = FFT_SIZE / 2 + 1;
    let mut mags: Vec<f32> = Vec::with_capacity(spectra.len() * bins);
    for frame in &spectra {
        mags.extend(frame[..bins].iter().map(|c| c.norm()));
    }
    mags.sort_by(|a, b| a.total_cmp(b));
    let floor = mags[mags.len() / 10];

    // Mask and resynthesize with overlap-add
    let mut out = vec![0.0f32; samples.len()];
    let mut norm = vec![0.0f32; samples.len()];
    let scale = 1.0 / FFT_SIZE as f32;
    for (frame, &start) in spectra.iter_mut().zip(&starts) {
        for bin in 0..bins {
            if frame[bin].norm() < GATE_THRESHOLD * floor {
                frame[bin] = Complex::new(0.0, 0.0);
                // Mirror onto the conjugate-symmetric half
                if bin > 0 && bin < FFT_SIZE / 2 {
                    frame[FFT_SIZE - bin] = Complex::new(0.0, 0.0);
                }
            }
        }
        ifft.process(frame);
        for (i, c) in frame.iter().enumerate() {
            out[start + i] += c.re * scale * window[i];
            norm[start + i] += window[i] * window[i];
        }
    }

    for (o, n) in out.iter_mut().zip(&norm) {
        if *n > 1e-6 {
            *o /= n;
        }
    }
    out
}

/// Scale the signal so its peak sits at `NORMALIZE_PEAK`. Silence is left
/// alone. Returns whether any scaling happened.
fn peak_normalize(samples: &mut [f32]) -> bool {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak < 1e-4 {
        return false;
    }
    let gain = NORMALIZE_PEAK / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
    true
}

// One pole-pair of the Butterworth cascade, RBJ highpass form.
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Biquad {
    fn highpass(fc: f32, fs: f32, q: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * fc / fs;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos_w0) / 2.0 / a0,
            b1: -(1.0 + cos_w0) / a0,
            b2: (1.0 + cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn run(&self, input: &[f32]) -> Vec<f32> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0f32, 0.0, 0.0, 0.0);
        input
            .iter()
            .map(|&x| {
                let y = self.b0 * x + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
                x2 = x1;
                x1 = x;
                y2 = y1;
                y1 = y;
                y
            })
            .collect()
    }
}

fn first_order_highpass(input: &[f32], fc: f32, fs: f32) -> Vec<f32> {
    let wc = (std::f32::consts::PI * fc / fs).tan();
    let b0 = 1.0 / (1.0 + wc);
    let a1 = (wc - 1.0) / (1.0 + wc);
    let (mut x1, mut y1) = (0.0f32, 0.0f32);
    input
        .iter()
        .map(|&x| {
            let y = b0 * x - b0 * x1 - a1 * y1;
            x1 = x;
            y1 = y;
            y
        })
        .collect()
}

/// Fifth-order Butterworth high-pass, run forward then backward so the
/// cascade contributes no phase distortion.
fn highpass_filtfilt(samples: &[f32], fs: f32) -> Vec<f32> {
    // Butterworth order 5: one real pole plus two pole pairs
    let sections = [
        Biquad::highpass(HIGHPASS_HZ, fs, 0.618),
        Biquad::highpass(HIGHPASS_HZ, fs, 1.618),
    ];

    let pass = |input: &[f32]| -> Vec<f32> {
        let mut out = first_order_highpass(input, HIGHPASS_HZ, fs);
        for section in &sections {
            out = section.run(&out);
        }
        out
    };

    let mut out = pass(samples);
    out.reverse();
    out = pass(&out);
    out.reverse();
    out
}
