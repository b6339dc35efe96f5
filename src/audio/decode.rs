//! # Audio Decoding Primitives
//!
//! Shared symphonia-based decoding plus the sample-level transforms
//! (resampling, channel downmix) that the converter and enhancer both use.
//! Errors here are `anyhow` internals; callers decide how they surface.

use anyhow::{anyhow, Context, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Fully decoded audio: interleaved f32 samples in [-1.0, 1.0].
#[derive(Debug)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }
}

/// Decode an entire file into interleaved f32 samples.
///
/// Handles every container/codec pair the enabled symphonia features
/// cover (WAV, MP3, FLAC, AAC/M4A, OGG Vorbis). Corrupt packets are
/// skipped; a file that yields zero samples is an error.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("Unrecognized audio format: {}", path.display()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("No decodable audio track in {}", path.display()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = 0u32;
    let mut channels = 0u16;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow!("Failed to read packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if sample_buf.is_none() {
                    sample_rate = spec.rate;
                    channels = spec.channels.count() as u16;
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = sample_buf.as_mut() {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            // Skip corrupt packets instead of abandoning the whole file
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("Skipping corrupt packet in {}: {}", path.display(), e);
            }
            Err(e) => return Err(anyhow!("Decode failed: {}", e)),
        }
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(anyhow!("Decoded no audio from {}", path.display()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

// Input frames per resampler call; FastFixedIn needs fixed-size input.
const RESAMPLE_CHUNK: usize = 1024;

/// Resample interleaved audio to a new rate using a septic polynomial
/// interpolator. Returns the input untouched when the rates already match.
pub fn resample(samples: Vec<f32>, channels: u16, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }
    let channels = channels.max(1) as usize;
    let ratio = to_rate as f64 / from_rate as f64;

    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0,
        PolynomialDegree::Septic,
        RESAMPLE_CHUNK,
        channels,
    )
    .map_err(|e| anyhow!("Failed to construct resampler: {}", e))?;

    // Split the interleaved stream into per-channel planes
    let in_frames = samples.len() / channels;
    let mut planes: Vec<Vec<f32>> = vec![Vec::with_capacity(in_frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, &s) in frame.iter().enumerate() {
            planes[ch].push(s);
        }
    }

    let mut out_planes: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut pos = 0;
    while pos < in_frames {
        let end = (pos + RESAMPLE_CHUNK).min(in_frames);
        let mut chunk: Vec<Vec<f32>> = planes
            .iter()
            .map(|plane| plane[pos..end].to_vec())
            .collect();
        // Final partial chunk is zero-padded; the tail is trimmed below
        for plane in &mut chunk {
            plane.resize(RESAMPLE_CHUNK, 0.0);
        }

        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| anyhow!("Resampling failed: {}", e))?;
        for (ch, plane) in processed.into_iter().enumerate() {
            out_planes[ch].extend_from_slice(&plane);
        }
        pos = end;
    }

    let expected = (in_frames as f64 * ratio).round() as usize;
    for plane in &mut out_planes {
        plane.truncate(expected);
    }

    // Re-interleave
    let out_frames = out_planes.iter().map(|p| p.len()).min().unwrap_or(0);
    let mut out = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        for plane in &out_planes {
            out.push(plane[i]);
        }
    }
    Ok(out)
}

/// Average all channels down to mono. Mono input passes through.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_averages_channels() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let mono = vec![0.1, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&mono, 1), mono);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        let out = resample(samples.clone(), 1, 16000, 16000).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn test_resample_halves_frame_count() {
        // One second of a 440Hz-ish ramp at 32kHz down to 16kHz
        let samples: Vec<f32> = (0..32000)
            .map(|i| (i as f32 * 0.01).sin() * 0.5)
            .collect();
        let out = resample(samples, 1, 32000, 16000).unwrap();
        let expected = 16000;
        assert!(
            (out.len() as i64 - expected).abs() <= 2,
            "got {} frames",
            out.len()
        );
        assert!(out.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_resample_preserves_channel_count() {
        let stereo: Vec<f32> = (0..8000).map(|i| (i as f32 * 0.02).sin()).collect();
        let out = resample(stereo, 2, 8000, 16000).unwrap();
        // 4000 input frames doubled to 8000, interleaved as stereo
        assert!((out.len() as i64 - 16000).abs() <= 8);
        assert_eq!(out.len() % 2, 0);
    }

    #[test]
    fn test_decode_missing_file_errors() {
        let err = decode_file(Path::new("/nonexistent/audio.wav")).unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
    }

    #[test]
    fn test_decode_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..16000 {
            let s = ((i as f32 * 0.05).sin() * 0.5 * i16::MAX as f32) as i16;
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let decoded = decode_file(&path).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.frames(), 16000);
        assert!((decoded.duration_seconds() - 1.0).abs() < 0.01);
    }
}
