//! # Format Conversion Chain
//!
//! Normalizes any supported upload to the canonical recognition format
//! (16kHz, mono, 16-bit PCM WAV) through a fallback chain:
//!
//! 1. **ffmpeg** subprocess when the binary is available (widest coverage)
//! 2. **symphonia + rubato**: in-process decode and resample
//! 3. **hound + rubato**: header-level WAV read, resample only
//!
//! A method only counts as a success when the output file exists, is
//! non-empty, and parses as WAV. Partial outputs from a failed attempt
//! are removed before the next method runs.

use crate::audio::decode::{self, DecodedAudio};
use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::path::Path;
use std::process::Command;

/// How a conversion was accomplished.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionInfo {
    pub method: String,
    pub attempted: Vec<String>,
    pub output_size: u64,
}

/// Converter targeting a fixed canonical output format.
pub struct Converter {
    pub target_sample_rate: u32,
    pub target_channels: u16,
}

impl Converter {
    pub fn new(target_sample_rate: u32, target_channels: u16) -> Self {
        Self {
            target_sample_rate,
            target_channels,
        }
    }

    /// Run the fallback chain until one method produces a valid WAV.
    pub fn convert_to_wav(&self, input: &Path, output: &Path) -> AppResult<ConversionInfo> {
        let mut attempted = Vec::new();

        let methods: Vec<(&str, Box<dyn FnOnce() -> anyhow::Result<()> + '_>)> = vec![
            ("ffmpeg", Box::new(|| self.try_ffmpeg(input, output))),
            ("symphonia", Box::new(|| self.try_symphonia(input, output))),
            ("hound", Box::new(|| self.try_hound(input, output))),
        ];

        for (name, run) in methods {
            attempted.push(name.to_string());
            match run() {
                Ok(()) => match self.verify_output(output) {
                    Ok(size) => {
                        tracing::info!(
                            method = name,
                            output_size = size,
                            "Audio conversion succeeded"
                        );
                        return Ok(ConversionInfo {
                            method: name.to_string(),
                            attempted,
                            output_size: size,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("{} produced invalid output: {}", name, e);
                        discard_partial(output);
                    }
                },
                Err(e) => {
                    tracing::debug!("{} conversion failed: {}", name, e);
                    discard_partial(output);
                }
            }
        }

        Err(AppError::Conversion {
            message: format!(
                "Could not convert {} to WAV with any available method",
                input.display()
            ),
            attempted,
        })
    }

    fn try_ffmpeg(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        let status = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .arg("-i")
            .arg(input)
            .args(["-acodec", "pcm_s16le"])
            .args(["-ar", &self.target_sample_rate.to_string()])
            .args(["-ac", &self.target_channels.to_string()])
            .arg(output)
            .status()?;
        if !status.success() {
            anyhow::bail!("ffmpeg exited with {}", status);
        }
        Ok(())
    }

    fn try_symphonia(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        let decoded = decode::decode_file(input)?;
        self.write_canonical(decoded, output)
    }

    // WAV-only path that skips the full probe machinery; useful when a
    // file has a good RIFF header but confuses the container probe.
    fn try_hound(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        let mut reader = hound::WavReader::open(input)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Float => {
                reader.samples::<f32>().collect::<Result<_, _>>()?
            }
        };

        self.write_canonical(
            DecodedAudio {
                samples,
                sample_rate: spec.sample_rate,
                channels: spec.channels,
            },
            output,
        )
    }

    fn write_canonical(&self, decoded: DecodedAudio, output: &Path) -> anyhow::Result<()> {
        let mut samples = decoded.samples;
        let mut channels = decoded.channels;

        if self.target_channels == 1 && channels > 1 {
            samples = decode::downmix_to_mono(&samples, channels);
            channels = 1;
        }
        samples = decode::resample(samples, channels, decoded.sample_rate, self.target_sample_rate)?;

        let spec = hound::WavSpec {
            channels,
            sample_rate: self.target_sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(output, spec)?;
        for s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }

    fn verify_output(&self, output: &Path) -> anyhow::Result<u64> {
        let size = std::fs::metadata(output)?.len();
        if size == 0 {
            anyhow::bail!("Output file is empty");
        }
        let reader = hound::WavReader::open(output)?;
        if reader.duration() == 0 {
            anyhow::bail!("Output WAV contains no frames");
        }
        Ok(size)
    }
}

fn discard_partial(output: &Path) {
    if output.exists() {
        if let Err(e) = std::fs::remove_file(output) {
            tracing::warn!("Failed to remove partial output {}: {}", output.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer
                    .write_sample(((i as f32 * 0.05).sin() * 10000.0) as i16)
                    .unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_convert_stereo_44k_to_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_test_wav(&input, 44100, 2, 44100);

        let converter = Converter::new(16000, 1);
        let info = converter.convert_to_wav(&input, &output).unwrap();
        assert!(info.output_size > 0);
        assert!(!info.attempted.is_empty());

        let reader = hound::WavReader::open(&output).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.channels, 1);
        // One second of input should stay about one second long
        let dur = reader.duration() as f64 / 16000.0;
        assert!((dur - 1.0).abs() < 0.05, "duration was {}", dur);
    }

    #[test]
    fn test_convert_garbage_reports_all_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("junk.ogg");
        let output = dir.path().join("out.wav");
        std::fs::write(&input, b"not audio").unwrap();

        let converter = Converter::new(16000, 1);
        let err = converter.convert_to_wav(&input, &output).unwrap_err();
        match err {
            AppError::Conversion { attempted, .. } => {
                assert_eq!(attempted, vec!["ffmpeg", "symphonia", "hound"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // No partial output left behind
        assert!(!output.exists());
    }

    #[test]
    fn test_repeated_conversion_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        write_test_wav(&input, 22050, 2, 22050);
        let converter = Converter::new(16000, 1);

        for name in ["first.wav", "second.wav"] {
            let output = dir.path().join(name);
            let info = converter.convert_to_wav(&input, &output).unwrap();
            assert!(info.output_size > 0);
            let reader = hound::WavReader::open(&output).unwrap();
            assert_eq!(reader.spec().sample_rate, 16000);
            assert_eq!(reader.spec().channels, 1);
            assert!(reader.duration() > 0);
        }
    }

    #[test]
    fn test_canonical_input_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_test_wav(&input, 16000, 1, 16000);

        let converter = Converter::new(16000, 1);
        let info = converter.convert_to_wav(&input, &output).unwrap();
        assert!(info.output_size > 0);

        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.spec().channels, 1);
    }
}
