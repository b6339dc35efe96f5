//! # Audio Probing and Quality Assessment
//!
//! Inspects an uploaded file before any expensive work happens: duration,
//! sample rate, channel count, bitrate, and a 0-100 quality score that
//! tells the caller how well recognition is likely to go.
//!
//! ## Probe chain:
//! 1. **symphonia** codec parameters (handles every supported container)
//! 2. **hound** WAV header read (cheap fallback for plain WAVs)
//! 3. **ffprobe** subprocess with JSON output (catches exotic formats)
//!
//! Each probe that fails hands off to the next; only when all three fail
//! does the descriptor carry an `error` instead of media facts.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::process::Command;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Everything we know about an audio file before processing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDescriptor {
    pub path: String,
    pub file_size: u64,
    pub duration_seconds: f64,
    pub channels: u16,
    pub sample_rate: u32,
    pub bitrate: Option<u32>,
    pub quality_score: u32,
    pub quality: String,
    pub quality_issues: Vec<String>,
    pub probe_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of pre-recognition validation: hard errors reject the file,
/// warnings ride along into the job record.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

struct MediaFacts {
    duration_seconds: f64,
    channels: u16,
    sample_rate: u32,
    bitrate: Option<u32>,
}

/// Probe a file through the fallback chain and score its quality.
pub fn probe_file(path: &Path) -> AppResult<AudioDescriptor> {
    let meta = std::fs::metadata(path)
        .map_err(|e| AppError::Validation(format!("Cannot read uploaded file: {}", e)))?;
    let file_size = meta.len();

    let (facts, method) = match probe_symphonia(path) {
        Ok(facts) => (Some(facts), "symphonia"),
        Err(sym_err) => {
            tracing::debug!("symphonia probe failed for {}: {}", path.display(), sym_err);
            match probe_hound(path) {
                Ok(facts) => (Some(facts), "hound"),
                Err(hound_err) => {
                    tracing::debug!("hound probe failed for {}: {}", path.display(), hound_err);
                    match probe_ffprobe(path) {
                        Ok(facts) => (Some(facts), "ffprobe"),
                        Err(ff_err) => {
                            tracing::warn!(
                                "All probes failed for {}: {}",
                                path.display(),
                                ff_err
                            );
                            (None, "none")
                        }
                    }
                }
            }
        }
    };

    let descriptor = match facts {
        Some(mut facts) => {
            // Estimate bitrate from the container when nothing reported one
            if facts.bitrate.is_none() && facts.duration_seconds > 0.0 {
                facts.bitrate =
                    Some((file_size as f64 * 8.0 / facts.duration_seconds) as u32);
            }
            let (score, quality, issues) = assess_quality(&facts, file_size);
            AudioDescriptor {
                path: path.display().to_string(),
                file_size,
                duration_seconds: facts.duration_seconds,
                channels: facts.channels,
                sample_rate: facts.sample_rate,
                bitrate: facts.bitrate,
                quality_score: score,
                quality,
                quality_issues: issues,
                probe_method: method.to_string(),
                error: None,
            }
        }
        None => AudioDescriptor {
            path: path.display().to_string(),
            file_size,
            duration_seconds: 0.0,
            channels: 0,
            sample_rate: 0,
            bitrate: None,
            quality_score: 0,
            quality: "Unknown".to_string(),
            quality_issues: vec!["Could not analyze audio file".to_string()],
            probe_method: method.to_string(),
            error: Some("Unable to probe audio file with any available method".to_string()),
        },
    };

    Ok(descriptor)
}

fn probe_symphonia(path: &Path) -> anyhow::Result<MediaFacts> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let track = probed
        .format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("No default track"))?;
    let params = &track.codec_params;

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| anyhow::anyhow!("No sample rate in codec params"))?;
    let channels = params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| anyhow::anyhow!("No channel layout in codec params"))?;
    let duration_seconds = params
        .n_frames
        .map(|n| n as f64 / sample_rate as f64)
        .ok_or_else(|| anyhow::anyhow!("No frame count in codec params"))?;

    Ok(MediaFacts {
        duration_seconds,
        channels,
        sample_rate,
        bitrate: None,
    })
}

fn probe_hound(path: &Path) -> anyhow::Result<MediaFacts> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let frames = reader.duration();
    Ok(MediaFacts {
        duration_seconds: frames as f64 / spec.sample_rate as f64,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bitrate: Some(
            spec.sample_rate * spec.channels as u32 * spec.bits_per_sample as u32,
        ),
    })
}

fn probe_ffprobe(path: &Path) -> anyhow::Result<MediaFacts> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()?;
    if !output.status.success() {
        anyhow::bail!("ffprobe exited with {}", output.status);
    }

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let stream = parsed["streams"]
        .as_array()
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s["codec_type"].as_str() == Some("audio"))
        })
        .ok_or_else(|| anyhow::anyhow!("No audio stream reported"))?;

    let sample_rate: u32 = stream["sample_rate"]
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("No sample rate reported"))?;
    let channels = stream["channels"].as_u64().unwrap_or(0) as u16;
    let duration_seconds = parsed["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);
    let bitrate = parsed["format"]["bit_rate"]
        .as_str()
        .and_then(|s| s.parse::<u32>().ok());

    Ok(MediaFacts {
        duration_seconds,
        channels,
        sample_rate,
        bitrate,
    })
}

/// Score audio 0-100 across five factors. Higher sample rates, mono
/// audio, moderate durations, and healthy bitrates all indicate material
/// the recognition engines handle well.
fn assess_quality(facts: &MediaFacts, file_size: u64) -> (u32, String, Vec<String>) {
    let mut score = 0u32;
    let mut issues = Vec::new();

    if facts.sample_rate >= 16000 {
        score += 30;
    } else if facts.sample_rate >= 8000 {
        score += 20;
        issues.push("Sample rate below 16kHz may reduce accuracy".to_string());
    } else {
        issues.push("Sample rate below 8kHz is too low for reliable recognition".to_string());
    }

    if facts.channels == 1 {
        score += 20;
    } else if facts.channels == 2 {
        score += 15;
    } else if facts.channels > 2 {
        issues.push(format!(
            "{} channels will be downmixed to mono",
            facts.channels
        ));
    }

    if facts.duration_seconds >= 1.0 && facts.duration_seconds <= 300.0 {
        score += 20;
    } else if facts.duration_seconds > 0.0 && facts.duration_seconds <= 600.0 {
        score += 15;
        if facts.duration_seconds < 1.0 {
            issues.push("Very short audio may not contain usable speech".to_string());
        }
    } else {
        issues.push("Duration outside the supported range".to_string());
    }

    match facts.bitrate {
        Some(b) if b >= 128_000 => score += 15,
        Some(b) if b >= 64_000 => {
            score += 10;
            issues.push("Bitrate below 128kbps".to_string());
        }
        Some(_) => issues.push("Very low bitrate".to_string()),
        None => issues.push("Bitrate unknown".to_string()),
    }

    if facts.duration_seconds > 0.0 {
        let density = file_size as f64 / facts.duration_seconds;
        if density >= 16000.0 {
            score += 15;
        } else if density >= 8000.0 {
            score += 10;
        } else {
            issues.push("Low data density suggests heavy compression".to_string());
        }
    }

    let quality = match score {
        90..=100 => "Excellent",
        70..=89 => "Good",
        50..=69 => "Fair",
        _ => "Poor",
    };
    (score, quality.to_string(), issues)
}

impl AudioDescriptor {
    /// Decide whether this file can be sent to recognition at all.
    /// Hard failures go to `errors`; `warnings` are informational.
    pub fn validate_for_recognition(&self) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if let Some(e) = &self.error {
            errors.push(e.clone());
        }
        if self.duration_seconds == 0.0 {
            errors.push("Audio contains no playable content".to_string());
        }
        if self.channels == 0 {
            errors.push("Audio has no channels".to_string());
        }
        if self.sample_rate > 0 && self.sample_rate < 8000 {
            errors.push(format!(
                "Sample rate {}Hz is below the 8kHz minimum",
                self.sample_rate
            ));
        }

        if self.duration_seconds > 0.0 && self.duration_seconds < 0.5 {
            warnings.push("Audio shorter than 0.5 seconds".to_string());
        }
        if self.duration_seconds > 600.0 {
            warnings.push("Audio longer than 10 minutes may time out".to_string());
        }
        if (8000..16000).contains(&self.sample_rate) {
            warnings.push("Sample rate below 16kHz may reduce accuracy".to_string());
        }
        if self.channels > 2 {
            warnings.push(format!("{} channels will be downmixed", self.channels));
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}
