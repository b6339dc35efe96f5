//! # Audio Processing Module
//!
//! Everything between "bytes arrived over HTTP" and "a clean 16kHz mono WAV
//! is ready for the recognition engines" lives here.
//!
//! ## Key Components:
//! - **Probe**: inspects uploads (duration, sample rate, channels, bitrate)
//!   and scores their quality before any work is committed
//! - **Decode**: shared symphonia-based decoding plus resampling and
//!   channel downmix primitives
//! - **Convert**: the fallback conversion chain that normalizes any
//!   supported container to the canonical WAV format
//! - **Enhance**: optional best-effort cleanup (noise gate, normalization,
//!   high-pass) applied before recognition
//!
//! ## Canonical Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)

pub mod convert;
pub mod decode;
pub mod enhance;
pub mod probe;

pub use convert::{ConversionInfo, Converter};
pub use enhance::{EnhancementInfo, Enhancer};
pub use probe::{AudioDescriptor, ValidationReport};
