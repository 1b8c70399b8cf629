//! # Audio Probing
//!
//! Runs `ffprobe` on the downloaded source and turns its JSON report into an [`AudioFileMeta`].
//! This is the content gate of the pipeline: a file that downloads fine can still be rejected
//! here for having no audio, too many channels, or a container/codec outside the allow-lists.
//!
//! ## Derived fields:
//! - **duration_in_samples**: `duration_ts * sample_rate / time_base_denominator`, in 128-bit
//!   integers so the intermediate product cannot overflow, then narrowed to `u64`
//! - **bit_depth**: `bits_per_sample == 0` (compressed codecs) becomes `null`; depths above 16
//!   are recorded as 16, the deepest artifact audiowaveform can write

use crate::job::error::JobError;
use crate::job::schema::InputFormat;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Codecs the waveform tool is known to decode correctly.
pub const ALLOWED_CODEC_NAMES: [&str; 7] = [
    "flac",
    "pcm_s16le",
    "pcm_s16be",
    "pcm_s24le",
    "pcm_s32le",
    "pcm_f32le",
    "mp3",
];

/// Highest bit depth a peaks artifact can carry.
pub const MAX_ARTIFACT_BIT_DEPTH: u32 = 16;

/// Technical metadata of a probed source file. Echoed to the caller in the success webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioFileMeta {
    pub sample_rate: u32,
    pub channels: u8,
    pub duration: f64,
    pub time_base: String,
    pub format_name: String,
    pub codec_name: String,
    pub size: u64,
    pub bit_depth: Option<u8>,
    pub duration_in_samples: u64,
}

/// What the prober hands back to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedAudio {
    pub meta: AudioFileMeta,
    /// `bits_per_sample` exactly as reported, with `0` normalized to `None`.
    pub source_bit_depth: Option<u32>,
}

/// Subset of `ffprobe -print_format json -show_format -show_streams` we read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeReport {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: Option<FfprobeFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub sample_rate: Option<String>,
    pub channels: Option<u64>,
    pub duration: Option<String>,
    pub duration_ts: Option<u64>,
    pub time_base: Option<String>,
    pub bits_per_sample: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FfprobeFormat {
    pub format_name: Option<String>,
    pub size: Option<String>,
}

/// Metadata-extraction capability used by the pipeline.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbedAudio, JobError>;
}

/// [`Probe`] backed by the `ffprobe` binary.
pub struct FfprobeProber {
    binary: PathBuf,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait]
impl Probe for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<ProbedAudio, JobError> {
        info!(path = %path.display(), "Getting file metadata");

        let output = Command::new(&self.binary)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .args(["-select_streams", "a", "-i"])
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                JobError::Probe(format!("Failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::Probe(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        let report: FfprobeReport = serde_json::from_slice(&output.stdout)
            .map_err(|e| JobError::Probe(format!("Unreadable ffprobe output: {}", e)))?;
        debug!(streams = report.streams.len(), "ffprobe report parsed");

        let probed = ProbedAudio::from_report(&report)?;
        info!(meta = ?probed.meta, "Meta found");
        Ok(probed)
    }
}

impl ProbedAudio {
    /// Build and gate the metadata record from a parsed ffprobe report.
    pub fn from_report(report: &FfprobeReport) -> Result<Self, JobError> {
        let stream = report
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref().map_or(true, |t| t == "audio"))
            .ok_or_else(|| JobError::Probe("No audio streams found.".to_string()))?;
        let format = report
            .format
            .as_ref()
            .ok_or_else(|| missing("format"))?;

        let sample_rate: u32 = parse_field("sample_rate", stream.sample_rate.as_deref())?;
        if sample_rate == 0 {
            return Err(JobError::Probe("Number 'sample_rate' must be greater than or equal to 1.".into()));
        }

        let channels = stream.channels.ok_or_else(|| missing("channels"))?;
        if channels > 2 {
            return Err(JobError::Probe("More than 2 channels not allowed.".into()));
        }
        if channels == 0 {
            return Err(JobError::Probe(
                "Invalid enum value for 'channels'. Expected 1 | 2, received 0.".into(),
            ));
        }

        let format_name = format.format_name.clone().ok_or_else(|| missing("format_name"))?;
        if InputFormat::from_name(&format_name).is_none() {
            return Err(JobError::Probe(format!("Bad format: {}", format_name)));
        }

        let codec_name = stream.codec_name.clone().ok_or_else(|| missing("codec_name"))?;
        if !ALLOWED_CODEC_NAMES.contains(&codec_name.as_str()) {
            return Err(JobError::Probe(format!("Bad codec: {}", codec_name)));
        }

        let duration: f64 = parse_field("duration", stream.duration.as_deref())?;
        if !(duration >= 0.0) {
            return Err(JobError::Probe("Number 'duration' must be greater than or equal to 0.".into()));
        }

        let size: u64 = parse_field("size", format.size.as_deref())?;
        if size == 0 {
            return Err(JobError::Probe("Number 'size' must be greater than or equal to 1.".into()));
        }

        let time_base = stream
            .time_base
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| missing("time_base"))?;
        let duration_ts = stream.duration_ts.ok_or_else(|| missing("duration_ts"))?;
        let duration_in_samples = duration_in_samples(duration_ts, sample_rate, &time_base)?;

        let source_bit_depth = match stream.bits_per_sample {
            None | Some(0) => None,
            Some(bits) => Some(u32::try_from(bits).map_err(|_| {
                JobError::Probe(format!("Unsupported bit depth: {}", bits))
            })?),
        };
        let bit_depth = match source_bit_depth {
            None => None,
            Some(bits) => match bits.min(MAX_ARTIFACT_BIT_DEPTH) {
                b @ (8 | 16) => Some(b as u8),
                other => {
                    return Err(JobError::Probe(format!(
                        "Invalid enum value for 'bit_depth'. Expected 8 | 16, received {}.",
                        other
                    )))
                }
            },
        };

        Ok(Self {
            meta: AudioFileMeta {
                sample_rate,
                channels: channels as u8,
                duration,
                time_base,
                format_name,
                codec_name,
                size,
                bit_depth,
                duration_in_samples,
            },
            source_bit_depth,
        })
    }
}

/// Exact sample count for a stream whose duration is `duration_ts` ticks of `time_base`.
pub fn duration_in_samples(duration_ts: u64, sample_rate: u32, time_base: &str) -> Result<u64, JobError> {
    let denominator: u128 = time_base
        .rsplit('/')
        .next()
        .and_then(|d| d.trim().parse().ok())
        .filter(|d| *d > 0)
        .ok_or_else(|| JobError::Probe(format!("Invalid time_base: {}", time_base)))?;

    let samples = u128::from(duration_ts) * u128::from(sample_rate) / denominator;
    u64::try_from(samples)
        .map_err(|_| JobError::Probe(format!("Sample count {} does not fit in 64 bits", samples)))
}

fn missing(field: &str) -> JobError {
    JobError::Probe(format!("ffprobe report is missing '{}'.", field))
}

fn parse_field<T: std::str::FromStr>(field: &str, raw: Option<&str>) -> Result<T, JobError> {
    let raw = raw.ok_or_else(|| missing(field))?;
    raw.trim()
        .parse()
        .map_err(|_| JobError::Probe(format!("Invalid '{}' in ffprobe report: {}", field, raw)))
}
