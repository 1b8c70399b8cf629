//! Peaks generation through the `audiowaveform` binary.

use crate::job::error::JobError;
use crate::job::probe::MAX_ARTIFACT_BIT_DEPTH;
use crate::job::schema::{ChannelMode, InputFormat, OutputFormat};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::{error, info};

/// Everything one audiowaveform run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct PeaksJob<'a> {
    pub input_path: &'a Path,
    pub input_format: InputFormat,
    pub channel_mode: ChannelMode,
    pub output_path: &'a Path,
    pub output_format: OutputFormat,
    /// Bit depth probed from the source, not the depth the caller asked for.
    pub source_bit_depth: Option<u32>,
}

impl PeaksJob<'_> {
    /// Command-line arguments, formats and paths always explicit.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--input-format".into(),
            self.input_format.as_str().into(),
            "--output-format".into(),
            self.output_format.as_str().into(),
            "-i".into(),
            self.input_path.into(),
            "-o".into(),
            self.output_path.into(),
        ];

        if let Some(bits) = self.source_bit_depth {
            args.push("-b".into());
            args.push(bits.min(MAX_ARTIFACT_BIT_DEPTH).to_string().into());
        }

        if self.channel_mode == ChannelMode::Multi {
            args.push("--split-channels".into());
        }

        args
    }
}

#[async_trait]
pub trait GeneratePeaks: Send + Sync {
    async fn generate(&self, job: &PeaksJob<'_>) -> Result<(), JobError>;
}

pub struct AudiowaveformGenerator {
    binary: PathBuf,
}

impl AudiowaveformGenerator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait]
impl GeneratePeaks for AudiowaveformGenerator {
    async fn generate(&self, job: &PeaksJob<'_>) -> Result<(), JobError> {
        let args = job.args();
        info!(
            binary = %self.binary.display(),
            args = ?args,
            "Generating peaks"
        );

        let status = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                error!(error = %e, "audiowaveform could not be spawned");
                JobError::Generation(format!("Failed to run {}: {}", self.binary.display(), e))
            })?;

        check_exit(status)
    }
}

fn check_exit(status: ExitStatus) -> Result<(), JobError> {
    if status.success() {
        return Ok(());
    }

    if let Some(code) = status.code() {
        return Err(JobError::Generation(format!("Exited with non-zero code: {}", code)));
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(JobError::Generation(format!("Terminated by signal: {}", signal)));
        }
    }

    Err(JobError::Generation(format!("Exited abnormally: {}", status)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job<'a>(mode: ChannelMode, bits: Option<u32>) -> PeaksJob<'a> {
        PeaksJob {
            input_path: Path::new("/tmp/in.wav"),
            input_format: InputFormat::Wav,
            channel_mode: mode,
            output_path: Path::new("/tmp/out.dat"),
            output_format: OutputFormat::Dat,
            source_bit_depth: bits,
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_single_channel_args() {
        assert_eq!(
            strings(job(ChannelMode::Single, Some(16)).args()),
            vec![
                "--input-format", "wav", "--output-format", "dat", "-i", "/tmp/in.wav", "-o",
                "/tmp/out.dat", "-b", "16",
            ]
        );
    }

    #[test]
    fn test_multi_channel_requests_split() {
        let args = strings(job(ChannelMode::Multi, Some(8)).args());
        assert_eq!(args.last().map(String::as_str), Some("--split-channels"));
        assert!(args.windows(2).any(|w| w == ["-b", "8"]));
    }

    #[test]
    fn test_deep_sources_are_capped_at_16() {
        for bits in [24, 32] {
            let args = strings(job(ChannelMode::Single, Some(bits)).args());
            assert!(args.windows(2).any(|w| w == ["-b", "16"]), "{:?}", args);
        }
    }

    #[test]
    fn test_no_bit_depth_flag_without_probed_depth() {
        let args = strings(job(ChannelMode::Single, None).args());
        assert!(!args.iter().any(|a| a == "-b"));
        assert!(!args.iter().any(|a| a == "--split-channels"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_codes() {
        let ok = AudiowaveformGenerator::new("true");
        assert!(ok.generate(&job(ChannelMode::Single, None)).await.is_ok());

        let failing = AudiowaveformGenerator::new("false");
        let err = failing.generate(&job(ChannelMode::Single, None)).await.unwrap_err();
        assert_eq!(err, JobError::Generation("Exited with non-zero code: 1".into()));

        let missing = AudiowaveformGenerator::new("/no/such/audiowaveform");
        let err = missing.generate(&job(ChannelMode::Single, None)).await.unwrap_err();
        assert_eq!(err.kind(), "GenerationError");
    }
}
