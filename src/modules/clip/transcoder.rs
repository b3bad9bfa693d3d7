//! External encoder invocation.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcode exceeded {0:?}")]
    Timeout(Duration),

    #[error("Transcode cancelled")]
    Cancelled,

    #[error("IO error while waiting for transcoder: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a transcoder run that got to exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeReport {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl TranscodeReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Writes the first `clip_seconds` of `input` to `output`, waiting for
    /// the encoder to exit.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        clip_seconds: u32,
        cancel: &CancellationToken,
    ) -> Result<TranscodeReport, TranscodeError>;
}

/// Runs `ffmpeg` as a subprocess.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// `-t <s> -i <in> -map_metadata 0 -acodec copy <out> -y`
    pub fn build_args(input: &Path, output: &Path, clip_seconds: u32) -> Vec<String> {
        vec![
            "-t".to_string(),
            clip_seconds.to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-map_metadata".to_string(),
            "0".to_string(),
            "-acodec".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
            "-y".to_string(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        clip_seconds: u32,
        cancel: &CancellationToken,
    ) -> Result<TranscodeReport, TranscodeError> {
        let args = Self::build_args(input, output, clip_seconds);
        info!("🎬 Running: {} {}", self.program, args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Launch {
                program: self.program.clone(),
                source,
            })?;

        // ffmpeg logs to stderr; keep only the tail for diagnostics.
        let stderr_tail = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail
            })
        });

        let status: ExitStatus = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Transcode cancelled, killing {}", self.program);
                let _ = child.kill().await;
                return Err(TranscodeError::Cancelled);
            }
            status = child.wait() => status?,
            _ = tokio::time::sleep(self.timeout) => {
                warn!("Transcode exceeded {:?}, killing {}", self.timeout, self.program);
                let _ = child.kill().await;
                return Err(TranscodeError::Timeout(self.timeout));
            }
        };

        let report = TranscodeReport {
            exit_code: status.code(),
            elapsed: started.elapsed(),
        };

        let tail = match stderr_tail {
            Some(handle) => handle.await.unwrap_or_default(),
            None => VecDeque::new(),
        };

        if report.succeeded() {
            debug!("{} exited cleanly", self.program);
        } else {
            warn!(
                exit_code = ?report.exit_code,
                "{} exited abnormally:\n{}",
                self.program,
                tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_clip_command_line() {
        let args = FfmpegTranscoder::build_args(
            Path::new("/stage/in/abc.mp4"),
            Path::new("/stage/out/abc-video-cropped.mp4"),
            10,
        );
        assert_eq!(
            args,
            vec![
                "-t",
                "10",
                "-i",
                "/stage/in/abc.mp4",
                "-map_metadata",
                "0",
                "-acodec",
                "copy",
                "/stage/out/abc-video-cropped.mp4",
                "-y",
            ]
        );
    }

    #[tokio::test]
    async fn missing_executable_is_a_launch_error() {
        let transcoder = FfmpegTranscoder::new("/nonexistent/bin/ffmpeg", Duration::from_secs(5));
        let err = transcoder
            .transcode(
                Path::new("in.mp4"),
                Path::new("out.mp4"),
                10,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TranscodeError::Launch { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        // `false` ignores its arguments and exits with status 1.
        let transcoder = FfmpegTranscoder::new("false", Duration::from_secs(5));
        let report = transcoder
            .transcode(
                Path::new("in.mp4"),
                Path::new("out.mp4"),
                10,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.exit_code, Some(1));
        assert!(!report.succeeded());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_token_stops_the_encoder() {
        let transcoder = FfmpegTranscoder::new("false", Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transcoder
            .transcode(Path::new("in.mp4"), Path::new("out.mp4"), 10, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TranscodeError::Cancelled));
    }
}
