use std::path::PathBuf;
use thiserror::Error;

use super::model::JobState;
use super::tagger::TagError;
use super::transcoder::TranscodeError;
use crate::infrastructure::queue::QueueError;
use crate::infrastructure::storage::StorageError;

pub type JobResult<T> = Result<T, JobError>;

/// How the consumer loop treats a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Queue or object-store communication failed.
    Transport,
    /// Filesystem, subprocess or input problem on this worker.
    Local,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultKind::Transport => f.write_str("transport"),
            FaultKind::Local => f.write_str("local"),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid source key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Staging error at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcoder produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Tagging error: {0}")]
    Tagging(#[from] TagError),
}

impl JobError {
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source,
        }
    }

    pub fn fault_kind(&self) -> FaultKind {
        match self {
            JobError::Storage(StorageError::Transport(_)) | JobError::Queue(QueueError::Transport(_)) => {
                FaultKind::Transport
            }
            _ => FaultKind::Local,
        }
    }

    /// The worker stopped the job itself on shutdown; the message did not fail.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, JobError::Transcode(TranscodeError::Cancelled))
    }
}

/// A job that stopped before completion, with the step it failed in.
#[derive(Debug, Error)]
#[error("Job failed while {state}: {error}")]
pub struct JobFailure {
    pub state: JobState,
    #[source]
    pub error: JobError,
}

impl JobFailure {
    pub fn kind(&self) -> FaultKind {
        self.error.fault_kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transport_and_local_faults() {
        let transport = JobError::from(StorageError::transport("reset"));
        assert_eq!(transport.fault_kind(), FaultKind::Transport);

        let queue = JobError::from(QueueError::transport("closed"));
        assert_eq!(queue.fault_kind(), FaultKind::Transport);

        let missing = JobError::from(StorageError::not_found("in/abc.mp4"));
        assert_eq!(missing.fault_kind(), FaultKind::Local);

        let disk = JobError::staging("/stage/in", std::io::Error::other("read-only"));
        assert_eq!(disk.fault_kind(), FaultKind::Local);

        let launch = JobError::from(TranscodeError::Cancelled);
        assert_eq!(launch.fault_kind(), FaultKind::Local);
    }

    #[test]
    fn only_cancelled_transcode_counts_as_shutdown() {
        assert!(JobError::from(TranscodeError::Cancelled).is_shutdown());
        assert!(!JobError::from(StorageError::transport("reset")).is_shutdown());
        assert!(!JobError::MissingOutput("/stage/out/a.mp4".into()).is_shutdown());
    }

    #[test]
    fn failure_message_names_the_step() {
        let failure = JobFailure {
            state: JobState::Downloading,
            error: StorageError::not_found("in/abc.mp4").into(),
        };
        assert_eq!(
            failure.to_string(),
            "Job failed while downloading: Storage error: Object not found: in/abc.mp4"
        );
    }
}
