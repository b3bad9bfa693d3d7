use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::env::{self, EnvKey};

pub const DEFAULT_QUEUE_NAME: &str = "videoqueue";
pub const DEFAULT_BUCKET: &str = "videos";
pub const DEFAULT_CLIP_SECONDS: u32 = 10;
pub const DEFAULT_POISON_THRESHOLD: u32 = 5;

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub rabbitmq_url: String,
    pub queue_name: String,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_region: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub worker: WorkerConfig,
}

/// Settings that shape job processing, independent of how the queue and the
/// object store are reached.
#[derive(Clone, Debug, Deserialize)]
pub struct WorkerConfig {
    pub staging_root: PathBuf,
    pub instance_id: String,
    pub tag_operator: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub clip_seconds: u32,
    /// Sleep between polls of an empty queue.
    pub poll_idle: Duration,
    /// Sleep after a failed job before polling again.
    pub fault_backoff: Duration,
    /// A failing message whose delivery count is above this is discarded.
    pub poison_threshold: u32,
    /// Visibility lease of a polled message. A transcode running longer than
    /// this is aborted since the message is up for redelivery anyway.
    pub queue_lease: Duration,
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        Ok(Self {
            rabbitmq_url: env::get(EnvKey::RabbitMqUrl)?,
            queue_name: env::get_or(EnvKey::QueueName, DEFAULT_QUEUE_NAME),
            minio_url: env::get(EnvKey::MinioUrl)?,
            minio_bucket: env::get_or(EnvKey::MinioBucket, DEFAULT_BUCKET),
            minio_region: env::get_or(EnvKey::MinioRegion, "us-east-1"),
            minio_access_key: env::get(EnvKey::MinioAccessKey)?,
            minio_secret_key: env::get(EnvKey::MinioSecretKey)?,
            worker: WorkerConfig::from_env(),
        })
    }
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let raw_instance = env::get(EnvKey::InstanceId)
            .or_else(|_| env::get(EnvKey::Hostname))
            .unwrap_or_else(|_| "0".to_string());

        Self {
            staging_root: env::get(EnvKey::StagingRoot)
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("clip-worker")),
            instance_id: instance_index(&raw_instance).to_string(),
            tag_operator: env::get_or(EnvKey::TagOperator, "clip-worker"),
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
            ffprobe_path: env::get_or(EnvKey::FfprobePath, "ffprobe"),
            clip_seconds: env::get_parsed(EnvKey::ClipSeconds, DEFAULT_CLIP_SECONDS),
            poll_idle: Duration::from_millis(env::get_parsed(EnvKey::PollIdleMs, 1000)),
            fault_backoff: Duration::from_millis(env::get_parsed(EnvKey::FaultBackoffMs, 5000)),
            poison_threshold: env::get_parsed(EnvKey::PoisonThreshold, DEFAULT_POISON_THRESHOLD),
            queue_lease: Duration::from_secs(env::get_parsed(EnvKey::QueueLeaseSecs, 600)),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            staging_root: std::env::temp_dir().join("clip-worker"),
            instance_id: "0".to_string(),
            tag_operator: "clip-worker".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            clip_seconds: DEFAULT_CLIP_SECONDS,
            poll_idle: Duration::from_secs(1),
            fault_backoff: Duration::from_secs(5),
            poison_threshold: DEFAULT_POISON_THRESHOLD,
            queue_lease: Duration::from_secs(600),
        }
    }
}

/// Instance ids like `Clip_Worker_IN_3` are shortened to their index (`3`).
/// An id ending in `_` has no index and is kept whole.
pub fn instance_index(raw: &str) -> &str {
    match raw.rsplit_once('_') {
        Some((_, index)) if !index.is_empty() => index,
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_index_takes_suffix_after_last_underscore() {
        assert_eq!(instance_index("Clip_Worker_IN_3"), "3");
        assert_eq!(instance_index("worker-7"), "worker-7");
    }

    #[test]
    fn instance_index_keeps_id_without_suffix() {
        assert_eq!(instance_index("trailing_"), "trailing_");
        assert_eq!(instance_index("Clip_Worker_"), "Clip_Worker_");
    }

    #[test]
    fn defaults_match_documented_intervals() {
        let config = WorkerConfig::default();
        assert_eq!(config.clip_seconds, 10);
        assert_eq!(config.poison_threshold, 5);
        assert_eq!(config.poll_idle, Duration::from_secs(1));
        assert_eq!(config.fault_backoff, Duration::from_secs(5));
    }
}
