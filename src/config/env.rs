use std::env;
use std::str::FromStr;

pub enum EnvKey {
    RabbitMqUrl,
    QueueName,
    MinioUrl,
    MinioBucket,
    MinioRegion,
    MinioAccessKey,
    MinioSecretKey,
    StagingRoot,
    InstanceId,
    Hostname,
    TagOperator,
    FfmpegPath,
    FfprobePath,
    ClipSeconds,
    PollIdleMs,
    FaultBackoffMs,
    PoisonThreshold,
    QueueLeaseSecs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET_VIDEOS",
            EnvKey::MinioRegion => "MINIO_REGION",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::StagingRoot => "STAGING_ROOT",
            EnvKey::InstanceId => "INSTANCE_ID",
            EnvKey::Hostname => "HOSTNAME",
            EnvKey::TagOperator => "TAG_OPERATOR",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::ClipSeconds => "CLIP_SECONDS",
            EnvKey::PollIdleMs => "POLL_IDLE_MS",
            EnvKey::FaultBackoffMs => "FAULT_BACKOFF_MS",
            EnvKey::PoisonThreshold => "POISON_THRESHOLD",
            EnvKey::QueueLeaseSecs => "QUEUE_LEASE_SECS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
