use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::settings::AppConfig;
use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::clip::service::JobProcessor;
use crate::modules::clip::staging::Staging;
use crate::modules::clip::tagger::FfmpegTagger;
use crate::modules::clip::transcoder::FfmpegTranscoder;
use crate::state::AppState;
use crate::workers::consumer::QueueConsumer;

pub async fn create_state(config: AppConfig) -> Result<AppState> {
    let queue = RabbitMqService::new(&config.rabbitmq_url, &config.queue_name)
        .await
        .context("Failed to connect to the queue")?;

    let storage = StorageService::new(
        &config.minio_url,
        &config.minio_region,
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
    );

    Ok(AppState::new(config, Arc::new(queue), Arc::new(storage)))
}

pub async fn create_worker(state: AppState) -> Result<QueueConsumer> {
    let worker = &state.config.worker;

    let staging = Staging::open(&worker.staging_root)
        .await
        .context("Failed to prepare local staging")?;
    info!("Local staging at {}", staging.root().display());

    let transcoder = FfmpegTranscoder::new(&worker.ffmpeg_path, worker.queue_lease);
    let tagger = FfmpegTagger::new(&worker.ffmpeg_path, &worker.ffprobe_path);

    let processor = JobProcessor::new(
        state.queue.clone(),
        state.storage.clone(),
        Arc::new(transcoder),
        Arc::new(tagger),
        staging,
        worker.instance_id.clone(),
        worker.tag_operator.clone(),
        worker.clip_seconds,
    );

    info!(
        instance = %worker.instance_id,
        poison_threshold = worker.poison_threshold,
        "Worker ready"
    );

    Ok(QueueConsumer::new(processor, worker))
}
