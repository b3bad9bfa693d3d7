use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};

use super::error::{JobError, JobFailure};
use super::model::{
    Job, JobReport, JobState, META_INSTANCE, META_TITLE, MediaTags, OUTPUT_CONTENT_TYPE,
};
use super::staging::Staging;
use super::tagger::MediaTagger;
use super::transcoder::Transcoder;
use crate::infrastructure::queue::{MessageQueue, QueueMessage};
use crate::infrastructure::storage::ObjectStore;

/// Runs one message through download, transcode, tag, upload, metadata
/// commit, source deletion, acknowledgement and cleanup.
pub struct JobProcessor {
    queue: Arc<dyn MessageQueue>,
    storage: Arc<dyn ObjectStore>,
    transcoder: Arc<dyn Transcoder>,
    tagger: Arc<dyn MediaTagger>,
    staging: Staging,
    instance_id: String,
    operator: String,
    clip_seconds: u32,
}

impl JobProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        storage: Arc<dyn ObjectStore>,
        transcoder: Arc<dyn Transcoder>,
        tagger: Arc<dyn MediaTagger>,
        staging: Staging,
        instance_id: impl Into<String>,
        operator: impl Into<String>,
        clip_seconds: u32,
    ) -> Self {
        Self {
            queue,
            storage,
            transcoder,
            tagger,
            staging,
            instance_id: instance_id.into(),
            operator: operator.into(),
            clip_seconds,
        }
    }

    pub fn queue(&self) -> &Arc<dyn MessageQueue> {
        &self.queue
    }

    /// Processes `message` end to end. The message is acknowledged only
    /// after the output is published and the source deleted; on failure it
    /// is left for the caller to release or discard.
    pub async fn process(
        &self,
        message: &QueueMessage,
        cancel: &CancellationToken,
    ) -> Result<JobReport, JobFailure> {
        let job = message
            .as_text()
            .map_err(JobError::from)
            .and_then(|key| Job::from_key(key, self.staging.root(), self.clip_seconds))
            .map_err(|error| JobFailure {
                state: JobState::Received,
                error,
            })?;

        let span = info_span!(
            "job",
            job_id = %job.id,
            key = %job.source_key,
            delivery = message.delivery_count
        );

        async {
            let mut state = JobState::Received;
            match self.execute(&job, message, cancel, &mut state).await {
                Ok(report) => Ok(report),
                Err(error) => {
                    self.staging.cleanup(&job).await;
                    Err(JobFailure { state, error })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        job: &Job,
        message: &QueueMessage,
        cancel: &CancellationToken,
        state: &mut JobState,
    ) -> Result<JobReport, JobError> {
        info!("📦 Dequeued '{}'", job.source_key);

        *state = JobState::Downloading;
        self.staging.prepare(job).await?;
        info!("⬇️ Downloading blob to local storage...");
        self.storage.download(&job.source_key, &job.input_path).await?;

        *state = JobState::Transcoding;
        info!("Shortening to {}s -> {}", job.clip_seconds, job.output_path.display());
        let transcode = self
            .transcoder
            .transcode(&job.input_path, &job.output_path, job.clip_seconds, cancel)
            .await?;
        let transcode_ms = transcode.elapsed.as_millis();
        info!("It took about {} ms to shorten the video", transcode_ms);

        let produced = tokio::fs::try_exists(&job.output_path)
            .await
            .map_err(|e| JobError::staging(&job.output_path, e))?;
        if !produced {
            return Err(JobError::MissingOutput(job.output_path.clone()));
        }

        *state = JobState::Tagging;
        let tags = MediaTags::for_instance(&self.instance_id, &self.operator);
        let title = self.tagger.tag(&job.output_path, &tags).await?;

        *state = JobState::Uploading;
        info!("⬆️ Returning clip to storage as {}", job.output_key);
        self.storage
            .upload(&job.output_key, &job.output_path, OUTPUT_CONTENT_TYPE)
            .await?;

        *state = JobState::CommittingMetadata;
        let metadata = self.commit_metadata(&job.output_key, &title).await?;
        info!("Blob's metadata:");
        let mut entries: Vec<_> = metadata.iter().collect();
        entries.sort();
        for (key, value) in entries {
            info!("   {}: {}", key, value);
        }

        *state = JobState::DeletingSource;
        info!("Deleting the input blob");
        self.storage.delete(&job.source_key).await?;

        *state = JobState::AcknowledgingMessage;
        info!("Removing message from the queue");
        self.queue.delete(message).await?;

        *state = JobState::CleaningStaging;
        self.staging.cleanup(job).await;

        *state = JobState::Done;
        info!("✅ Published {}", job.output_key);

        Ok(JobReport {
            output_key: job.output_key.clone(),
            title,
            transcode_ms,
        })
    }

    /// Merges `Title` and `InstanceNo` into the object's current metadata.
    /// Stores may fold key case, so existing spellings are replaced.
    async fn commit_metadata(&self, key: &str, title: &str) -> Result<HashMap<String, String>, JobError> {
        let mut metadata = self.storage.get_metadata(key).await?;
        metadata.retain(|name, _| {
            !name.eq_ignore_ascii_case(META_TITLE) && !name.eq_ignore_ascii_case(META_INSTANCE)
        });
        metadata.insert(META_TITLE.to_string(), title.to_string());
        metadata.insert(META_INSTANCE.to_string(), self.instance_id.clone());

        self.storage.set_metadata(key, metadata.clone()).await?;
        Ok(metadata)
    }
}
