use std::fmt;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use super::error::JobError;

pub const OUTPUT_PREFIX: &str = "out";
pub const OUTPUT_SUFFIX: &str = "-video-cropped.mp4";
pub const OUTPUT_CONTENT_TYPE: &str = "video/mp4";
pub const NO_TITLE_SENTINEL: &str = "File has no original Title Tag";

pub const META_TITLE: &str = "Title";
pub const META_INSTANCE: &str = "InstanceNo";

/// Everything derived from one dequeued message. Lives only for the job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub source_key: String,
    /// Staging subdirectory holding the downloaded source.
    pub input_dir: PathBuf,
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub output_path: PathBuf,
    pub output_key: String,
    pub clip_seconds: u32,
}

impl Job {
    /// Derives paths and keys for `source_key` under `staging_root`.
    ///
    /// `in/abc.mp4` downloads to `<root>/in/abc.mp4`, transcodes to
    /// `<root>/out/abc-video-cropped.mp4` and publishes as
    /// `out/abc-video-cropped.mp4`.
    pub fn from_key(source_key: &str, staging_root: &Path, clip_seconds: u32) -> Result<Self, JobError> {
        let key = source_key.trim();
        let relative = validate_key(key)?;

        let leading = relative
            .components()
            .next()
            .ok_or_else(|| JobError::invalid_key(key, "empty key"))?;
        let stem = relative
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| JobError::invalid_key(key, "no file name"))?;

        let output_name = format!("{}{}", stem, OUTPUT_SUFFIX);
        let output_dir = staging_root.join(OUTPUT_PREFIX);

        Ok(Self {
            id: Uuid::new_v4(),
            source_key: key.to_string(),
            input_dir: staging_root.join(leading),
            input_path: staging_root.join(relative),
            output_path: output_dir.join(&output_name),
            output_dir,
            output_key: format!("{}/{}", OUTPUT_PREFIX, output_name),
            clip_seconds,
        })
    }
}

/// Keys become paths under the staging root, so only plain relative
/// components are accepted.
fn validate_key(key: &str) -> Result<&Path, JobError> {
    if key.is_empty() {
        return Err(JobError::invalid_key(key, "empty key"));
    }
    let path = Path::new(key);
    if !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(JobError::invalid_key(key, "key must be a relative path without '..'"));
    }
    if path.components().count() < 2 {
        return Err(JobError::invalid_key(key, "key has no prefix directory"));
    }
    Ok(path)
}

/// Tags embedded into the transcoded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTags {
    pub comment: String,
    pub operator: String,
}

impl MediaTags {
    pub fn for_instance(instance_id: &str, operator: &str) -> Self {
        Self {
            comment: format!("transcoded by instance {}", instance_id),
            operator: operator.to_string(),
        }
    }
}

/// Pipeline steps of one job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobState {
    Received,
    Downloading,
    Transcoding,
    Tagging,
    Uploading,
    CommittingMetadata,
    DeletingSource,
    AcknowledgingMessage,
    CleaningStaging,
    Done,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Received => "received",
            JobState::Downloading => "downloading",
            JobState::Transcoding => "transcoding",
            JobState::Tagging => "tagging",
            JobState::Uploading => "uploading",
            JobState::CommittingMetadata => "committing_metadata",
            JobState::DeletingSource => "deleting_source",
            JobState::AcknowledgingMessage => "acknowledging_message",
            JobState::CleaningStaging => "cleaning_staging",
            JobState::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub output_key: String,
    pub title: String,
    pub transcode_ms: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_paths_and_output_key_from_source_key() {
        let job = Job::from_key("in/abc.mp4", Path::new("/stage"), 10).unwrap();

        assert_eq!(job.source_key, "in/abc.mp4");
        assert_eq!(job.input_dir, PathBuf::from("/stage/in"));
        assert_eq!(job.input_path, PathBuf::from("/stage/in/abc.mp4"));
        assert_eq!(job.output_dir, PathBuf::from("/stage/out"));
        assert_eq!(job.output_path, PathBuf::from("/stage/out/abc-video-cropped.mp4"));
        assert_eq!(job.output_key, "out/abc-video-cropped.mp4");
        assert_eq!(job.clip_seconds, 10);
    }

    #[test]
    fn strips_only_the_last_extension() {
        let job = Job::from_key("in/holiday.2024.mov", Path::new("/stage"), 10).unwrap();
        assert_eq!(job.output_key, "out/holiday.2024-video-cropped.mp4");
    }

    #[test]
    fn nested_keys_stage_under_their_leading_segment() {
        let job = Job::from_key("in/user-9/clip.mkv", Path::new("/stage"), 10).unwrap();
        assert_eq!(job.input_dir, PathBuf::from("/stage/in"));
        assert_eq!(job.input_path, PathBuf::from("/stage/in/user-9/clip.mkv"));
        assert_eq!(job.output_key, "out/clip-video-cropped.mp4");
    }

    #[test]
    fn rejects_keys_that_escape_the_staging_root() {
        for key in ["", "  ", "/etc/passwd", "in/../../etc/passwd", "abc.mp4", "./in/abc.mp4"] {
            let err = Job::from_key(key, Path::new("/stage"), 10).unwrap_err();
            assert!(matches!(err, JobError::InvalidKey { .. }), "key {:?}", key);
        }
    }

    #[test]
    fn every_job_gets_its_own_id() {
        let a = Job::from_key("in/abc.mp4", Path::new("/stage"), 10).unwrap();
        let b = Job::from_key("in/abc.mp4", Path::new("/stage"), 10).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn comment_names_the_instance() {
        let tags = MediaTags::for_instance("3", "ops");
        assert_eq!(tags.comment, "transcoded by instance 3");
        assert_eq!(tags.operator, "ops");
    }

    #[test]
    fn states_are_ordered_like_the_pipeline() {
        assert!(JobState::DeletingSource < JobState::AcknowledgingMessage);
        assert!(JobState::AcknowledgingMessage < JobState::CleaningStaging);
        assert_eq!(JobState::CommittingMetadata.to_string(), "committing_metadata");
    }
}
