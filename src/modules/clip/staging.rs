use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::error::{JobError, JobResult};
use super::model::Job;

/// Local working area for jobs, rooted at the configured staging directory.
#[derive(Debug, Clone)]
pub struct Staging {
    root: PathBuf,
}

impl Staging {
    /// Resolves the root, creating it when missing.
    pub async fn open(root: impl Into<PathBuf>) -> JobResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| JobError::staging(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the input and output directories of a job. Existing
    /// directories are fine.
    pub async fn prepare(&self, job: &Job) -> JobResult<()> {
        let input_parent = job.input_path.parent().unwrap_or(job.input_dir.as_path());
        for dir in [input_parent, job.output_dir.as_path()] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| JobError::staging(dir, e))?;
        }
        debug!(
            input = %job.input_path.display(),
            output = %job.output_path.display(),
            "Staging prepared"
        );
        Ok(())
    }

    /// Removes the job's staged files. A file that is already gone is not
    /// an error.
    pub async fn remove_files(&self, job: &Job) -> JobResult<()> {
        for path in [&job.input_path, &job.output_path] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(JobError::staging(path, e)),
            }
        }
        Ok(())
    }

    /// Like `remove_files`, logging instead of failing.
    pub async fn cleanup(&self, job: &Job) {
        if let Err(e) = self.remove_files(job).await {
            warn!("Failed to clean staging for {}: {}", job.source_key, e);
        }
    }
}
