//! Embedded media tags of staged files.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::model::{MediaTags, NO_TITLE_SENTINEL};

#[derive(Debug, Error)]
pub enum TagError {
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed on {path}: {stderr}")]
    Failed {
        program: String,
        path: PathBuf,
        stderr: String,
    },

    #[error("Unreadable probe output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaTagger: Send + Sync {
    /// The file's title tag, `None` when it has none.
    async fn read_title(&self, path: &Path) -> Result<Option<String>, TagError>;

    /// Persists `tags` into the file. The file is either fully rewritten or
    /// left as it was.
    async fn write_tags(&self, path: &Path, tags: &MediaTags) -> Result<(), TagError>;

    /// Reads the original title, falling back to the sentinel, then writes
    /// `tags`. Returns the title to publish.
    async fn tag(&self, path: &Path, tags: &MediaTags) -> Result<String, TagError> {
        let title = match self.read_title(path).await? {
            Some(title) => title,
            None => {
                debug!("{} has no title tag", path.display());
                NO_TITLE_SENTINEL.to_string()
            }
        };
        self.write_tags(path, tags).await?;
        Ok(title)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Extracts the title from `ffprobe -show_format` JSON. Tag names are
/// matched case-insensitively; a blank title counts as missing.
pub fn title_from_probe(json: &[u8]) -> Result<Option<String>, TagError> {
    let probe: ProbeOutput = serde_json::from_slice(json)?;
    Ok(probe.format.and_then(|format| {
        format
            .tags
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("title"))
            .map(|(_, value)| value)
            .filter(|value| !value.trim().is_empty())
    }))
}

/// Reads tags with `ffprobe` and rewrites them with an `ffmpeg` stream copy.
#[derive(Debug, Clone)]
pub struct FfmpegTagger {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegTagger {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn scratch_path(path: &Path) -> PathBuf {
        path.with_extension("tagging.mp4")
    }

    pub fn build_write_args(path: &Path, scratch: &Path, tags: &MediaTags) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            path.to_string_lossy().to_string(),
            "-map".to_string(),
            "0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-map_metadata".to_string(),
            "0".to_string(),
            "-metadata".to_string(),
            format!("comment={}", tags.comment),
            "-metadata".to_string(),
            format!("artist={}", tags.operator),
            "-f".to_string(),
            "mp4".to_string(),
            scratch.to_string_lossy().to_string(),
        ]
    }

    async fn run(&self, program: &str, args: &[String], path: &Path) -> Result<Vec<u8>, TagError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TagError::Launch {
                program: program.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(TagError::Failed {
                program: program.to_string(),
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaTagger for FfmpegTagger {
    async fn read_title(&self, path: &Path) -> Result<Option<String>, TagError> {
        let args = [
            "-v".to_string(),
            "quiet".to_string(),
            "-print_format".to_string(),
            "json".to_string(),
            "-show_format".to_string(),
            path.to_string_lossy().to_string(),
        ];
        let stdout = self.run(&self.ffprobe, &args, path).await?;
        let title = title_from_probe(&stdout)?;
        info!("File's metadata: Title: {}", title.as_deref().unwrap_or("<none>"));
        Ok(title)
    }

    async fn write_tags(&self, path: &Path, tags: &MediaTags) -> Result<(), TagError> {
        let scratch = Self::scratch_path(path);
        let args = Self::build_write_args(path, &scratch, tags);

        if let Err(e) = self.run(&self.ffmpeg, &args, path).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&scratch, path).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(e.into());
        }

        debug!("Tagged {}", path.display());
        Ok(())
    }
}
