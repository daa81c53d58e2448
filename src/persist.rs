// src/persist.rs - On-disk spool directories for crash recovery and audit
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;

use crate::doc::{DocError, PlotDoc};
use crate::job::Job;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";
const CLIENT_MAX_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Doc(#[from] DocError),
    #[error("unparseable spool filename: {0}")]
    BadFileName(String),
    #[error("spool file has no client identity: {0}")]
    MissingClient(String),
}

/// Disk status folders. A job lives in `waiting` while queued or plotting and
/// is moved to `canceled` or `finished` on its terminal transition; the
/// terminal copy stays behind as an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolStatus {
    Waiting,
    Canceled,
    Finished,
}

impl SpoolStatus {
    fn dir_name(self) -> &'static str {
        match self {
            SpoolStatus::Waiting => "waiting",
            SpoolStatus::Canceled => "canceled",
            SpoolStatus::Finished => "finished",
        }
    }
}

/// A job reconstructed from the waiting folder on startup.
#[derive(Debug)]
pub struct LoadedJob {
    pub client: String,
    pub doc: PlotDoc,
    pub received_at: DateTime<Utc>,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SpoolDir {
    root: PathBuf,
}

impl SpoolDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, status: SpoolStatus) -> PathBuf {
        self.root.join(status.dir_name())
    }

    pub async fn ensure_dirs(&self) -> Result<(), PersistError> {
        for status in [
            SpoolStatus::Waiting,
            SpoolStatus::Canceled,
            SpoolStatus::Finished,
        ] {
            fs::create_dir_all(self.dir(status)).await?;
        }
        Ok(())
    }

    /// Persist a job under the given status folder.
    ///
    /// The filename encodes the queue position, so a `Move` re-saves the job
    /// and the old file is removed. An unchanged target is not rewritten
    /// unless `overwrite` is set.
    pub async fn save(
        &self,
        job: &Arc<Job>,
        status: SpoolStatus,
        position: usize,
        overwrite: bool,
    ) -> Result<PathBuf, PersistError> {
        let dir = self.dir(status);
        let target = dir.join(file_name(job, position));
        let previous = job.state().save_path.clone();
        if previous.as_deref() == Some(target.as_path()) && !overwrite {
            return Ok(target);
        }
        fs::create_dir_all(&dir).await?;
        if let Some(previous) = previous {
            if previous != target {
                if let Err(e) = fs::remove_file(&previous).await {
                    tracing::warn!(path = %previous.display(), error = %e, "failed to remove stale spool file");
                }
            }
        }
        fs::write(&target, job.doc.payload()).await?;
        job.state().save_path = Some(target.clone());
        Ok(target)
    }

    /// Scan the waiting folder and rebuild jobs in filename-sort order.
    /// Corrupt files are skipped with a warning; they are never fatal.
    pub async fn load_waiting(&self) -> Result<Vec<LoadedJob>, PersistError> {
        let dir = self.dir(SpoolStatus::Waiting);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        let mut loaded = Vec::new();
        for name in names {
            let path = dir.join(&name);
            match load_spool_file(&path, &name).await {
                Ok(job) => loaded.push(job),
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "skipping corrupt spool file");
                }
            }
        }
        Ok(loaded)
    }
}

async fn load_spool_file(path: &Path, name: &str) -> Result<LoadedJob, PersistError> {
    let payload = fs::read_to_string(path).await?;
    let doc = PlotDoc::parse(payload)?;
    let (received_at, filename_client) = parse_file_name(name)?;
    let client = if doc.meta().author.is_empty() {
        filename_client
    } else {
        doc.meta().author.clone()
    };
    if client.is_empty() {
        return Err(PersistError::MissingClient(name.to_string()));
    }
    Ok(LoadedJob {
        client,
        doc,
        received_at,
        path: path.to_path_buf(),
    })
}

/// Filename layout: zero-padded position, receipt timestamp, truncated
/// client id, truncated content hash, travel distance and time estimate.
/// Lexicographic filename order reconstructs queue order on resume.
pub fn file_name(job: &Arc<Job>, position: usize) -> String {
    format!(
        "{:03}_{}_{}_{}_{:.0}mm_{:.0}s.svg",
        position,
        job.received_at.format(TIMESTAMP_FORMAT),
        sanitize_client(&job.client),
        job.doc.short_hash(),
        job.stats.distance_total,
        job.stats.time_estimate,
    )
}

fn parse_file_name(name: &str) -> Result<(DateTime<Utc>, String), PersistError> {
    let bad = || PersistError::BadFileName(name.to_string());
    let stem = name.strip_suffix(".svg").ok_or_else(bad)?;
    let mut fields = stem.split('_');
    let _position = fields.next().ok_or_else(bad)?;
    let timestamp = fields.next().ok_or_else(bad)?;
    let client = fields.next().unwrap_or_default().to_string();
    let received_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map_err(|_| bad())?
        .and_utc();
    Ok((received_at, client))
}

/// Keep filenames unambiguous: the sanitized client never contains the
/// underscore field separator.
fn sanitize_client(client: &str) -> String {
    let cleaned: String = client
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(CLIENT_MAX_LEN)
        .collect();
    if cleaned.is_empty() {
        "anon".to_string()
    } else {
        cleaned
    }
}
