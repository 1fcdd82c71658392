//! Artifact persistence.
//!
//! Artifacts are named `<device>.<YYYYMMDDHHMMSS>.<ext>`. Bytes are first
//! written and fsynced to a hidden temporary file in the output directory,
//! then published under the final name with a hard link, which fails
//! instead of replacing an existing file. A reader therefore either sees
//! the complete artifact or nothing, and a crash before publishing leaves
//! only an orphaned temporary file.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{debug, warn};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::ArtifactError;
use crate::fetch::OutputKind;
use crate::inventory::validate_name;

/// Timestamp layout used in artifact names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// How many `-<n>` suffixes to try when the plain name is taken.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Build the artifact file name for one device, instant and kind.
pub fn artifact_name(device: &str, stamp: &DateTime<Local>, kind: OutputKind) -> String {
    format!(
        "{}.{}.{}",
        device,
        stamp.format(TIMESTAMP_FORMAT),
        kind.extension()
    )
}

/// Writes artifacts into one output directory for one run.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    run_id: String,
}

impl ArtifactWriter {
    /// Create the output directory (if needed) and a writer for `run_id`.
    pub async fn create(
        dir: impl Into<PathBuf>,
        run_id: impl Into<String>,
    ) -> Result<Self, ArtifactError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| ArtifactError::Io {
                action: "creating directory",
                path: dir.clone(),
                source,
            })?;

        Ok(Self {
            dir,
            run_id: run_id.into(),
        })
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run id qualifying temporary file names.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Persist `bytes` and return the published location.
    ///
    /// Once staging finishes the artifact is published even if this future
    /// is dropped. To bound the time spent, time out [`stage`](Self::stage)
    /// and await [`StagedArtifact::commit`] unconditionally.
    pub async fn write(
        &self,
        device: &str,
        stamp: &DateTime<Local>,
        kind: OutputKind,
        bytes: &[u8],
    ) -> Result<PathBuf, ArtifactError> {
        self.stage(device, stamp, kind, bytes).await?.commit().await
    }

    /// Write `bytes` to a temporary file without publishing it.
    ///
    /// The temporary name is qualified by device, kind and run id, so
    /// concurrent tasks and concurrent runs never share one.
    pub async fn stage(
        &self,
        device: &str,
        stamp: &DateTime<Local>,
        kind: OutputKind,
        bytes: &[u8],
    ) -> Result<StagedArtifact, ArtifactError> {
        validate_name(device).map_err(|_| ArtifactError::InvalidName {
            name: device.to_string(),
        })?;

        let temp = self
            .dir
            .join(format!(".{}.{}.{}.tmp", device, kind.extension(), self.run_id));
        let io_err = |action: &'static str| {
            let path = temp.clone();
            move |source: io::Error| ArtifactError::Io {
                action,
                path,
                source,
            }
        };

        let mut file = fs::File::create(&temp).await.map_err(io_err("creating"))?;
        file.write_all(bytes).await.map_err(io_err("writing"))?;
        file.sync_all().await.map_err(io_err("syncing"))?;
        drop(file);

        Ok(StagedArtifact {
            temp,
            dir: self.dir.clone(),
            stem: format!("{}.{}", device, stamp.format(TIMESTAMP_FORMAT)),
            extension: kind.extension(),
        })
    }
}

/// Fully written artifact waiting to be published.
///
/// Dropping it without calling [`commit`](Self::commit) leaves the
/// temporary file behind and nothing at the final path.
#[derive(Debug)]
pub struct StagedArtifact {
    temp: PathBuf,
    dir: PathBuf,
    stem: String,
    extension: &'static str,
}

impl StagedArtifact {
    /// Path of the temporary file.
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Path the artifact will be published at if the name is free.
    pub fn target_path(&self) -> PathBuf {
        self.candidate(0)
    }

    fn candidate(&self, attempt: u32) -> PathBuf {
        if attempt == 0 {
            self.dir.join(format!("{}.{}", self.stem, self.extension))
        } else {
            self.dir
                .join(format!("{}-{}.{}", self.stem, attempt + 1, self.extension))
        }
    }

    /// Publish under the first free name and remove the temporary file.
    ///
    /// Publishing runs on the blocking pool and completes even if the
    /// returned future is dropped, so callers must await it instead of
    /// racing it against a timeout. Bound [`ArtifactWriter::stage`] instead.
    pub async fn commit(self) -> Result<PathBuf, ArtifactError> {
        let target = self.target_path();
        tokio::task::spawn_blocking(move || self.publish())
            .await
            .map_err(|e| ArtifactError::Io {
                action: "publishing",
                path: target,
                source: io::Error::other(e),
            })?
    }

    fn publish(&self) -> Result<PathBuf, ArtifactError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let target = self.candidate(attempt);
            match std::fs::hard_link(&self.temp, &target) {
                Ok(()) => {
                    if let Err(e) = std::fs::remove_file(&self.temp) {
                        warn!("leaving temporary file {}: {}", self.temp.display(), e);
                    }
                    sync_dir(&self.dir);
                    return Ok(target);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("{} already exists, trying next name", target.display());
                }
                Err(source) => {
                    return Err(ArtifactError::Io {
                        action: "publishing",
                        path: target,
                        source,
                    });
                }
            }
        }

        Err(ArtifactError::NameExhausted {
            path: self.target_path(),
        })
    }
}

/// Make the new directory entry durable. Best effort.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = std::fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;

    fn stamp() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 4).unwrap()
    }

    #[test]
    fn test_artifact_name_is_zero_padded() {
        assert_eq!(
            artifact_name("PE0", &stamp(), OutputKind::Structured),
            "PE0.20260307090504.xml"
        );
        assert_eq!(
            artifact_name("P3", &stamp(), OutputKind::RawCli),
            "P3.20260307090504.cnf"
        );
    }

    #[tokio::test]
    async fn test_write_publishes_and_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path().join("out"), "run1")
            .await
            .unwrap();

        let path = writer
            .write("PE0", &stamp(), OutputKind::SetStyle, b"set system host-name PE0\n")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("out/PE0.20260307090504.set"));
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"set system host-name PE0\n"
        );
        assert_eq!(std::fs::read_dir(writer.dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_uncommitted_stage_leaves_no_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path(), "run1").await.unwrap();

        let staged = writer
            .stage("PE0", &stamp(), OutputKind::Structured, b"<configuration/>")
            .await
            .unwrap();
        let target = staged.target_path();
        let temp = staged.temp_path().to_path_buf();
        drop(staged);

        assert!(!target.exists());
        assert!(temp.exists());
    }

    #[tokio::test]
    async fn test_existing_artifact_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let first = ArtifactWriter::create(dir.path(), "run1").await.unwrap();
        let second = ArtifactWriter::create(dir.path(), "run2").await.unwrap();

        let a = first
            .write("PE0", &stamp(), OutputKind::RawCli, b"first")
            .await
            .unwrap();
        let b = second
            .write("PE0", &stamp(), OutputKind::RawCli, b"second")
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(b, dir.path().join("PE0.20260307090504-2.cnf"));
        assert_eq!(std::fs::read(&a).unwrap(), b"first");
        assert_eq!(std::fs::read(&b).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_rejects_unsafe_device_name() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path(), "run1").await.unwrap();

        let err = writer
            .write("../PE0", &stamp(), OutputKind::RawCli, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidName { .. }));
    }

    #[tokio::test]
    async fn test_timed_out_stage_never_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path(), "run1").await.unwrap();
        let target = dir.path().join("PE0.20260307090504.cnf");
        let mut timed_out = 0;

        for i in 0..200u64 {
            let staging = tokio::time::timeout(
                Duration::from_micros(i * 3),
                writer.stage("PE0", &stamp(), OutputKind::RawCli, b"cfg"),
            )
            .await;

            match staging {
                Err(_) => {
                    timed_out += 1;
                    assert!(!target.exists(), "published after staging timed out");
                }
                Ok(staged) => {
                    let path = staged.unwrap().commit().await.unwrap();
                    assert_eq!(path, target);
                    std::fs::remove_file(&path).unwrap();
                }
            }
        }
        assert!(timed_out > 0);
    }

    #[tokio::test]
    async fn test_dropped_commit_still_publishes_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path(), "run1").await.unwrap();

        let staged = writer
            .stage("PE0", &stamp(), OutputKind::SetStyle, b"set system")
            .await
            .unwrap();
        let target = staged.target_path();
        let temp = staged.temp_path().to_path_buf();

        // First poll hands publishing to the blocking pool
        let _ = tokio::time::timeout(Duration::ZERO, staged.commit()).await;

        for _ in 0..100 {
            if target.exists() && !temp.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(std::fs::read(&target).unwrap(), b"set system");
        assert!(!temp.exists());
    }
}
