//! Diagnostic archive capture.
//!
//! At teardown the harness persists node logs and the run manifest for
//! postmortem inspection, keyed by a scenario-specific name. Archiving is
//! best-effort by contract: failures are reported to the caller, which logs
//! them and never lets them escape the cleanup boundary.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Errors while writing a diagnostic archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Filesystem error while staging the archive.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Copy the run directory's diagnostic files under
/// `<archive_root>/<archive_name>-<id>` and compress the result.
///
/// Only regular files at the top level of the run directory are captured
/// (per-node logs and the run manifest); node data directories stay behind.
/// If `tar` is unavailable the uncompressed directory is the archive.
pub async fn write_archive(
    run_dir: &Path,
    archive_root: &Path,
    archive_name: &str,
) -> Result<PathBuf, ArchiveError> {
    let id = uuid::Uuid::new_v4().as_simple().to_string();
    let stage_name = format!("{archive_name}-{}", &id[..8]);
    let stage_dir = archive_root.join(&stage_name);
    tokio::fs::create_dir_all(&stage_dir).await?;

    let mut entries = tokio::fs::read_dir(run_dir).await?;
    let mut captured = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::copy(entry.path(), stage_dir.join(entry.file_name())).await?;
            captured += 1;
        }
    }
    debug!(files = captured, dir = %stage_dir.display(), "staged diagnostics");

    Ok(compress(archive_root, &stage_name).await)
}

/// Compress the staged directory with `tar`, falling back to the plain
/// directory when that fails.
async fn compress(archive_root: &Path, stage_name: &str) -> PathBuf {
    let stage_dir = archive_root.join(stage_name);
    let tarball = archive_root.join(format!("{stage_name}.tar.gz"));

    let result = tokio::process::Command::new("tar")
        .arg("czf")
        .arg(&tarball)
        .arg("-C")
        .arg(archive_root)
        .arg(stage_name)
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {
            if let Err(e) = tokio::fs::remove_dir_all(&stage_dir).await {
                warn!(error = %e, "could not remove staged archive directory");
            }
            tarball
        }
        Ok(output) => {
            warn!(
                stderr = %String::from_utf8_lossy(&output.stderr),
                "tar failed, keeping uncompressed archive"
            );
            stage_dir
        }
        Err(e) => {
            warn!(error = %e, "tar unavailable, keeping uncompressed archive");
            stage_dir
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_dir_with_logs(root: &Path) -> PathBuf {
        let run_dir = root.join("run");
        tokio::fs::create_dir_all(run_dir.join("node-0")).await.unwrap();
        tokio::fs::write(run_dir.join("node-0.log"), b"node 0 log").await.unwrap();
        tokio::fs::write(run_dir.join("node-1.log"), b"node 1 log").await.unwrap();
        tokio::fs::write(run_dir.join("run.json"), b"{}").await.unwrap();
        run_dir
    }

    #[tokio::test]
    async fn archive_is_written() {
        let tmp = tempfile::tempdir().unwrap();
        let run_dir = run_dir_with_logs(tmp.path()).await;
        let archive_root = tmp.path().join("archives");
        tokio::fs::create_dir_all(&archive_root).await.unwrap();

        let archive = write_archive(&run_dir, &archive_root, "TestSmokeResults")
            .await
            .unwrap();

        assert!(archive.exists());
        assert!(archive
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("TestSmokeResults-"));
    }

    #[tokio::test]
    async fn node_data_directories_stay_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let run_dir = run_dir_with_logs(tmp.path()).await;
        let archive_root = tmp.path().join("archives");
        tokio::fs::create_dir_all(&archive_root).await.unwrap();

        let archive = write_archive(&run_dir, &archive_root, "logs-only")
            .await
            .unwrap();

        // When tar is unavailable the staged directory is the archive;
        // either way no node data directory may have been captured.
        if archive.is_dir() {
            assert!(archive.join("node-0.log").exists());
            assert!(!archive.join("node-0").exists());
        }
    }

    #[tokio::test]
    async fn two_archives_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let run_dir = run_dir_with_logs(tmp.path()).await;
        let archive_root = tmp.path().join("archives");
        tokio::fs::create_dir_all(&archive_root).await.unwrap();

        let first = write_archive(&run_dir, &archive_root, "same-name").await.unwrap();
        let second = write_archive(&run_dir, &archive_root, "same-name").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn missing_run_dir_reports_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = write_archive(&tmp.path().join("nope"), tmp.path(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Io(_)));
    }
}
