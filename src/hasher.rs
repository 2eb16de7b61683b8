//! Content Hasher: fingerprints discovered files in parallel.
//!
//! Each file is streamed through SHA-256 on a blocking thread; a semaphore
//! caps concurrent reads at `workers`. Unreadable files are skipped and
//! reported, never fatal.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tokio::sync::Semaphore;

use docvault_core::fingerprint::fingerprint_reader;
use docvault_core::ObservedFile;

use crate::progress::{SyncProgressEvent, SyncProgressReporter};

/// A file that could not be fingerprinted.
#[derive(Debug, Clone)]
pub struct HashFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Fingerprint one file. Size is the number of bytes actually hashed.
pub fn observe_file(path: &Path) -> std::io::Result<ObservedFile> {
    let file = File::open(path)?;
    let mtime = file
        .metadata()?
        .modified()
        .ok()
        .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let (fingerprint, size) = fingerprint_reader(file)?;
    Ok(ObservedFile {
        path: path.to_string_lossy().into_owned(),
        fingerprint,
        size,
        mtime,
    })
}

/// Fingerprint `paths` with at most `workers` files open at once.
///
/// Results come back in input order.
pub async fn hash_files(
    paths: Vec<PathBuf>,
    workers: usize,
    progress: &dyn SyncProgressReporter,
) -> (Vec<ObservedFile>, Vec<HashFailure>) {
    let total = paths.len() as u64;
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(paths.len());

    for path in paths {
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let p = path.clone();
            let result = tokio::task::spawn_blocking(move || observe_file(&p)).await;
            (path, result)
        }));
    }

    let mut observed = Vec::new();
    let mut failures = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let joined = handle.await;
        let n = i as u64 + 1;
        if n % 100 == 0 || n == total {
            progress.report(SyncProgressEvent::Hashing { n, total });
        }
        let (path, result) = match joined {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "hash task failed");
                continue;
            }
        };
        match result {
            Ok(Ok(file)) => observed.push(file),
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                failures.push(HashFailure {
                    path,
                    error: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "hash task failed");
                failures.push(HashFailure {
                    path,
                    error: e.to_string(),
                });
            }
        }
    }
    (observed, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use docvault_core::fingerprint::fingerprint_bytes;

    #[tokio::test]
    async fn test_hash_files_reports_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        let gone = tmp.path().join("gone.txt");

        let (observed, failures) = hash_files(vec![a.clone(), gone.clone(), b.clone()], 2, &NoProgress).await;
        assert_eq!(observed.len(), 2);
        assert_eq!(observed[0].path, a.to_string_lossy());
        assert_eq!(observed[0].fingerprint, observed[1].fingerprint);
        assert_eq!(observed[0].fingerprint, fingerprint_bytes(b"same bytes"));
        assert_eq!(observed[0].size, 10);
        assert!(observed[0].mtime > 0);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, gone);
    }
}
