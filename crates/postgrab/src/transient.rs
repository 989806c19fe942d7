//! Scoped ownership of the temporary files one assembly creates.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A per-operation token: millisecond timestamp plus a process-wide counter, so two
/// assemblies started in the same millisecond still get distinct names.
pub fn unique_token() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{millis}_{seq}")
}

/// Reduce a manifest location such as `DASH_720.mp4?source=fallback` to a safe file name.
pub fn sanitize_file_name(location: &str) -> String {
    let without_query = location.split(['?', '#']).next().unwrap_or_default();
    let last = without_query
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("stream");
    last.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Paths reserved under a work directory for the lifetime of one operation.
///
/// [`TransientFiles::release`] must be awaited on every exit path. Dropping an
/// unreleased set removes the files synchronously as a last resort.
#[derive(Debug)]
pub struct TransientFiles {
    dir: PathBuf,
    token: String,
    paths: Vec<PathBuf>,
    released: bool,
}

impl TransientFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            token: unique_token(),
            paths: Vec::new(),
            released: false,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Reserve `<dir>/<token>_<name>` and register it for removal.
    pub fn reserve(&mut self, name: &str) -> PathBuf {
        let path = self.dir.join(format!("{}_{}", self.token, name));
        self.paths.push(path.clone());
        path
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Remove every reserved path. Paths that were never created are skipped.
    pub async fn release(mut self) {
        for path in std::mem::take(&mut self.paths) {
            remove_async(&path).await;
        }
        self.released = true;
    }
}

async fn remove_async(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed transient file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove transient file"),
    }
}

impl Drop for TransientFiles {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed transient file on drop"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove transient file on drop")
                }
            }
        }
    }
}
