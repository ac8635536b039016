//! Scoped temporary files
//!
//! A `TempArtifact` owns a path for the lifetime of the function that created
//! it. The file is removed when the guard drops unless it was `persist`ed,
//! so every exit path (success, `?` early return, panic unwind) cleans up.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    /// Take ownership of `path`; nothing is created on disk
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the artifact to `target`, replacing it, and stop owning it
    pub fn persist(mut self, target: &Path) -> io::Result<()> {
        std::fs::rename(&self.path, target)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = remove_if_exists(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove temporary file"
                );
            }
        }
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sibling path with `suffix` appended to the full file name (`a.mp3` → `a.mp3.tmp`)
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}
