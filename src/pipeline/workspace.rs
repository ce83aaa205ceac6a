//! Per-run local transient storage.
//!
//! Each run owns `<work_dir>/run-<id>/` with a `documents/` and an `images/`
//! subdirectory. Nothing outside that directory is ever touched, so two runs
//! sharing a `work_dir` cannot delete each other's files. The directory is
//! held in a [`TempDir`], which removes it on drop even when the run panics;
//! [`RunWorkspace::close`] does the same removal explicitly so a failure can
//! be logged.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.\-]+").unwrap());

/// Make a free-text value safe to embed in a file name.
///
/// Runs of anything outside `[A-Za-z0-9_.-]` collapse to one `_`; leading and
/// trailing `_` are trimmed. An empty result becomes `"untitled"`.
pub fn sanitize(raw: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(raw.trim(), "_");
    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Scratch directories of one pipeline run.
#[derive(Debug)]
pub struct RunWorkspace {
    root: TempDir,
    documents: PathBuf,
    images: PathBuf,
}

impl RunWorkspace {
    /// Create `<work_dir>/run-<run_id>/{documents,images}`. `work_dir` is
    /// created if missing.
    pub fn create(work_dir: &Path, run_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let root = tempfile::Builder::new()
            .prefix(&format!("run-{run_id}"))
            .rand_bytes(0)
            .tempdir_in(work_dir)?;

        let documents = root.path().join("documents");
        let images = root.path().join("images");
        std::fs::create_dir(&documents)?;
        std::fs::create_dir(&images)?;

        debug!(root = %root.path().display(), "Created run workspace");
        Ok(Self {
            root,
            documents,
            images,
        })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents
    }

    pub fn images_dir(&self) -> &Path {
        &self.images
    }

    /// Remove the whole run directory.
    pub fn close(self) -> std::io::Result<()> {
        let path = self.root.path().to_path_buf();
        self.root.close()?;
        debug!(root = %path.display(), "Removed run workspace");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_spaces_and_symbols() {
        assert_eq!(sanitize("Wedding Reception"), "Wedding_Reception");
        assert_eq!(sanitize("  O'Brien & Sons / Gala "), "O_Brien_Sons_Gala");
        assert_eq!(sanitize("a.b-c_d"), "a.b-c_d");
    }

    #[test]
    fn sanitize_never_returns_empty() {
        assert_eq!(sanitize("///"), "untitled");
        assert_eq!(sanitize(""), "untitled");
    }

    #[test]
    fn workspace_layout_and_close() {
        let parent = tempfile::tempdir().unwrap();
        let ws = RunWorkspace::create(parent.path(), "abc").unwrap();
        assert_eq!(ws.root(), parent.path().join("run-abc"));
        assert!(ws.documents_dir().is_dir());
        assert!(ws.images_dir().is_dir());

        std::fs::write(ws.images_dir().join("p1.jpg"), b"x").unwrap();
        ws.close().unwrap();
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn dropped_workspace_is_removed() {
        let parent = tempfile::tempdir().unwrap();
        {
            let ws = RunWorkspace::create(parent.path(), "drop").unwrap();
            std::fs::write(ws.documents_dir().join("c.pdf"), b"%PDF").unwrap();
        }
        assert!(!parent.path().join("run-drop").exists());
    }

    #[test]
    fn runs_are_isolated() {
        let parent = tempfile::tempdir().unwrap();
        let a = RunWorkspace::create(parent.path(), "a").unwrap();
        let b = RunWorkspace::create(parent.path(), "b").unwrap();
        std::fs::write(b.images_dir().join("keep.jpg"), b"x").unwrap();
        a.close().unwrap();
        assert!(b.images_dir().join("keep.jpg").exists());
    }
}
