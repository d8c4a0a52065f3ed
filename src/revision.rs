//! Content-addressed access to problem repositories.
//!
//! A problem lives in a version-controlled repository; the pipeline only
//! ever reads files out of one immutable snapshot of it, addressed by a
//! 20-byte revision id. The store behind that id (git, an object store,
//! a plain directory of exported snapshots) is an external collaborator,
//! consumed through the narrow [`RevisionStore`] interface.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};

/// A 20-byte content-addressed snapshot identifier.
pub type Revision = [u8; 20];

/// Parses a 40-character hex string into a [`Revision`].
pub fn parse_revision(s: &str) -> Result<Revision> {
    let s = s.trim();
    if s.len() != 40 {
        bail!("revision must be 40 hex characters, got {}", s.len());
    }
    let mut rev = [0u8; 20];
    for (i, byte) in rev.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
            .with_context(|| format!("invalid hex in revision '{s}'"))?;
    }
    Ok(rev)
}

/// Formats a [`Revision`] as a 40-character lowercase hex string.
pub fn format_revision(rev: &Revision) -> String {
    let mut s = String::with_capacity(40);
    for byte in rev {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

/// Read access to one revision of a problem repository.
pub trait RevisionStore: Send + Sync {
    /// Returns the contents of `path` at `rev`, or an error if either the
    /// revision or the file does not exist.
    fn open(&self, rev: &Revision, path: &str) -> Result<Vec<u8>>;

    /// Whether the given revision exists in the store.
    fn commit_exists(&self, rev: &Revision) -> bool;
}

/// Revision store backed by a directory of exported snapshots, one
/// subdirectory per revision: `<root>/<hex-revision>/<path>`.
pub struct DirRevisionStore {
    root: PathBuf,
}

impl DirRevisionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rev: &Revision, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        // Reject traversal out of the snapshot directory.
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("unsafe path '{path}'");
        }
        Ok(self.root.join(format_revision(rev)).join(relative))
    }
}

impl RevisionStore for DirRevisionStore {
    fn open(&self, rev: &Revision, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(rev, path)?;
        std::fs::read(&full)
            .with_context(|| format!("'{path}' not found at revision {}", format_revision(rev)))
    }

    fn commit_exists(&self, rev: &Revision) -> bool {
        self.root.join(format_revision(rev)).is_dir()
    }
}

/// In-memory revision store, used by tests and tooling that assemble a
/// problem snapshot on the fly.
#[derive(Default)]
#[allow(dead_code)]
pub struct MemRevisionStore {
    commits: HashMap<Revision, HashMap<String, Vec<u8>>>,
}

#[allow(dead_code)]
impl MemRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a file in the given revision, creating the
    /// revision if it does not exist yet.
    pub fn insert(&mut self, rev: Revision, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.commits
            .entry(rev)
            .or_default()
            .insert(path.into(), content.into());
    }
}

impl RevisionStore for MemRevisionStore {
    fn open(&self, rev: &Revision, path: &str) -> Result<Vec<u8>> {
        self.commits
            .get(rev)
            .and_then(|files| files.get(path))
            .cloned()
            .with_context(|| format!("'{path}' not found at revision {}", format_revision(rev)))
    }

    fn commit_exists(&self, rev: &Revision) -> bool {
        self.commits.contains_key(rev)
    }
}
