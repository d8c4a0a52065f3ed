//! Problem domain: configuration, artifacts, build pipeline and reports.

pub mod artifact;
pub mod build;
pub mod config;
pub mod package;
pub mod report;
pub mod storage;
pub mod testgroup;
pub mod testlib;

use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::revision::{Revision, RevisionStore};

use self::config::ProblemConfig;

/// A problem: an id plus read access to its repository snapshots.
#[derive(Clone)]
pub struct Problem {
    pub id: Uuid,
    repo: Arc<dyn RevisionStore>,
}

impl Problem {
    pub fn new(id: Uuid, repo: Arc<dyn RevisionStore>) -> Self {
        Self { id, repo }
    }

    /// Contents of `path` at the given revision.
    pub fn file(&self, rev: &Revision, path: &str) -> Result<Vec<u8>> {
        self.repo.open(rev, path)
    }

    pub fn commit_exists(&self, rev: &Revision) -> bool {
        self.repo.commit_exists(rev)
    }

    /// Loads and decodes the problem configuration at the given revision.
    pub fn config(&self, rev: &Revision) -> Result<ProblemConfig> {
        let path = &crate::config::get().problem_config_path;
        let raw = self.file(rev, path)?;
        serde_yaml::from_slice(&raw)
            .with_context(|| format!("failed to parse problem config '{path}'"))
    }
}
