//! Problem metadata store.
//!
//! The persistent database of problems and build reports is an external
//! collaborator; the pipeline and the HTTP surface consume it only
//! through the [`MetadataStore`] trait. The in-memory implementation
//! backs tests and single-node deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::problem::report::BuildInfo;
use crate::revision::{format_revision, Revision};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemMeta {
    pub id: Uuid,
    pub name: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_build_rev: Option<String>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_problem(&self, id: Uuid) -> Result<Option<ProblemMeta>>;

    async fn list_problems(&self) -> Result<Vec<ProblemMeta>>;

    async fn create_problem(&self, name: &str, tags: Vec<String>) -> Result<ProblemMeta>;

    /// Stores the report of a successful build and records the revision
    /// as the problem's latest built one.
    async fn upsert_build_info(
        &self,
        problem_id: Uuid,
        rev: &Revision,
        info: &BuildInfo,
    ) -> Result<()>;

    async fn get_build_info(&self, problem_id: Uuid, rev: &Revision)
        -> Result<Option<BuildInfo>>;
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    problems: RwLock<HashMap<Uuid, ProblemMeta>>,
    builds: RwLock<HashMap<(Uuid, String), BuildInfo>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get_problem(&self, id: Uuid) -> Result<Option<ProblemMeta>> {
        Ok(self.problems.read().unwrap().get(&id).cloned())
    }

    async fn list_problems(&self) -> Result<Vec<ProblemMeta>> {
        let mut problems: Vec<ProblemMeta> =
            self.problems.read().unwrap().values().cloned().collect();
        problems.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(problems)
    }

    async fn create_problem(&self, name: &str, tags: Vec<String>) -> Result<ProblemMeta> {
        let problem = ProblemMeta {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tags,
            last_build_rev: None,
        };
        self.problems
            .write()
            .unwrap()
            .insert(problem.id, problem.clone());
        Ok(problem)
    }

    async fn upsert_build_info(
        &self,
        problem_id: Uuid,
        rev: &Revision,
        info: &BuildInfo,
    ) -> Result<()> {
        let rev_hex = format_revision(rev);
        self.builds
            .write()
            .unwrap()
            .insert((problem_id, rev_hex.clone()), info.clone());
        if let Some(problem) = self.problems.write().unwrap().get_mut(&problem_id) {
            problem.last_build_rev = Some(rev_hex);
        }
        Ok(())
    }

    async fn get_build_info(
        &self,
        problem_id: Uuid,
        rev: &Revision,
    ) -> Result<Option<BuildInfo>> {
        Ok(self
            .builds
            .read()
            .unwrap()
            .get(&(problem_id, format_revision(rev)))
            .cloned())
    }
}
