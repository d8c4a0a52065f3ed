//! Directory of judge workers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};

use super::worker::Judge;

/// Registry of judge workers by id with least-loaded selection.
///
/// The pool stays small (tens of workers), so selection is a linear scan
/// over advisory queue-depth snapshots; the measurement may be slightly
/// stale, which is acceptable for scheduling.
#[derive(Default)]
pub struct JudgePool {
    judges: RwLock<HashMap<String, Arc<Judge>>>,
}

impl JudgePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, judge: Arc<Judge>) {
        self.judges
            .write()
            .unwrap()
            .insert(judge.id().to_string(), judge);
    }

    pub fn get(&self, id: &str) -> Result<Arc<Judge>> {
        self.judges
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("judge '{id}' not found"))
    }

    /// Returns the worker with the smallest request queue, or an error if
    /// the pool is empty. Ties go to whichever registered entry is seen
    /// first.
    pub fn idle_judge(&self) -> Result<Arc<Judge>> {
        let judges = self.judges.read().unwrap();
        judges
            .values()
            .min_by_key(|judge| judge.queue_depth())
            .cloned()
            .ok_or_else(|| anyhow!("no judge available"))
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.judges.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.judges.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::request::Request;
    use crate::sandbox::testing::{accepted_result, status_response, MockReply, MockSandbox};

    fn idle_mock() -> Arc<MockSandbox> {
        MockSandbox::new(|_, _| {
            MockReply::respond(status_response(accepted_result(
                &[("stdout", "out")],
                &[("stderr", b"")],
            )))
        })
    }

    #[tokio::test]
    async fn test_empty_pool_errors() {
        let pool = JudgePool::new();
        assert!(pool.idle_judge().is_err());
        assert!(pool.get("a").is_err());
    }

    #[tokio::test]
    async fn test_idle_selection_prefers_shortest_queue() {
        let pool = JudgePool::new();
        // Neither worker is started, so submitted requests stay queued.
        let busy = Judge::new("busy", idle_mock());
        let idle = Judge::new("idle", idle_mock());
        pool.register(Arc::clone(&busy));
        pool.register(Arc::clone(&idle));

        for _ in 0..3 {
            busy.submit(Request::new()).await.unwrap();
        }
        assert_eq!(busy.queue_depth(), 3);
        assert_eq!(idle.queue_depth(), 0);

        let picked = pool.idle_judge().unwrap();
        assert_eq!(picked.id(), "idle");
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let pool = JudgePool::new();
        pool.register(Judge::new("main", idle_mock()));
        assert_eq!(pool.get("main").unwrap().id(), "main");
        assert_eq!(pool.len(), 1);
    }
}
