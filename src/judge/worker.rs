//! Judge worker: drives requests against one sandbox server.
//!
//! A worker owns a sandbox client and a bounded inbound channel of
//! requests. Each request is processed in its own activity under a child
//! cancellation scope; each task of a request runs concurrently with a
//! timeout of twice its cpu limit plus a grace period. The first failing
//! task (or a callback returning `false`) cancels the scope, which aborts
//! the in-flight siblings and drops the chained successor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::sandbox::Sandbox;

use super::request::Request;
use super::task::Task;

/// Capacity of a worker's inbound request channel. Producers block when
/// the queue is full.
pub const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Grace period added on top of `2 x cpu_time` for the sandbox RPC.
const EXEC_GRACE: Duration = Duration::from_secs(30);

pub struct Judge {
    id: String,
    sandbox: Arc<dyn Sandbox>,
    tx: mpsc::Sender<Request>,
    rx: Mutex<Option<mpsc::Receiver<Request>>>,
}

impl Judge {
    pub fn new(id: impl Into<String>, sandbox: Arc<dyn Sandbox>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        Arc::new(Self {
            id: id.into(),
            sandbox,
            tx,
            rx: Mutex::new(Some(rx)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Starts the consumer loop. Each inbound request gets its own
    /// processing activity so a slow chain never blocks the queue.
    pub fn start(self: &Arc<Self>) {
        let Some(mut rx) = self.rx.lock().unwrap().take() else {
            warn!("judge '{}' already started", self.id);
            return;
        };
        let judge = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                tokio::spawn(Arc::clone(&judge).process(request));
            }
        });
    }

    /// Enqueues a request. Blocks when the worker's queue is full.
    pub async fn submit(&self, request: Request) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| anyhow!("judge '{}' is shut down", self.id))
    }

    /// Advisory measure of load: the number of queued requests.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Fetches a cached file from this worker's sandbox.
    pub async fn file_get(&self, file_id: &str) -> Result<Vec<u8>> {
        self.sandbox
            .file_get(file_id)
            .await
            .with_context(|| format!("judge '{}'", self.id))
    }

    async fn process(self: Arc<Self>, request: Request) {
        debug!("judge '{}': processing request {}", self.id, request.id);
        let Request {
            scope,
            id,
            tasks,
            next,
        } = request;
        let scope = scope.child_token();

        let mut activities = JoinSet::new();
        for task in tasks {
            activities.spawn(run_task(
                Arc::clone(&self.sandbox),
                scope.clone(),
                task,
            ));
        }
        while activities.join_next().await.is_some() {}

        if scope.is_cancelled() {
            info!("judge '{}': request {} aborted", self.id, id);
            return;
        }

        if let Some(next) = next {
            if self.tx.send(*next).await.is_err() {
                warn!(
                    "judge '{}': shut down, dropping chained request of {}",
                    self.id, id
                );
            }
        }
        debug!("judge '{}': finished request {}", self.id, id);
    }
}

async fn run_task(sandbox: Arc<dyn Sandbox>, scope: CancellationToken, task: Task) {
    let deadline =
        Duration::from_nanos(task.time_limit.saturating_mul(2)).saturating_add(EXEC_GRACE);
    let wire_request = task.to_exec_request();
    let Task { id, callback, .. } = task;

    let outcome = tokio::select! {
        _ = scope.cancelled() => {
            debug!("task {id} cancelled");
            return;
        }
        result = tokio::time::timeout(deadline, sandbox.exec(wire_request)) => result,
    };

    let result = match outcome {
        Ok(Ok(mut response)) if !response.results.is_empty() => Ok(response.results.remove(0)),
        Ok(Ok(_)) => Err(anyhow!("sandbox returned no results")),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(anyhow!("sandbox exec timed out")),
    };

    match result {
        Ok(result) => {
            debug!("task {id} executed");
            if !callback(Ok(result)) {
                info!("task {id} aborted by callback");
                scope.cancel();
            }
        }
        Err(err) => {
            if scope.is_cancelled() {
                // The request is already going down; this error is noise.
                return;
            }
            scope.cancel();
            error!("task {id} failed to execute: {err:#}");
            callback(Err(err));
        }
    }
}
