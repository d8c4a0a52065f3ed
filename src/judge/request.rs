//! Batches of tasks and their chaining.
//!
//! A request is a set of tasks executed concurrently plus an optional
//! successor executed only after every task of this request has completed
//! and none of them aborted. Chains express "compile, then run" without
//! the submitter waiting in between.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::task::Task;

pub struct Request {
    /// Cancellation scope of the request. Cancelling it aborts the
    /// remaining tasks and drops the chain.
    pub scope: CancellationToken,
    pub id: Uuid,
    /// Executed concurrently within this request.
    pub tasks: Vec<Task>,
    /// Executed after this request, unless the scope was cancelled.
    pub next: Option<Box<Request>>,
}

impl Request {
    pub fn new() -> Self {
        Self::with_scope(CancellationToken::new())
    }

    pub fn with_scope(scope: CancellationToken) -> Self {
        Self {
            scope,
            id: Uuid::new_v4(),
            tasks: Vec::new(),
            next: None,
        }
    }

    /// Adds tasks to this request.
    pub fn execute(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// Appends a new request with the given tasks at the end of the
    /// chain. The appended request shares this chain's scope.
    pub fn then(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        let scope = self.scope.clone();
        let mut tail = &mut self;
        while tail.next.is_some() {
            tail = tail.next.as_mut().unwrap();
        }
        tail.next = Some(Box::new(Request::with_scope(scope).execute(tasks)));
        self
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}
