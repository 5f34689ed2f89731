//! Queue that moves host operations from RPC session threads onto the
//! editor's main loop.
//!
//! A session thread calls [`TaskBroker::handle`], which enqueues a [`Task`]
//! and blocks until the editor loop completes it. Editor state therefore
//! never needs to be shared across threads.

use super::RequestHandler;
use crate::protocol::{ErrorKind, OperationError, Request};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use serde_json::Value;

type Outcome = Result<Value, OperationError>;

/// A host operation waiting to be executed by the editor loop.
#[derive(Debug)]
pub struct Task {
    request: Request,
    reply: Sender<Outcome>,
}

impl Task {
    /// The requested operation.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Reply to the waiting session.
    pub fn complete(self, outcome: Outcome) {
        if self.reply.send(outcome).is_err() {
            tracing::debug!(request = %self.request, "task completed after its session went away");
        }
    }

    /// Execute the task with `f` and reply with its outcome.
    pub fn run_with(self, f: impl FnOnce(&Request) -> Outcome) {
        let outcome = f(&self.request);
        self.complete(outcome);
    }
}

/// Sending half of the task queue; install it as the server's handler.
#[derive(Debug, Clone)]
pub struct TaskBroker {
    tasks: Sender<Task>,
}

impl TaskBroker {
    /// Create a broker and the receiver the editor loop drains.
    pub fn channel() -> (Self, Receiver<Task>) {
        let (tasks, receiver) = unbounded();
        (Self { tasks }, receiver)
    }
}

/// Fail every task still waiting in `tasks` with an `Internal` error
/// carrying `message`, returning how many were rejected.
///
/// Used when the process that queued them has gone away.
pub fn reject_pending(tasks: &Receiver<Task>, message: &str) -> usize {
    let mut rejected = 0;
    for task in tasks.try_iter() {
        tracing::debug!(request = %task.request, "rejecting queued task");
        task.complete(Err(OperationError::new(ErrorKind::Internal, message)));
        rejected += 1;
    }
    rejected
}

impl RequestHandler for TaskBroker {
    fn handle(&self, request: Request) -> Outcome {
        let (reply, outcome) = bounded(1);
        self.tasks
            .send(Task { request, reply })
            .map_err(|_| OperationError::new(ErrorKind::Internal, "editor is not accepting tasks"))?;
        outcome.recv().map_err(|_| {
            OperationError::new(ErrorKind::Internal, "task was dropped without a reply")
        })?
    }
}
