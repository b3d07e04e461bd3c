//! Worker pool draining the work queue
//!
//! Each worker is a named OS thread that blocks in `WorkQueue::pop`, executes
//! the item against the record store and sends the response back to the
//! dispatcher that queued it. Closing the queue ends every worker loop; the pool
//! then joins the threads.

use crate::error::{Result, VaultError};
use crate::protocol::{Operation, Response, WorkItem};
use crate::queue::WorkQueue;
use crate::store::RecordStore;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// A queued work item plus the channel its response goes back on
#[derive(Debug)]
pub struct Job {
    item: WorkItem,
    reply: Option<oneshot::Sender<Response>>,
}

impl Job {
    /// A job whose response is discarded
    pub fn new(item: WorkItem) -> Self {
        Self { item, reply: None }
    }

    /// A job plus the receiver its response will be delivered to
    pub fn with_reply(item: WorkItem) -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                item,
                reply: Some(tx),
            },
            rx,
        )
    }

    pub fn item(&self) -> &WorkItem {
        &self.item
    }

    /// Execute the job and deliver its response
    pub fn run(self, store: &dyn RecordStore) {
        let operation = self.item.operation();
        let response = execute(self.item, store);

        if let Some(reply) = self.reply {
            if reply.send(response).is_err() {
                debug!(%operation, "requester gone before response was delivered");
            }
        }
    }
}

/// Execute a work item against the store
pub fn execute(item: WorkItem, store: &dyn RecordStore) -> Response {
    let (operation, id, payload) = item.into_parts();

    let result = match (operation, id, payload) {
        (Operation::Create, _, Some(payload)) => store.create(payload).map(Response::Created),
        (Operation::Read, Some(id), _) => store.read(id).map(Response::Value),
        (Operation::ReadAll, _, _) => store.read_all().map(Response::Records),
        (Operation::Update, Some(id), Some(payload)) => {
            store.update(id, payload).map(|()| Response::Ok)
        }
        (Operation::Delete, Some(id), _) => store.delete(id).map(|()| Response::Ok),
        (operation, _, _) => {
            return Response::Error(format!("{} is missing a required field", operation))
        }
    };

    match result {
        Ok(response) => response,
        Err(VaultError::NotFound(_)) => Response::NotFound,
        Err(e) => {
            warn!(%operation, error = %e, "operation failed");
            Response::Error(format!("{} failed: {}", operation, e))
        }
    }
}

/// Fixed-size set of worker threads consuming one queue
pub struct WorkerPool {
    queue: Arc<WorkQueue<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers popping from `queue`
    pub fn spawn(
        size: usize,
        queue: Arc<WorkQueue<Job>>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        if size == 0 {
            return Err(VaultError::InvalidArgument(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let mut pool = Self {
            queue,
            handles: Vec::with_capacity(size),
        };

        for index in 0..size {
            let queue = Arc::clone(&pool.queue);
            let store = Arc::clone(&store);
            // On failure, dropping `pool` stops the workers already started.
            let handle = thread::Builder::new()
                .name(format!("worker-{}", index))
                .spawn(move || run_worker(index, queue, store))?;
            pool.handles.push(handle);
        }

        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Close the queue and wait for every worker to exit
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.queue.close();

        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        if panicked > 0 {
            return Err(VaultError::Server(format!(
                "{} worker(s) panicked",
                panicked
            )));
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "worker pool shutdown failed");
        }
    }
}

fn run_worker(index: usize, queue: Arc<WorkQueue<Job>>, store: Arc<dyn RecordStore>) {
    debug!(worker = index, "worker started");

    loop {
        match queue.pop() {
            Ok(job) => job.run(store.as_ref()),
            Err(VaultError::QueueClosed) => break,
            Err(e) => {
                error!(worker = index, error = %e, "worker stopping on queue error");
                break;
            }
        }
    }

    debug!(worker = index, "worker exiting");
}
