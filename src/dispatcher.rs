//! Request dispatcher: the producer side of the work queue
//!
//! For every accepted connection the dispatcher reads one request, parses it
//! and pushes a `Job` onto the queue. It never executes operations itself; it
//! only waits for the worker's response and writes it back.

use crate::error::{Result, VaultError};
use crate::protocol::{parse_request, Response};
use crate::queue::WorkQueue;
use crate::worker::Job;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    sync::{broadcast, oneshot},
    time::timeout,
};
use tracing::{debug, info, warn};

/// Longest request accepted, line terminator included
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 1024;

#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<WorkQueue<Job>>,
    max_request_size: usize,
    read_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<WorkQueue<Job>>,
        max_request_size: usize,
        read_timeout: Option<Duration>,
    ) -> Result<Self> {
        if max_request_size == 0 {
            return Err(VaultError::InvalidArgument(
                "max request size must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            queue,
            max_request_size,
            read_timeout,
        })
    }

    /// Parse a raw request and queue it for a worker.
    ///
    /// Malformed requests are rejected before anything is queued, including a
    /// buffer that fills the size limit without a line terminator.
    pub fn dispatch(&self, buffer: &[u8]) -> Result<oneshot::Receiver<Response>> {
        let terminated = buffer.iter().any(|&b| b == b'\n' || b == 0);
        if buffer.len() >= self.max_request_size && !terminated {
            return Err(VaultError::MalformedRequest(format!(
                "request exceeds {} bytes",
                self.max_request_size
            )));
        }

        let item = parse_request(buffer)?;
        let (job, reply) = Job::with_reply(item);
        self.queue.push(job)?;
        Ok(reply)
    }

    /// Accept connections from `listener` until a shutdown signal arrives
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!(%addr, "connection accepted");
                            let dispatcher = self.clone();

                            tokio::spawn(async move {
                                match dispatcher.handle_connection(stream).await {
                                    Ok(Some(_)) => debug!(%addr, "request answered"),
                                    Ok(None) => debug!(%addr, "peer closed without a request"),
                                    Err(e) => warn!(%addr, error = %e, "connection failed"),
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, dispatcher stopping");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Serve one request on an accepted connection.
    ///
    /// Returns `None` when the peer closed before sending anything. Read
    /// failures are returned as errors and the connection is dropped.
    pub async fn handle_connection<S>(&self, mut stream: S) -> Result<Option<Response>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = match self.read_request(&mut stream).await? {
            Some(request) => request,
            None => return Ok(None),
        };

        let response = match self.dispatch(&request) {
            Ok(reply) => reply
                .await
                .unwrap_or_else(|_| Response::Error(VaultError::QueueClosed.to_string())),
            Err(e) => {
                warn!(error = %e, "request rejected");
                Response::Error(e.to_string())
            }
        };

        stream.write_all(&response.to_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await?;

        Ok(Some(response))
    }

    // One read per request: whatever arrives is the whole request, and
    // `dispatch` locates the newline or NUL terminator itself.
    async fn read_request<S>(&self, stream: &mut S) -> Result<Option<Vec<u8>>>
    where
        S: AsyncRead + Unpin,
    {
        let mut buffer = vec![0u8; self.max_request_size];
        let read = stream.read(&mut buffer);

        let bytes_read = match self.read_timeout {
            Some(limit) => timeout(limit, read).await.map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, "timed out reading request")
            })??,
            None => read.await?,
        };

        if bytes_read == 0 {
            return Ok(None);
        }
        buffer.truncate(bytes_read);
        Ok(Some(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WorkItem;
    use crate::store::{MemoryStore, RecordStore};
    use crate::worker::WorkerPool;
    use tokio::io::duplex;

    fn dispatcher_with_queue() -> (Dispatcher, Arc<WorkQueue<Job>>) {
        let queue = Arc::new(WorkQueue::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            DEFAULT_MAX_REQUEST_SIZE,
            Some(Duration::from_secs(5)),
        )
        .unwrap();
        (dispatcher, queue)
    }

    async fn exchange(dispatcher: &Dispatcher, request: &[u8]) -> (Option<Response>, Vec<u8>) {
        let (mut client, server) = duplex(4096);
        client.write_all(request).await.unwrap();

        let outcome = dispatcher.handle_connection(server).await.unwrap();

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        (outcome, reply)
    }

    #[test]
    fn test_dispatch_queues_parsed_item() {
        let (dispatcher, queue) = dispatcher_with_queue();

        let _reply = dispatcher.dispatch(b"UPDATE 3 data\n").unwrap();
        assert_eq!(queue.size(), 1);

        let job = queue.try_pop().unwrap().unwrap();
        assert_eq!(job.item(), &WorkItem::update(3, b"data".to_vec()));
    }

    #[test]
    fn test_malformed_request_is_not_queued() {
        let (dispatcher, queue) = dispatcher_with_queue();

        let result = dispatcher.dispatch(b"FROB 1\n");
        assert!(matches!(result, Err(VaultError::MalformedRequest(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_oversized_request_is_rejected() {
        let queue = Arc::new(WorkQueue::new());
        let dispatcher = Dispatcher::new(Arc::clone(&queue), 16, None).unwrap();

        let result = dispatcher.dispatch(b"CREATE 0123456789abcdef");
        assert!(matches!(result, Err(VaultError::MalformedRequest(_))));
        assert!(queue.is_empty());

        dispatcher.dispatch(b"CREATE 01234567\n").unwrap();
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_dispatch_after_close_fails() {
        let (dispatcher, queue) = dispatcher_with_queue();
        queue.close();

        let result = dispatcher.dispatch(b"READ_ALL\n");
        assert!(matches!(result, Err(VaultError::QueueClosed)));
    }

    #[test]
    fn test_zero_request_size_is_invalid() {
        let queue = Arc::new(WorkQueue::new());
        let result = Dispatcher::new(queue, 0, None);
        assert!(matches!(result, Err(VaultError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_connection_round_trip() {
        let (dispatcher, queue) = dispatcher_with_queue();
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let pool = WorkerPool::spawn(2, Arc::clone(&queue), store).unwrap();

        let (outcome, reply) = exchange(&dispatcher, b"CREATE hello world\n").await;
        assert_eq!(outcome, Some(Response::Created(1)));
        assert_eq!(reply, b"CREATED 1\r\n");

        let (_, reply) = exchange(&dispatcher, b"READ 1\r\n").await;
        assert_eq!(reply, b"VALUE hello world\r\n");

        let (_, reply) = exchange(&dispatcher, b"READ 2\n").await;
        assert_eq!(reply, b"NOT_FOUND\r\n");

        tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_accepts_nul_and_unterminated_requests() {
        // No read deadline: the reply must not depend on the peer closing.
        let queue = Arc::new(WorkQueue::new());
        let dispatcher =
            Dispatcher::new(Arc::clone(&queue), DEFAULT_MAX_REQUEST_SIZE, None).unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let pool = WorkerPool::spawn(1, Arc::clone(&queue), store).unwrap();

        for request in [&b"READ_ALL\0"[..], b"READ_ALL", b"CREATE abc\0trailing"] {
            let (outcome, reply) = timeout(Duration::from_secs(5), exchange(&dispatcher, request))
                .await
                .expect("request was not answered while the peer stayed open");
            assert!(outcome.is_some());
            assert!(!reply.starts_with(b"ERROR"), "unexpected {:?}", reply);
        }

        let (_, reply) = exchange(&dispatcher, b"READ 1").await;
        assert_eq!(reply, b"VALUE abc\r\n");

        tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_reads_a_single_chunk() {
        let (dispatcher, queue) = dispatcher_with_queue();
        let (mut client, server) = duplex(4096);
        client.write_all(b"READ_ALL").await.unwrap();

        let handler = tokio::spawn(async move { dispatcher.handle_connection(server).await });
        while queue.is_empty() {
            tokio::task::yield_now().await;
        }

        let job = queue.try_pop().unwrap().unwrap();
        assert_eq!(job.item(), &WorkItem::read_all());
        job.run(&MemoryStore::new());

        let outcome = handler.await.unwrap().unwrap();
        assert_eq!(outcome, Some(Response::Records(Vec::new())));

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"RECORDS 0\r\n");
    }

    #[tokio::test]
    async fn test_connection_malformed_request_gets_error() {
        let (dispatcher, queue) = dispatcher_with_queue();

        let (outcome, reply) = exchange(&dispatcher, b"READ\n").await;
        assert!(matches!(outcome, Some(Response::Error(_))));
        assert!(reply.starts_with(b"ERROR "));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_connection_closed_without_request() {
        let (dispatcher, queue) = dispatcher_with_queue();
        let (client, server) = duplex(64);
        drop(client);

        let outcome = dispatcher.handle_connection(server).await.unwrap();
        assert_eq!(outcome, None);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_connection_pending_job_dropped_on_close() {
        let (dispatcher, queue) = dispatcher_with_queue();
        let (mut client, server) = duplex(4096);
        client.write_all(b"READ_ALL\n").await.unwrap();

        let handler = tokio::spawn(async move { dispatcher.handle_connection(server).await });

        while queue.is_empty() {
            tokio::task::yield_now().await;
        }
        queue.close();

        let outcome = handler.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            Some(Response::Error(VaultError::QueueClosed.to_string()))
        );
    }
}
