//! WorkVault TCP server
//!
//! Wires the pipeline together: a listening socket feeding the dispatcher,
//! one shared work queue, and a worker pool executing against the record
//! store. Shutdown stops the accept loop, closes the queue and joins every
//! worker.

use crate::{
    dispatcher::{Dispatcher, DEFAULT_MAX_REQUEST_SIZE},
    error::{Result, VaultError},
    journal::Journal,
    queue::WorkQueue,
    store::{MemoryStore, RecordStore},
    worker::{Job, WorkerPool},
};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::{
    net::{TcpListener, TcpSocket},
    sync::broadcast,
};
use tracing::info;

/// Pending-connection queue depth of the listening socket
pub const LISTEN_BACKLOG: u32 = 128;

/// WorkVault server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub workers: usize,
    /// `None` leaves the work queue unbounded
    pub queue_capacity: Option<usize>,
    pub max_request_size: usize,
    pub read_timeout: Option<Duration>,
    /// `None` keeps records in memory only
    pub journal_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Listen on every local IPv4 address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            workers: 4,
            queue_capacity: None,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            read_timeout: Some(Duration::from_secs(5)),
            journal_path: None,
        }
    }
}

/// WorkVault TCP server
pub struct VaultServer {
    config: ServerConfig,
    store: Arc<MemoryStore>,
    queue: Arc<WorkQueue<Job>>,
    dispatcher: Dispatcher,
    workers: Mutex<Option<WorkerPool>>,
    shutdown_tx: broadcast::Sender<()>,
    // Held from construction so a shutdown requested before `serve` is kept.
    shutdown_rx: Mutex<Option<broadcast::Receiver<()>>>,
}

impl VaultServer {
    /// Build the store, queue and worker pool
    pub fn new(config: ServerConfig) -> Result<Self> {
        let store = match &config.journal_path {
            Some(path) => {
                let journal = Arc::new(Journal::open(path)?);
                let store = MemoryStore::with_journal(Arc::clone(&journal));
                let replayed = store.restore_from_journal()?;
                info!(
                    journal = %journal.path().display(),
                    entries = replayed,
                    records = store.len()?,
                    "restored records from journal"
                );
                store
            }
            None => MemoryStore::new(),
        };
        let store = Arc::new(store);

        let queue = Arc::new(match config.queue_capacity {
            Some(capacity) => WorkQueue::bounded(capacity)?,
            None => WorkQueue::new(),
        });

        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            config.max_request_size,
            config.read_timeout,
        )?;

        let workers = WorkerPool::spawn(
            config.workers,
            Arc::clone(&queue),
            Arc::clone(&store) as Arc<dyn RecordStore>,
        )?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(Self {
            config,
            store,
            queue,
            dispatcher,
            workers: Mutex::new(Some(workers)),
            shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Number of requests waiting for a worker
    pub fn pending(&self) -> usize {
        self.queue.size()
    }

    /// Bind the configured port and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener until shutdown, then
    /// stop the worker pool
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let shutdown_rx = self
            .shutdown_rx
            .lock()
            .map_err(|_| VaultError::Server("shutdown receiver lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| VaultError::Server("server is already running".to_string()))?;

        info!(
            addr = %listener.local_addr()?,
            workers = self.config.workers,
            "WorkVault server listening"
        );

        let served = self.dispatcher.serve(listener, shutdown_rx).await;
        self.stop_workers().await?;

        info!("Server stopped");
        served
    }

    fn bind(&self) -> Result<TcpListener> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(self.config.bind_addr())?;
        Ok(socket.listen(LISTEN_BACKLOG)?)
    }

    async fn stop_workers(&self) -> Result<()> {
        let pool = self
            .workers
            .lock()
            .map_err(|_| VaultError::Server("worker pool lock poisoned".to_string()))?
            .take();

        if let Some(pool) = pool {
            tokio::task::spawn_blocking(move || pool.shutdown())
                .await
                .map_err(|e| VaultError::Server(format!("worker shutdown task failed: {}", e)))??;
        }
        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown_tx.send(()).map_err(|_| {
            VaultError::Server("Failed to send shutdown signal".to_string())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            workers: 2,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(config.queue_capacity, None);
    }

    #[test]
    fn test_server_keeps_its_config() {
        let config = ServerConfig {
            workers: 3,
            queue_capacity: Some(16),
            ..test_config()
        };
        let server = VaultServer::new(config).unwrap();

        assert_eq!(server.config().workers, 3);
        assert_eq!(server.config().queue_capacity, Some(16));
        assert_eq!(server.queue.capacity(), Some(16));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ServerConfig {
            workers: 0,
            ..test_config()
        };
        assert!(matches!(
            VaultServer::new(config),
            Err(VaultError::InvalidArgument(_))
        ));

        let config = ServerConfig {
            queue_capacity: Some(0),
            ..test_config()
        };
        assert!(matches!(
            VaultServer::new(config),
            Err(VaultError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_before_serve_stops_immediately() {
        let server = VaultServer::new(test_config()).unwrap();
        server.shutdown().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        server.serve(listener).await.unwrap();

        assert_eq!(server.pending(), 0);
        assert!(server.queue.is_closed());
    }

    #[test]
    fn test_server_restores_journal() {
        let temp_file = NamedTempFile::new().unwrap();
        let config = ServerConfig {
            journal_path: Some(temp_file.path().to_path_buf()),
            ..test_config()
        };

        {
            let server = VaultServer::new(config.clone()).unwrap();
            server.store().create(b"kept".to_vec()).unwrap();
        }

        let server = VaultServer::new(config).unwrap();
        assert_eq!(server.store().read(1).unwrap(), b"kept");
    }
}
