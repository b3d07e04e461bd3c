//! WorkVault - a record server built on a bounded-concurrency work pipeline
//!
//! Requests flow one way through the crate:
//! - `dispatcher` reads one request per TCP connection and parses it
//! - `queue` hands parsed items from dispatchers to workers in FIFO order
//! - `worker` threads execute items against the record `store`
//! - the worker's `Response` travels back to the dispatcher over a reply channel

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod journal;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod store;
pub mod worker;

pub use client::Client;
pub use dispatcher::Dispatcher;
pub use error::{Result, VaultError};
pub use protocol::{parse_request, Operation, Response, WorkItem};
pub use queue::WorkQueue;
pub use server::{ServerConfig, VaultServer};
pub use store::{MemoryStore, Record, RecordStore};
pub use worker::{Job, WorkerPool};
