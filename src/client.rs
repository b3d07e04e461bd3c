//! Client library for connecting to a WorkVault server
//!
//! The server answers exactly one request per connection, so every call opens
//! a fresh connection, writes one request line and reads the reply until the
//! server closes.

use crate::error::{Result, VaultError};
use crate::protocol::{Response, WorkItem};
use crate::store::Record;
use std::str;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Client for a WorkVault server
#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Check that the server accepts connections
    pub async fn ping(&self) -> Result<()> {
        TcpStream::connect(&self.addr).await?;
        Ok(())
    }

    /// Send one raw request line and return the decoded reply
    pub async fn send_raw(&self, request: &[u8]) -> Result<Response> {
        let mut stream = TcpStream::connect(&self.addr).await?;

        // The server takes a single read as the whole request, so the line
        // goes out in one write.
        let mut line = request.to_vec();
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }
        stream.write_all(&line).await?;
        stream.flush().await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        parse_response(&reply)
    }

    async fn send(&self, item: &WorkItem) -> Result<Response> {
        self.send_raw(&encode_request(item)?).await
    }

    /// Store a payload, returning the new record id
    pub async fn create(&self, payload: &[u8]) -> Result<u64> {
        match self.send(&WorkItem::create(payload.to_vec())).await? {
            Response::Created(id) => Ok(id),
            Response::Error(e) => Err(VaultError::Server(e)),
            other => Err(unexpected("CREATE", &other)),
        }
    }

    /// Fetch a record's payload
    pub async fn read(&self, id: u64) -> Result<Option<Vec<u8>>> {
        match self.send(&WorkItem::read(id)).await? {
            Response::Value(payload) => Ok(Some(payload)),
            Response::NotFound => Ok(None),
            Response::Error(e) => Err(VaultError::Server(e)),
            other => Err(unexpected("READ", &other)),
        }
    }

    /// Fetch every record
    pub async fn read_all(&self) -> Result<Vec<Record>> {
        match self.send(&WorkItem::read_all()).await? {
            Response::Records(records) => Ok(records),
            Response::Error(e) => Err(VaultError::Server(e)),
            other => Err(unexpected("READ_ALL", &other)),
        }
    }

    /// Replace a record's payload; `false` if no such record
    pub async fn update(&self, id: u64, payload: &[u8]) -> Result<bool> {
        match self.send(&WorkItem::update(id, payload.to_vec())).await? {
            Response::Ok => Ok(true),
            Response::NotFound => Ok(false),
            Response::Error(e) => Err(VaultError::Server(e)),
            other => Err(unexpected("UPDATE", &other)),
        }
    }

    /// Delete a record; `false` if no such record
    pub async fn delete(&self, id: u64) -> Result<bool> {
        match self.send(&WorkItem::delete(id)).await? {
            Response::Ok => Ok(true),
            Response::NotFound => Ok(false),
            Response::Error(e) => Err(VaultError::Server(e)),
            other => Err(unexpected("DELETE", &other)),
        }
    }
}

fn unexpected(operation: &str, response: &Response) -> VaultError {
    VaultError::Client(format!("Unexpected response for {}: {:?}", operation, response))
}

/// Render a work item as a request line
pub fn encode_request(item: &WorkItem) -> Result<Vec<u8>> {
    let mut line = item.operation().keyword().as_bytes().to_vec();

    if let Some(id) = item.id() {
        line.extend_from_slice(format!(" {}", id).as_bytes());
    }

    if let Some(payload) = item.payload() {
        if payload.iter().any(|&b| b == b'\n' || b == b'\r' || b == 0) {
            return Err(VaultError::Client(
                "payload may not contain line breaks or NUL bytes".to_string(),
            ));
        }
        line.push(b' ');
        line.extend_from_slice(payload);
    }

    line.push(b'\n');
    Ok(line)
}

/// Decode a complete server reply
pub fn parse_response(reply: &[u8]) -> Result<Response> {
    let mut lines = reply
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line));
    let status = lines.next().unwrap_or(&[]);

    if status == b"OK" {
        Ok(Response::Ok)
    } else if status == b"NOT_FOUND" {
        Ok(Response::NotFound)
    } else if let Some(id) = status.strip_prefix(b"CREATED ") {
        Ok(Response::Created(parse_number(id)?))
    } else if let Some(payload) = status.strip_prefix(b"VALUE ") {
        Ok(Response::Value(payload.to_vec()))
    } else if let Some(count) = status.strip_prefix(b"RECORDS ") {
        let count: usize = parse_number(count)?;
        let records = lines
            .by_ref()
            .take(count)
            .map(parse_record)
            .collect::<Result<Vec<_>>>()?;
        if records.len() != count {
            return Err(VaultError::Client(format!(
                "expected {} records, got {}",
                count,
                records.len()
            )));
        }
        Ok(Response::Records(records))
    } else if let Some(message) = status.strip_prefix(b"ERROR ") {
        Ok(Response::Error(String::from_utf8_lossy(message).into_owned()))
    } else {
        Err(VaultError::Client(format!(
            "Unknown response format: {}",
            String::from_utf8_lossy(status)
        )))
    }
}

fn parse_record(line: &[u8]) -> Result<Record> {
    let split = line
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| VaultError::Client("record line without payload".to_string()))?;

    Ok(Record {
        id: parse_number(&line[..split])?,
        payload: line[split + 1..].to_vec(),
    })
}

fn parse_number<N: str::FromStr>(digits: &[u8]) -> Result<N> {
    str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            VaultError::Client(format!(
                "invalid number in response: {}",
                String::from_utf8_lossy(digits)
            ))
        })
}
