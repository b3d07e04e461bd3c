//! Request parser and reply encoding for the WorkVault wire protocol
//!
//! Requests are a single text line: a case-sensitive keyword optionally
//! followed by a record id and/or payload. Parsing uses nom combinators over
//! the raw bytes; the returned `WorkItem` owns copies of anything it needs.

use crate::error::{Result, VaultError};
use crate::store::Record;
use nom::{
    bytes::complete::take_till1,
    character::complete::{space0, space1, u64 as record_id},
    combinator::{all_consuming, map, rest, verify},
    error::{Error, ErrorKind},
    sequence::{preceded, terminated, tuple},
    IResult,
};
use std::fmt;

/// Operations supported by the WorkVault protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    ReadAll,
    Update,
    Delete,
}

impl Operation {
    /// Wire keyword for this operation
    pub fn keyword(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Read => "READ",
            Operation::ReadAll => "READ_ALL",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// One parsed client request awaiting execution.
///
/// Which of `id` and `payload` are present is fixed by the operation, so items
/// are only built through the per-operation constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    operation: Operation,
    id: Option<u64>,
    payload: Option<Vec<u8>>,
}

impl WorkItem {
    pub fn create(payload: Vec<u8>) -> Self {
        Self {
            operation: Operation::Create,
            id: None,
            payload: Some(payload),
        }
    }

    pub fn read(id: u64) -> Self {
        Self {
            operation: Operation::Read,
            id: Some(id),
            payload: None,
        }
    }

    pub fn read_all() -> Self {
        Self {
            operation: Operation::ReadAll,
            id: None,
            payload: None,
        }
    }

    pub fn update(id: u64, payload: Vec<u8>) -> Self {
        Self {
            operation: Operation::Update,
            id: Some(id),
            payload: Some(payload),
        }
    }

    pub fn delete(id: u64) -> Self {
        Self {
            operation: Operation::Delete,
            id: Some(id),
            payload: None,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Split into owned parts for execution
    pub fn into_parts(self) -> (Operation, Option<u64>, Option<Vec<u8>>) {
        (self.operation, self.id, self.payload)
    }
}

/// Replies written back to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    Created(u64),
    Value(Vec<u8>),
    Records(Vec<Record>),
    NotFound,
    Error(String),
}

impl Response {
    /// Serialize response to bytes for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::Ok => b"OK\r\n".to_vec(),
            Response::Created(id) => format!("CREATED {}\r\n", id).into_bytes(),
            Response::Value(payload) => {
                let mut out = b"VALUE ".to_vec();
                out.extend_from_slice(payload);
                out.extend_from_slice(b"\r\n");
                out
            }
            Response::Records(records) => {
                let mut out = format!("RECORDS {}\r\n", records.len()).into_bytes();
                for record in records {
                    out.extend_from_slice(format!("{} ", record.id).as_bytes());
                    out.extend_from_slice(&record.payload);
                    out.extend_from_slice(b"\r\n");
                }
                out
            }
            Response::NotFound => b"NOT_FOUND\r\n".to_vec(),
            Response::Error(e) => format!("ERROR {}\r\n", e).into_bytes(),
        }
    }
}

/// Cut a raw read buffer down to its first request line.
///
/// The line ends at the first newline or NUL byte; a trailing carriage return
/// is dropped.
pub fn frame_request(buffer: &[u8]) -> &[u8] {
    let end = buffer
        .iter()
        .position(|&b| b == b'\n' || b == 0)
        .unwrap_or(buffer.len());
    let line = &buffer[..end];
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Parse one request from a raw buffer
pub fn parse_request(buffer: &[u8]) -> Result<WorkItem> {
    let line = frame_request(buffer);
    if line.is_empty() {
        return Err(VaultError::MalformedRequest("empty request".to_string()));
    }

    let (_, item) = all_consuming(request)(line)?;
    Ok(item)
}

fn request(input: &[u8]) -> IResult<&[u8], WorkItem> {
    let (input, operation) = keyword(input)?;

    match operation {
        // Anything after READ_ALL is ignored.
        Operation::ReadAll => Ok((&input[input.len()..], WorkItem::read_all())),
        Operation::Create => map(preceded(space1, payload), |p: &[u8]| {
            WorkItem::create(p.to_vec())
        })(input),
        Operation::Read => {
            map(preceded(space1, terminated(record_id, space0)), WorkItem::read)(input)
        }
        Operation::Delete => {
            map(preceded(space1, terminated(record_id, space0)), WorkItem::delete)(input)
        }
        Operation::Update => map(
            tuple((space1, record_id, space1, payload)),
            |(_, id, _, p): (_, u64, _, &[u8])| WorkItem::update(id, p.to_vec()),
        )(input),
    }
}

/// Match the leading token against the closed keyword set
fn keyword(input: &[u8]) -> IResult<&[u8], Operation> {
    let (remaining, word) = take_till1(|c: u8| c == b' ')(input)?;

    let operation = match word {
        b"CREATE" => Operation::Create,
        b"READ" => Operation::Read,
        b"READ_ALL" => Operation::ReadAll,
        b"UPDATE" => Operation::Update,
        b"DELETE" => Operation::Delete,
        _ => return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag))),
    };

    Ok((remaining, operation))
}

fn payload(input: &[u8]) -> IResult<&[u8], &[u8]> {
    verify(rest, |p: &[u8]| !p.is_empty())(input)
}
