//! Wire format of packed signature requests.
//!
//! ```text
//! gzip(
//!     segment*          u32 length (big endian) + bytes, length <= segment size
//!     terminator        u32 zero
//! )
//! ```
//!
//! The concatenated segment payload is a `u16` format version followed by
//! records, each a `u8` tag, a `u32` length and a JSON body. Segments are
//! full except the last non-empty one.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RequestError;
use crate::authority::{StatementAuthority, StatementAuthoritySignature};
use crate::constants::PACKED_REQUEST_VERSION;
use crate::delegate::{DelegateAuthorizer, DelegateTreeNode};
use crate::person::Person;
use crate::signatory::Signatory;
use crate::{Result, Statement};

const TAG_STATEMENT: u8 = 1;
const TAG_STATEMENT_AUTHORITY: u8 = 2;
const TAG_PERSON: u8 = 3;
const TAG_REQUESTED_STATEMENT: u8 = 4;
const TAG_DELEGATE_TREE_NODE: u8 = 5;

/// A person with the public signatory its signature is checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub person: Person,
    pub signatory: Signatory,
}

/// An authority with its signatures and the signatories that made them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    pub authority: StatementAuthority,
    pub signatures: Vec<StatementAuthoritySignature>,
    pub signatories: Vec<Signatory>,
}

/// A delegate tree node with its authorizers and their authorizing signatories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateNodeRecord {
    pub node: DelegateTreeNode,
    pub authorizers: Vec<DelegateAuthorizer>,
    pub signatories: Vec<Signatory>,
}

/// One record of a packed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackedRecord {
    Statement(Statement),
    StatementAuthority(AuthorityRecord),
    Person(PersonRecord),
    /// A statement the remote signer is asked to sign.
    RequestedStatement(Uuid),
    DelegateTreeNode(DelegateNodeRecord),
}

impl PackedRecord {
    fn tag(&self) -> u8 {
        match self {
            PackedRecord::Statement(_) => TAG_STATEMENT,
            PackedRecord::StatementAuthority(_) => TAG_STATEMENT_AUTHORITY,
            PackedRecord::Person(_) => TAG_PERSON,
            PackedRecord::RequestedStatement(_) => TAG_REQUESTED_STATEMENT,
            PackedRecord::DelegateTreeNode(_) => TAG_DELEGATE_TREE_NODE,
        }
    }

    /// Short name of the record type.
    pub fn kind(&self) -> &'static str {
        match self {
            PackedRecord::Statement(_) => "Statement",
            PackedRecord::StatementAuthority(_) => "StatementAuthority",
            PackedRecord::Person(_) => "Person",
            PackedRecord::RequestedStatement(_) => "RequestedStatement",
            PackedRecord::DelegateTreeNode(_) => "DelegateTreeNode",
        }
    }

    /// UUID of the statement, person or delegate tree owner the record describes.
    pub fn subject(&self) -> Uuid {
        match self {
            PackedRecord::Statement(statement) => statement.uuid,
            PackedRecord::StatementAuthority(record) => record.authority.statement_uuid,
            PackedRecord::Person(record) => record.person.uuid,
            PackedRecord::RequestedStatement(uuid) => *uuid,
            PackedRecord::DelegateTreeNode(record) => record.node.statement_uuid,
        }
    }

    fn body(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            PackedRecord::Statement(statement) => serde_json::to_vec(statement),
            PackedRecord::StatementAuthority(record) => serde_json::to_vec(record),
            PackedRecord::Person(record) => serde_json::to_vec(record),
            PackedRecord::RequestedStatement(uuid) => serde_json::to_vec(uuid),
            PackedRecord::DelegateTreeNode(record) => serde_json::to_vec(record),
        }
    }

    fn from_body(tag: u8, body: &[u8]) -> std::result::Result<Self, RequestError> {
        let record = match tag {
            TAG_STATEMENT => serde_json::from_slice(body).map(PackedRecord::Statement),
            TAG_STATEMENT_AUTHORITY => {
                serde_json::from_slice(body).map(PackedRecord::StatementAuthority)
            }
            TAG_PERSON => serde_json::from_slice(body).map(PackedRecord::Person),
            TAG_REQUESTED_STATEMENT => {
                serde_json::from_slice(body).map(PackedRecord::RequestedStatement)
            }
            TAG_DELEGATE_TREE_NODE => {
                serde_json::from_slice(body).map(PackedRecord::DelegateTreeNode)
            }
            other => return Err(RequestError::malformed(format!("unknown record tag {other}"))),
        };
        record.map_err(|e| RequestError::malformed(format!("record with tag {tag}: {e}")))
    }
}

/// Splits everything written into length-prefixed segments of `segment_size`.
struct SegmentWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    segment_size: usize,
}

impl<W: Write> SegmentWriter<W> {
    fn new(inner: W, segment_size: usize) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(segment_size.min(64 * 1024)),
            segment_size,
        }
    }

    fn write_segment(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let len = u32::try_from(self.buffer.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "segment exceeds u32"))?;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    /// Write the pending segment and the terminator.
    fn finish(mut self) -> io::Result<W> {
        self.write_segment()?;
        self.inner.write_all(&0u32.to_be_bytes())?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for SegmentWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.segment_size - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == self.segment_size {
            self.write_segment()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reads the payload of a segmented stream up to its terminator.
struct SegmentReader<R: Read> {
    inner: R,
    remaining: usize,
    finished: bool,
}

impl<R: Read> SegmentReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            finished: false,
        }
    }

    /// Fail unless the terminator was reached and nothing follows it.
    fn finish(mut self) -> std::result::Result<(), RequestError> {
        if !self.finished || self.remaining != 0 {
            return Err(RequestError::malformed("records end inside a segment"));
        }
        let mut peek = [0u8; 1];
        match self.inner.read(&mut peek) {
            Ok(0) => Ok(()),
            Ok(_) => Err(RequestError::malformed("data after the terminating segment")),
            Err(e) => Err(RequestError::malformed(e.to_string())),
        }
    }
}

impl<R: Read> Read for SegmentReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.remaining == 0 {
            if self.finished {
                return Ok(0);
            }
            let mut len = [0u8; 4];
            self.inner.read_exact(&mut len)?;
            match u32::from_be_bytes(len) {
                0 => self.finished = true,
                len => self.remaining = len as usize,
            }
        }
        let max = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.remaining -= n;
        Ok(n)
    }
}

fn malformed(err: io::Error) -> RequestError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => RequestError::malformed("truncated stream"),
        _ => RequestError::malformed(err.to_string()),
    }
}

/// Encode records into the packed wire format.
pub fn encode(records: &[PackedRecord], segment_size: usize) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut writer = SegmentWriter::new(encoder, segment_size);
    writer.write_all(&PACKED_REQUEST_VERSION.to_be_bytes())?;
    for record in records {
        let body = record.body()?;
        let len = u32::try_from(body.len())
            .map_err(|_| RequestError::malformed("record body exceeds u32"))?;
        writer.write_all(&[record.tag()])?;
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(&body)?;
    }
    Ok(writer.finish()?.finish()?)
}

/// Decode the packed wire format into records.
pub fn decode(data: &[u8]) -> Result<Vec<PackedRecord>> {
    let mut reader = SegmentReader::new(GzDecoder::new(data));
    let mut version = [0u8; 2];
    reader.read_exact(&mut version).map_err(malformed)?;
    let version = u16::from_be_bytes(version);
    if version != PACKED_REQUEST_VERSION {
        return Err(RequestError::malformed(format!("unsupported format version {version}")).into());
    }

    let mut records = Vec::new();
    loop {
        let mut tag = [0u8; 1];
        if reader.read(&mut tag).map_err(malformed)? == 0 {
            break;
        }
        let mut len = [0u8; 4];
        reader.read_exact(&mut len).map_err(malformed)?;
        let len = u64::from(u32::from_be_bytes(len));
        let mut body = Vec::new();
        (&mut reader)
            .take(len)
            .read_to_end(&mut body)
            .map_err(malformed)?;
        if body.len() as u64 != len {
            return Err(RequestError::malformed("truncated record").into());
        }
        records.push(PackedRecord::from_body(tag[0], &body)?);
    }
    reader.finish()?;
    Ok(records)
}
