//! Line-oriented wire codec
//!
//! Requests and replies are blocks of `Key: Value` lines terminated by an
//! empty line. The decoder is fed whatever bytes the socket produced and
//! yields completed frames; partial blocks stay buffered until more bytes
//! arrive, so it never waits on a short read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::warn;

use crate::action::Action;
use crate::error::{AmiError, AmiResult};
use crate::record::{Record, ACTION_ID, OUTPUT};

const CRLF: &[u8] = b"\r\n";

/// A decoded unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The single greeting line sent by the switch after accept
    Banner(String),
    /// One blank-line-terminated block
    Record(Record),
}

/// Default cap on bytes buffered while waiting for a block terminator
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Incremental decoder state
///
/// # Examples
///
/// ```rust
/// use ispbx_ami_core::{AmiCodec, Frame};
///
/// let mut codec = AmiCodec::new();
/// codec.feed(b"Asterisk Call Manager/5.0.1\r\nResponse: Success\r\n").unwrap();
/// assert!(matches!(codec.next_frame(), Some(Frame::Banner(_))));
/// // The block is not complete until its empty line arrives
/// assert_eq!(codec.next_frame(), None);
///
/// codec.feed(b"Ping: Pong\r\n\r\n").unwrap();
/// match codec.next_frame() {
///     Some(Frame::Record(record)) => assert_eq!(record.get("Ping"), Some("Pong")),
///     other => panic!("unexpected {:?}", other),
/// }
/// ```
#[derive(Debug)]
pub struct AmiCodec {
    buf: BytesMut,
    expect_banner: bool,
    /// Bytes of `buf` already known to hold no terminator; always a line start
    scanned: usize,
    max_buffered: usize,
}

impl AmiCodec {
    /// Decoder for a client session: the first line is the banner
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            expect_banner: true,
            scanned: 0,
            max_buffered: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Decoder for streams without a greeting line
    pub fn without_banner() -> Self {
        Self {
            expect_banner: false,
            ..Self::new()
        }
    }

    /// Cap the bytes a single unterminated frame may occupy
    pub fn with_max_buffered(mut self, max: usize) -> Self {
        self.max_buffered = max;
        self
    }

    /// Append newly received bytes.
    ///
    /// Fails with [`AmiError::LinkDown`] when the pending frame would grow
    /// past the configured cap; the stream cannot be resynchronised after
    /// that, so the session has to be dropped.
    pub fn feed(&mut self, data: &[u8]) -> AmiResult<()> {
        if self.buf.len() + data.len() > self.max_buffered {
            return Err(AmiError::link_down(format!(
                "frame exceeds {} buffered bytes",
                self.max_buffered
            )));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Number of bytes waiting for a block terminator
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next completed frame, or `None` until more bytes are fed
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.expect_banner {
            let pos = self.buf.iter().position(|b| *b == b'\n')?;
            let line = self.buf.split_to(pos + 1);
            self.expect_banner = false;
            return Some(Frame::Banner(trim_line(&line)));
        }

        // Blank lines between blocks carry nothing
        if self.scanned == 0 {
            loop {
                if self.buf.starts_with(b"\r\n") {
                    self.buf.advance(2);
                } else if self.buf.starts_with(b"\n") {
                    self.buf.advance(1);
                } else {
                    break;
                }
            }
        }

        match find_block_end(&self.buf, self.scanned) {
            Ok(end) => {
                self.scanned = 0;
                let block = self.buf.split_to(end);
                Some(Frame::Record(parse_block(&block)))
            }
            Err(resume) => {
                self.scanned = resume;
                None
            }
        }
    }
}

impl Default for AmiCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Offset just past the empty line closing the first block, scanning from
/// the line start `from`. Without a terminator, returns the start of the
/// last incomplete line so the next call resumes there.
fn find_block_end(buf: &[u8], from: usize) -> Result<usize, usize> {
    let mut start = from;
    while let Some(i) = buf[start..].iter().position(|b| *b == b'\n') {
        let line_end = start + i;
        let line = strip_cr(&buf[start..line_end]);
        if line.is_empty() {
            return Ok(line_end + 1);
        }
        start = line_end + 1;
    }
    Err(start)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn trim_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    String::from_utf8_lossy(strip_cr(line)).into_owned()
}

fn parse_block(block: &[u8]) -> Record {
    let mut record = Record::new();
    let mut output: Vec<String> = Vec::new();

    for raw in block.split(|b| *b == b'\n') {
        let raw = strip_cr(raw);
        if raw.is_empty() {
            continue;
        }
        let line = String::from_utf8_lossy(raw);
        match line.find(':') {
            Some(idx) if idx > 0 => {
                let key = line[..idx].trim();
                let value = line[idx + 1..].trim_start();
                record.push(key, value);
            }
            _ => output.push(line.into_owned()),
        }
    }

    if !output.is_empty() {
        record.push(OUTPUT, output.join("\n"));
    }
    record
}

/// Serialize an action, stamping it with `action_id` when given
pub fn encode(action: &Action, action_id: Option<&str>) -> Bytes {
    let mut out = BytesMut::with_capacity(128 + action.config_ops().len() * 96);
    put_line(&mut out, "Action", action.name());
    if let Some(id) = action_id {
        put_line(&mut out, ACTION_ID, id);
    }
    for (key, value) in action.params() {
        put_line(&mut out, key, value);
    }
    for (index, op) in action.config_ops().iter().enumerate() {
        let suffix = format!("{:06}", index);
        put_line(&mut out, &format!("Action-{}", suffix), op.verb.as_str());
        put_line(&mut out, &format!("Cat-{}", suffix), &op.category);
        if let Some(var) = &op.variable {
            put_line(&mut out, &format!("Var-{}", suffix), var);
        }
        if let Some(value) = &op.value {
            put_line(&mut out, &format!("Value-{}", suffix), value);
        }
        if let Some(filter) = &op.match_filter {
            put_line(&mut out, &format!("Match-{}", suffix), filter);
        }
        if let Some(options) = &op.options {
            put_line(&mut out, &format!("Options-{}", suffix), options);
        }
    }
    out.put_slice(CRLF);
    out.freeze()
}

/// Serialize a record as a block (used for replies and notifications)
pub fn encode_record(record: &Record) -> Bytes {
    let mut out = BytesMut::with_capacity(64 * record.len().max(1));
    for (key, value) in record.iter() {
        put_line(&mut out, key, value);
    }
    out.put_slice(CRLF);
    out.freeze()
}

fn put_line(out: &mut BytesMut, key: &str, value: &str) {
    out.put_slice(key.as_bytes());
    out.put_slice(b": ");
    if value.contains(['\r', '\n']) {
        warn!(key, "Line break in value replaced by a space");
        out.put_slice(value.replace(['\r', '\n'], " ").as_bytes());
    } else {
        out.put_slice(value.as_bytes());
    }
    out.put_slice(CRLF);
}
