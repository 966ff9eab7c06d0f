//! Streaming command log reader.
//!
//! Reads records one by one through a bounded chunk buffer while tracking
//! the absolute byte cursor, so every value's [`Position`] is known without
//! holding the whole log in memory.

use crate::entity::{Tag, TagKind, TagSet, TagValue};
use crate::error::{CoreError, CoreResult};
use crate::key::PrimaryKey;
use crate::types::Position;
use crate::wal::command::{
    unescape, Command, CommandKind, BULK_PREFIX, PADDING, RECORD_PREFIX, SIMPLE_PREFIX,
};
use tagdb_storage::StorageBackend;
use tracing::debug;

/// Read chunk size.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A parsed record and where it lies in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Absolute offset of the record header.
    pub offset: u64,
    /// Record length in bytes, excluding padding.
    pub len: u64,
    /// The command.
    pub command: Command,
    /// Position of the value bytes of a `set`.
    pub value_position: Option<Position>,
}

/// Iterator over the records of a log.
///
/// Structural problems yield [`CoreError::CommandInvalid`], a record cut
/// short yields [`CoreError::UnexpectedEof`]. After the first error the
/// iterator is finished.
///
/// With `load_values` disabled, `set` values are skipped and returned empty;
/// their [`LogRecord::value_position`] is still filled in.
pub struct CommandReader<'a> {
    backend: &'a dyn StorageBackend,
    size: u64,
    buf: Vec<u8>,
    buf_start: u64,
    pos: usize,
    line: u64,
    load_values: bool,
    padding: u64,
    finished: bool,
}

impl<'a> CommandReader<'a> {
    /// Creates a reader over the whole of `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SourceFileReadFailed`] if the size is unavailable.
    pub fn new(backend: &'a dyn StorageBackend, load_values: bool) -> CoreResult<Self> {
        let size = backend.size().map_err(CoreError::SourceFileReadFailed)?;
        Ok(Self {
            backend,
            size,
            buf: Vec::new(),
            buf_start: 0,
            pos: 0,
            line: 0,
            load_values,
            padding: 0,
            finished: false,
        })
    }

    /// Absolute offset of the next unread byte.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.buf_start + self.pos as u64
    }

    /// Number of protocol lines consumed so far.
    #[must_use]
    pub fn line(&self) -> u64 {
        self.line
    }

    /// Number of padding bytes skipped so far.
    #[must_use]
    pub fn padding_skipped(&self) -> u64 {
        self.padding
    }

    fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Reads the next chunk. Returns false at end of log.
    fn fill(&mut self) -> CoreResult<bool> {
        let end = self.buf_start + self.buf.len() as u64;
        if end >= self.size {
            return Ok(false);
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.buf_start += self.pos as u64;
            self.pos = 0;
        }
        let want = (self.size - end).min(READ_CHUNK_SIZE as u64) as usize;
        let data = self
            .backend
            .read_at(end, want)
            .map_err(CoreError::SourceFileReadFailed)?;
        self.buf.extend_from_slice(&data);
        Ok(true)
    }

    fn ensure(&mut self, n: usize) -> CoreResult<bool> {
        while self.available() < n {
            if !self.fill()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn invalid(&self, message: impl Into<String>, offset: u64) -> CoreError {
        CoreError::command_invalid(message, self.line, offset)
    }

    /// Skips padding. Returns false at end of log.
    fn skip_padding(&mut self) -> CoreResult<bool> {
        loop {
            if !self.ensure(1)? {
                return Ok(false);
            }
            let run = self.buf[self.pos..]
                .iter()
                .take_while(|b| **b == PADDING)
                .count();
            if run == 0 {
                return Ok(true);
            }
            self.pos += run;
            self.padding += run as u64;
        }
    }

    /// Reads one CRLF-terminated line, returning its offset and body.
    fn read_line(&mut self) -> CoreResult<(u64, Vec<u8>)> {
        let start = self.cursor();
        let mut scanned = 0;
        loop {
            let window = &self.buf[self.pos + scanned..];
            if let Some(i) = window.windows(2).position(|w| w == b"\r\n") {
                let end = self.pos + scanned + i;
                let body = self.buf[self.pos..end].to_vec();
                self.pos = end + 2;
                self.line += 1;
                return Ok((start, body));
            }
            scanned = self.available().saturating_sub(1);
            if !self.fill()? {
                return Err(CoreError::UnexpectedEof { offset: start });
            }
        }
    }

    fn read_exact(&mut self, n: usize) -> CoreResult<Vec<u8>> {
        let start = self.cursor();
        if !self.ensure(n)? {
            return Err(CoreError::UnexpectedEof { offset: start });
        }
        let bytes = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(bytes)
    }

    fn skip_exact(&mut self, n: u64) -> CoreResult<()> {
        let start = self.cursor();
        let end = start
            .checked_add(n)
            .filter(|end| *end <= self.size)
            .ok_or(CoreError::UnexpectedEof { offset: start })?;
        if (self.available() as u64) >= n {
            self.pos += n as usize;
        } else {
            self.buf.clear();
            self.buf_start = end;
            self.pos = 0;
        }
        Ok(())
    }

    fn expect_crlf(&mut self) -> CoreResult<()> {
        let offset = self.cursor();
        let bytes = self.read_exact(2)?;
        if bytes != b"\r\n" {
            return Err(self.invalid("missing CRLF after bulk payload", offset));
        }
        self.line += 1;
        Ok(())
    }

    fn parse_number<T: std::str::FromStr>(
        &self,
        digits: &[u8],
        what: &str,
        offset: u64,
    ) -> CoreResult<T> {
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<T>().ok())
            .ok_or_else(|| {
                self.invalid(
                    format!("invalid {what} {:?}", String::from_utf8_lossy(digits)),
                    offset,
                )
            })
    }

    /// Reads a `${len}` field. Returns the payload position and, if
    /// `load` is set, the bytes.
    fn read_bulk(&mut self, load: bool) -> CoreResult<(Position, Vec<u8>)> {
        let (offset, header) = self.read_line()?;
        if header.first() != Some(&BULK_PREFIX) {
            return Err(self.invalid("expected bulk field", offset));
        }
        let len: u64 = self.parse_number(&header[1..], "bulk length", offset)?;
        let start = self.cursor();
        if len > self.size.saturating_sub(start) {
            return Err(CoreError::UnexpectedEof { offset: start });
        }
        let position = Position::new(start, len);
        let bytes = if load {
            let n = usize::try_from(len)
                .map_err(|_| self.invalid("bulk field too large", offset))?;
            self.read_exact(n)?
        } else {
            self.skip_exact(len)?;
            Vec::new()
        };
        self.expect_crlf()?;
        Ok((position, bytes))
    }

    fn read_key(&mut self) -> CoreResult<PrimaryKey> {
        let offset = self.cursor();
        let (_, bytes) = self.read_bulk(true)?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| self.invalid("key is not valid UTF-8", offset))?;
        PrimaryKey::parse(raw).map_err(|err| self.invalid(err.to_string(), offset))
    }

    fn read_simple(&mut self) -> CoreResult<(u64, String)> {
        let (offset, line) = self.read_line()?;
        if line.first() != Some(&SIMPLE_PREFIX) {
            return Err(self.invalid("expected simple string field", offset));
        }
        let text = String::from_utf8(line[1..].to_vec())
            .map_err(|_| self.invalid("field is not valid UTF-8", offset))?;
        Ok((offset, text))
    }

    /// Parses `fn(name,literal)`.
    fn read_tag(&mut self) -> CoreResult<Tag> {
        let (offset, text) = self.read_simple()?;
        let open = text
            .find('(')
            .ok_or_else(|| self.invalid(format!("malformed tag field {text:?}"), offset))?;
        if !text.ends_with(')') {
            return Err(self.invalid(format!("malformed tag field {text:?}"), offset));
        }
        let kind = TagKind::from_function_name(text[..open].as_bytes()).ok_or_else(|| {
            self.invalid(format!("unknown tag function {:?}", &text[..open]), offset)
        })?;
        let body = &text[open + 1..text.len() - 1];
        let comma = body
            .find(',')
            .ok_or_else(|| self.invalid(format!("tag field without value {text:?}"), offset))?;
        let (name, literal) = (&body[..comma], &body[comma + 1..]);

        let value = match kind {
            TagKind::Bool => match literal {
                "true" => TagValue::Bool(true),
                "false" => TagValue::Bool(false),
                _ => {
                    return Err(self.invalid(format!("invalid bool literal {literal:?}"), offset))
                }
            },
            TagKind::Int => {
                TagValue::Int(self.parse_number(literal.as_bytes(), "int literal", offset)?)
            }
            TagKind::Float => {
                TagValue::Float(self.parse_number(literal.as_bytes(), "float literal", offset)?)
            }
            TagKind::Str => TagValue::Str(unescape(literal).ok_or_else(|| {
                self.invalid(format!("invalid escape in {literal:?}"), offset)
            })?),
        };
        Ok(Tag::new(name, value))
    }

    fn read_record(&mut self) -> CoreResult<Option<LogRecord>> {
        if !self.skip_padding()? {
            return Ok(None);
        }

        let (offset, header) = self.read_line()?;
        if header.first() != Some(&RECORD_PREFIX) {
            return Err(self.invalid("expected record header", offset));
        }
        let segments: u64 = self.parse_number(&header[1..], "segment count", offset)?;

        let (line_offset, name) = self.read_simple()?;
        let kind = CommandKind::from_name(name.as_bytes())
            .ok_or_else(|| self.invalid(format!("unknown command {name:?}"), line_offset))?;
        if !kind.accepts_segments(segments) {
            return Err(self.invalid(format!("{kind} cannot have {segments} segments"), offset));
        }

        let mut value_position = None;
        let command = match kind {
            CommandKind::Set => {
                let key = self.read_key()?;
                let (position, value) = self.read_bulk(self.load_values)?;
                value_position = Some(position);
                let mut tags = TagSet::new();
                for _ in 3..segments {
                    let field_offset = self.cursor();
                    let tag = self.read_tag()?;
                    tags.insert(tag)
                        .map_err(|err| self.invalid(err.to_string(), field_offset))?;
                }
                Command::Set { key, value, tags }
            }
            CommandKind::Delete => Command::Delete {
                key: self.read_key()?,
            },
            CommandKind::Tag => {
                let key = self.read_key()?;
                let mut tags = Vec::new();
                for _ in 2..segments {
                    let field_offset = self.cursor();
                    let tag = self.read_tag()?;
                    crate::entity::validate_tag_name(tag.name())
                        .map_err(|err| self.invalid(err.to_string(), field_offset))?;
                    tags.push(tag);
                }
                Command::Tag { key, tags }
            }
            CommandKind::Untag => {
                let key = self.read_key()?;
                let mut names = Vec::new();
                for _ in 2..segments {
                    let (_, name) = self.read_simple()?;
                    names.push(name);
                }
                Command::Untag { key, names }
            }
            CommandKind::FlushAll => Command::FlushAll,
        };

        Ok(Some(LogRecord {
            offset,
            len: self.cursor() - offset,
            command,
            value_position,
        }))
    }
}

impl Iterator for CommandReader<'_> {
    type Item = CoreResult<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                if self.padding > 0 {
                    debug!(bytes = self.padding, "skipped log padding");
                }
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
