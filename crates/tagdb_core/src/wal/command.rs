//! Log commands and their wire encoding.

use crate::entity::{Tag, TagSet, TagValue};
use crate::key::PrimaryKey;
use crate::types::Position;
use std::fmt;

/// Record header prefix: `*{segments}`.
pub(crate) const RECORD_PREFIX: u8 = b'*';
/// Simple-string prefix used by command lines and tag fields.
pub(crate) const SIMPLE_PREFIX: u8 = b'+';
/// Bulk-field prefix: `${len}`.
pub(crate) const BULK_PREFIX: u8 = b'$';
/// Line terminator.
pub(crate) const CRLF: &[u8] = b"\r\n";
/// Byte skipped between records.
pub const PADDING: u8 = 0;

/// Kind of a logged mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Insert or replace a document.
    Set,
    /// Remove a document.
    Delete,
    /// Bind tags on a document.
    Tag,
    /// Unbind tags from a document.
    Untag,
    /// Remove every document.
    FlushAll,
}

impl CommandKind {
    /// Name written on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Delete => "del",
            Self::Tag => "tag",
            Self::Untag => "untag",
            Self::FlushAll => "flushall",
        }
    }

    /// Resolves a command-line name.
    #[must_use]
    pub fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"set" => Some(Self::Set),
            b"del" => Some(Self::Delete),
            b"tag" => Some(Self::Tag),
            b"untag" => Some(Self::Untag),
            b"flushall" => Some(Self::FlushAll),
            _ => None,
        }
    }

    /// Checks the segment count announced in a record header.
    pub(crate) fn accepts_segments(self, segments: u64) -> bool {
        match self {
            Self::Set => segments >= 3,
            Self::Delete => segments == 2,
            Self::Tag | Self::Untag => segments >= 2,
            Self::FlushAll => segments == 1,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One logged mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Insert or replace `key` with `value` and exactly `tags`.
    Set {
        /// Document key.
        key: PrimaryKey,
        /// Value bytes. Empty when read without values.
        value: Vec<u8>,
        /// Complete tag set of the document.
        tags: TagSet,
    },
    /// Remove `key`.
    Delete {
        /// Document key.
        key: PrimaryKey,
    },
    /// Bind `tags` on `key`, overwriting same-named tags.
    Tag {
        /// Document key.
        key: PrimaryKey,
        /// Tags to bind.
        tags: Vec<Tag>,
    },
    /// Unbind the named tags from `key`.
    Untag {
        /// Document key.
        key: PrimaryKey,
        /// Tag names to remove.
        names: Vec<String>,
    },
    /// Remove every document.
    FlushAll,
}

impl Command {
    /// Returns the command kind.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Set { .. } => CommandKind::Set,
            Self::Delete { .. } => CommandKind::Delete,
            Self::Tag { .. } => CommandKind::Tag,
            Self::Untag { .. } => CommandKind::Untag,
            Self::FlushAll => CommandKind::FlushAll,
        }
    }

    /// Returns the key the command targets.
    #[must_use]
    pub fn key(&self) -> Option<&PrimaryKey> {
        match self {
            Self::Set { key, .. }
            | Self::Delete { key }
            | Self::Tag { key, .. }
            | Self::Untag { key, .. } => Some(key),
            Self::FlushAll => None,
        }
    }

    fn segments(&self) -> usize {
        1 + match self {
            Self::Set { tags, .. } => 2 + tags.len(),
            Self::Delete { .. } => 1,
            Self::Tag { tags, .. } => 1 + tags.len(),
            Self::Untag { names, .. } => 1 + names.len(),
            Self::FlushAll => 0,
        }
    }
}

/// Where an encoded record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Absolute offset of the record's first byte.
    pub offset: u64,
    /// Encoded length in bytes.
    pub len: u64,
    /// Position of the value bytes, for `set`.
    pub value: Option<Position>,
}

/// Encodes commands into one contiguous buffer.
///
/// Offsets are absolute, assuming the buffer is appended to a log that
/// currently ends at `base_offset`.
#[derive(Debug)]
pub struct CommandEncoder {
    buf: Vec<u8>,
    base_offset: u64,
}

impl CommandEncoder {
    /// Creates an encoder for a log ending at `base_offset`.
    #[must_use]
    pub fn new(base_offset: u64) -> Self {
        Self {
            buf: Vec::new(),
            base_offset,
        }
    }

    /// Absolute offset the next record will start at.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.base_offset + self.buf.len() as u64
    }

    /// Returns true if nothing was encoded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends one record.
    pub fn encode(&mut self, command: &Command) -> EncodedRecord {
        let offset = self.offset();
        let start = self.buf.len();

        self.push_line(RECORD_PREFIX, command.segments().to_string().as_bytes());
        self.push_line(SIMPLE_PREFIX, command.kind().name().as_bytes());

        let mut value = None;
        match command {
            Command::Set {
                key,
                value: bytes,
                tags,
            } => {
                self.push_bulk(key.as_str().as_bytes());
                value = Some(self.push_bulk(bytes));
                for (name, tag_value) in tags {
                    self.push_tag(name, tag_value);
                }
            }
            Command::Delete { key } => {
                self.push_bulk(key.as_str().as_bytes());
            }
            Command::Tag { key, tags } => {
                self.push_bulk(key.as_str().as_bytes());
                let mut sorted: Vec<&Tag> = tags.iter().collect();
                sorted.sort_by(|a, b| a.name().cmp(b.name()));
                for tag in sorted {
                    self.push_tag(tag.name(), tag.value());
                }
            }
            Command::Untag { key, names } => {
                self.push_bulk(key.as_str().as_bytes());
                for name in names {
                    self.push_line(SIMPLE_PREFIX, name.as_bytes());
                }
            }
            Command::FlushAll => {}
        }

        EncodedRecord {
            offset,
            len: (self.buf.len() - start) as u64,
            value,
        }
    }

    /// Returns the encoded bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn push_line(&mut self, prefix: u8, body: &[u8]) {
        self.buf.push(prefix);
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(CRLF);
    }

    fn push_bulk(&mut self, bytes: &[u8]) -> Position {
        self.push_line(BULK_PREFIX, bytes.len().to_string().as_bytes());
        let position = Position::new(self.offset(), bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
        self.buf.extend_from_slice(CRLF);
        position
    }

    fn push_tag(&mut self, name: &str, value: &TagValue) {
        let field = format!(
            "{}({},{})",
            value.kind().function_name(),
            name,
            format_literal(value)
        );
        self.push_line(SIMPLE_PREFIX, field.as_bytes());
    }
}

/// Encodes a single command at offset zero.
#[must_use]
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut encoder = CommandEncoder::new(0);
    encoder.encode(command);
    encoder.finish()
}

/// Text of a tag value inside `fn(name,literal)`.
pub(crate) fn format_literal(value: &TagValue) -> String {
    match value {
        TagValue::Bool(v) => v.to_string(),
        TagValue::Int(v) => v.to_string(),
        // Debug keeps a round-trippable form and switches to exponents for
        // very large or small magnitudes.
        TagValue::Float(v) => format!("{v:?}"),
        TagValue::Str(v) => escape(v),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Reverses the string-literal escaping. Returns `None` on a bad escape.
pub(crate) fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '\\' => out.push('\\'),
            'r' => out.push('\r'),
            'n' => out.push('\n'),
            _ => return None,
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_framing() {
        let tags = TagSet::from_tags([Tag::int("n", 5)]).unwrap();
        let bytes = encode_command(&Command::Set {
            key: "k".into(),
            value: br#"{"v":1}"#.to_vec(),
            tags,
        });
        assert_eq!(
            bytes,
            b"*4\r\n+set\r\n$1\r\nk\r\n$7\r\n{\"v\":1}\r\n+itg(n,5)\r\n".to_vec()
        );
    }

    #[test]
    fn tags_are_emitted_in_name_order() {
        let tags = TagSet::from_tags([
            Tag::string("z", "last"),
            Tag::bool("a", true),
            Tag::float("m", 1.5),
        ])
        .unwrap();
        let bytes = encode_command(&Command::Set {
            key: "k".into(),
            value: Vec::new(),
            tags,
        });
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with("+btg(a,true)\r\n+ftg(m,1.5)\r\n+stg(z,last)\r\n"));

        let bytes = encode_command(&Command::Tag {
            key: "k".into(),
            tags: vec![Tag::int("b", 2), Tag::int("a", 1)],
        });
        assert_eq!(
            bytes,
            b"*4\r\n+tag\r\n$1\r\nk\r\n+itg(a,1)\r\n+itg(b,2)\r\n".to_vec()
        );
    }

    #[test]
    fn other_commands() {
        assert_eq!(
            encode_command(&Command::Delete { key: "a:b".into() }),
            b"*2\r\n+del\r\n$3\r\na:b\r\n".to_vec()
        );
        assert_eq!(
            encode_command(&Command::Untag {
                key: "k".into(),
                names: vec!["x".into(), "y".into()],
            }),
            b"*4\r\n+untag\r\n$1\r\nk\r\n+x\r\n+y\r\n".to_vec()
        );
        assert_eq!(encode_command(&Command::FlushAll), b"*1\r\n+flushall\r\n".to_vec());
    }

    #[test]
    fn positions_are_absolute() {
        let mut encoder = CommandEncoder::new(100);
        let first = encoder.encode(&Command::Delete { key: "a".into() });
        let second = encoder.encode(&Command::Set {
            key: "b".into(),
            value: b"xyz".to_vec(),
            tags: TagSet::new(),
        });

        assert_eq!(first.offset, 100);
        assert_eq!(second.offset, 100 + first.len);
        let value = second.value.unwrap();
        assert_eq!(value.size, 3);

        let bytes = encoder.finish();
        let start = (value.offset - 100) as usize;
        assert_eq!(&bytes[start..start + 3], b"xyz");
        assert_eq!(bytes.len() as u64, first.len + second.len);
    }

    #[test]
    fn string_escaping() {
        let raw = "a\\b\r\nc)";
        let escaped = escape(raw);
        assert_eq!(escaped, "a\\\\b\\r\\nc)");
        assert!(!escaped.contains('\n'));
        assert_eq!(unescape(&escaped).as_deref(), Some(raw));
        assert_eq!(unescape("bad\\q"), None);
        assert_eq!(unescape("trailing\\"), None);
    }

    #[test]
    fn float_literals() {
        assert_eq!(format_literal(&TagValue::Float(5.0)), "5.0");
        assert_eq!(format_literal(&TagValue::Float(f64::NAN)), "NaN");
        assert_eq!(format_literal(&TagValue::Float(f64::NEG_INFINITY)), "-inf");
        assert_eq!("1e-7".parse::<f64>().unwrap(), 1e-7);
    }

    #[test]
    fn kind_segment_rules() {
        assert!(CommandKind::Set.accepts_segments(3));
        assert!(!CommandKind::Set.accepts_segments(2));
        assert!(CommandKind::Delete.accepts_segments(2));
        assert!(!CommandKind::Delete.accepts_segments(3));
        assert!(CommandKind::FlushAll.accepts_segments(1));
        assert_eq!(CommandKind::from_name(b"untag"), Some(CommandKind::Untag));
        assert_eq!(CommandKind::from_name(b"get"), None);
    }
}
