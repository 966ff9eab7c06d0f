//! The command log: one append-only file that is both the data file and its
//! own recovery log.
//!
//! ## Record Format
//!
//! ```text
//! *{segments}\r\n
//! +{set|del|tag|untag|flushall}\r\n
//! ${len}\r\n{key bytes}\r\n              key field
//! ${len}\r\n{value bytes}\r\n            value field (set only)
//! +{btg|itg|ftg|stg}({name},{literal})\r\n   tag field (set, tag)
//! +{name}\r\n                            tag name field (untag)
//! ```
//!
//! `segments` counts the command line plus every field. Key and value
//! fields are length-prefixed, so they may hold any bytes. String literals
//! escape `\`, CR and LF; a literal runs from the first `,` to the closing
//! `)` at the end of the line.
//!
//! NUL bytes between records are padding and are skipped on read.
//!
//! ## Recovery Policy
//!
//! Replay reads from offset zero to the end. Any record that breaks the
//! grammar, or is cut short, aborts the open: a database never opens on a
//! partially understood log. Appends that fail part-way are truncated off
//! before the error is returned, so a torn record can only come from a crash
//! mid-write.

mod command;
mod reader;
mod writer;

pub use command::{encode_command, Command, CommandEncoder, CommandKind, EncodedRecord, PADDING};
pub use reader::{CommandReader, LogRecord};
pub use writer::{CommandLog, ReplaySummary};
