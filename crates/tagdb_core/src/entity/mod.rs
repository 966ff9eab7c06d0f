//! Stored entries and their typed tags.

mod entry;
mod tag;

pub use entry::{Document, Entry};
pub use tag::{validate_tag_name, FloatKey, Tag, TagKind, TagSet, TagValue};
