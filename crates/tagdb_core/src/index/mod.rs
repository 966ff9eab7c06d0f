//! Index structures.
//!
//! The primary index owns every [`Entry`](crate::entity::Entry). Tag
//! indices only hold keys and are re-resolved through the primary index:
//!
//! - [`PrimaryKeyIndex`]: ordered by [`PrimaryKey`](crate::key::PrimaryKey),
//!   point lookup plus ranged and prefixed traversal
//! - [`HashTagIndex`]: equality lookup for bool, float and string tags
//! - [`OrderedTagIndex`]: equality and range lookup for integer tags
//! - [`TagIndexes`]: the four tag indices updated together

mod btree;
mod hash;
mod primary;
mod tags;
mod traits;

pub use btree::OrderedTagIndex;
pub use hash::HashTagIndex;
pub use primary::PrimaryKeyIndex;
pub use tags::TagIndexes;
pub use traits::TagIndex;
