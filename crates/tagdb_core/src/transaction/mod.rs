//! Single-writer, multi-reader transactions.
//!
//! One engine-wide read/write lock orders every access:
//!
//! - **Read transactions** hold the lock shared for the whole callback and
//!   never mutate, so they need no rollback path
//! - **Write transactions** hold it exclusively. Mutations are applied to the
//!   indices immediately and recorded in an undo log; the commands they
//!   produce are buffered and appended to the command log as one write after
//!   the callback succeeds
//!
//! If the callback fails, or the append fails, the undo log is replayed in
//! reverse before the lock is released. Nothing from a failed transaction
//! reaches the log and no partial state is ever visible to readers.

mod manager;
mod read;
mod write;

pub use manager::{TransactionManager, TransactionStats};
pub use read::ReadTransaction;
pub use write::WriteTransaction;
