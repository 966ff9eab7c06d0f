//! Write transactions.

use crate::engine::Engine;
use crate::entity::{Document, Entry, Tag, TagSet};
use crate::error::{CoreError, CoreResult};
use crate::index::{PrimaryKeyIndex, TagIndexes};
use crate::key::PrimaryKey;
use crate::query::QueryOptions;
use crate::transaction::read;
use crate::wal::Command;
use tracing::error;

/// Inverse of one applied mutation.
#[derive(Debug)]
enum Undo {
    Insert { key: PrimaryKey },
    Replace { previous: Entry },
    Remove { previous: Entry },
    Retag { key: PrimaryKey, previous: Option<TagSet> },
    FlushAll { primary: PrimaryKeyIndex, tags: TagIndexes },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Committed,
    RolledBack,
}

/// An exclusive, read-write view of the database, valid for one callback.
///
/// Mutations are visible to this transaction's own reads at once and to
/// everyone else only after commit. Commands are logged in call order.
pub struct WriteTransaction<'a> {
    engine: &'a mut Engine,
    undo: Vec<Undo>,
    pending: Vec<Command>,
    state: State,
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(engine: &'a mut Engine) -> Self {
        Self {
            engine,
            undo: Vec::new(),
            pending: Vec::new(),
            state: State::Active,
        }
    }

    /// Inserts a new document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for an empty key and
    /// [`CoreError::KeyAlreadyExists`] if the key is stored.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        tags: TagSet,
    ) -> CoreResult<()> {
        self.put(key.into(), value.into(), tags, false).map(|_| ())
    }

    /// Inserts a document or replaces the stored one, tags included.
    ///
    /// Returns true if a document was replaced.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidKey`] for an empty key.
    pub fn insert_or_replace(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
        tags: TagSet,
    ) -> CoreResult<bool> {
        self.put(key.into(), value.into(), tags, true)
    }

    fn put(&mut self, key: String, value: Vec<u8>, tags: TagSet, replace: bool) -> CoreResult<bool> {
        let key = PrimaryKey::parse(key)?;
        let entry = Entry::new(key.clone(), value.clone(), tags.clone());
        let previous = self.engine.put_entry(entry, replace)?;
        let replaced = previous.is_some();
        self.undo.push(match previous {
            Some(previous) => Undo::Replace { previous },
            None => Undo::Insert { key: key.clone() },
        });
        self.pending.push(Command::Set { key, value, tags });
        Ok(replaced)
    }

    /// Removes a document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if absent.
    pub fn remove(&mut self, key: &str) -> CoreResult<()> {
        let key = PrimaryKey::from(key);
        let previous = self.engine.remove_entry(&key)?;
        self.undo.push(Undo::Remove { previous });
        self.pending.push(Command::Delete { key });
        Ok(())
    }

    /// Binds tags on a document, overwriting same-named tags.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if absent, or
    /// [`CoreError::ConflictingTagType`] / [`CoreError::InvalidTagName`];
    /// nothing changes on error.
    pub fn tag(&mut self, key: &str, tags: &[Tag]) -> CoreResult<()> {
        let key = PrimaryKey::from(key);
        let previous = self.engine.tag_entry(&key, tags)?;
        self.undo.push(Undo::Retag {
            key: key.clone(),
            previous,
        });
        self.pending.push(Command::Tag {
            key,
            tags: tags.to_vec(),
        });
        Ok(())
    }

    /// Removes the named tags from a document. Unknown names are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if absent, or
    /// [`CoreError::InvalidTagName`] for a name the log cannot carry.
    pub fn untag(&mut self, key: &str, names: &[&str]) -> CoreResult<()> {
        let key = PrimaryKey::from(key);
        let names: Vec<String> = names.iter().map(|n| (*n).to_owned()).collect();
        for name in &names {
            crate::entity::validate_tag_name(name)?;
        }
        let previous = self.engine.untag_entry(&key, &names)?;
        self.undo.push(Undo::Retag {
            key: key.clone(),
            previous,
        });
        self.pending.push(Command::Untag { key, names });
        Ok(())
    }

    /// Removes every document.
    pub fn flush_all(&mut self) {
        let (primary, tags) = self.engine.flush_all();
        self.undo.push(Undo::FlushAll { primary, tags });
        self.pending.push(Command::FlushAll);
    }

    /// Returns the document stored under `key`, including uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`] if absent.
    pub fn get(&self, key: &str) -> CoreResult<Document> {
        read::get(self.engine, key)
    }

    /// Returns true if `key` is stored.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        read::exists(self.engine, key)
    }

    /// Returns the number of documents.
    #[must_use]
    pub fn count(&self) -> usize {
        self.engine.primary().count()
    }

    /// Returns every document matching `options`.
    ///
    /// # Errors
    ///
    /// Returns a log read error.
    pub fn find(&self, options: &QueryOptions) -> CoreResult<Vec<Document>> {
        read::find(self.engine, options)
    }

    /// Hands each matching document to `receiver` until it returns
    /// `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns the receiver's error or a log read error.
    pub fn scan<F>(&self, options: &QueryOptions, receiver: F) -> CoreResult<()>
    where
        F: FnMut(Document) -> CoreResult<bool>,
    {
        read::scan(self.engine, options, receiver)
    }

    /// Returns the keys matching `options`, including uncommitted writes.
    ///
    /// # Errors
    ///
    /// Never fails for well-formed indices.
    pub fn keys(&self, options: &QueryOptions) -> CoreResult<Vec<PrimaryKey>> {
        read::keys(self.engine, options)
    }

    /// Number of commands this transaction will log.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    /// Logs the pending commands and records their positions.
    ///
    /// On failure the transaction is rolled back before the error returns.
    pub(crate) fn commit(mut self) -> CoreResult<()> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            self.state = State::Committed;
            return Ok(());
        }

        match self.engine.log().cloned() {
            Some(log) => match log.append_commands(&pending) {
                Ok(records) => {
                    for (command, record) in pending.iter().zip(&records) {
                        if let Command::Set { key, value, .. } = command {
                            self.engine.mark_committed(key, value, record);
                        }
                    }
                }
                Err(err) => {
                    self.roll_back()?;
                    return Err(err);
                }
            },
            None => {
                for command in &pending {
                    if let Command::Set { key, .. } = command {
                        self.engine.mark_committed_in_memory(key);
                    }
                }
            }
        }
        self.undo.clear();
        self.state = State::Committed;
        Ok(())
    }

    /// Reverts every mutation in reverse order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvariantViolated`] if an inverse cannot be
    /// applied, which means the indices were already inconsistent.
    pub(crate) fn roll_back(&mut self) -> CoreResult<()> {
        self.pending.clear();
        self.state = State::RolledBack;
        while let Some(undo) = self.undo.pop() {
            let result = match undo {
                Undo::Insert { key } => self.engine.remove_entry(&key).map(|_| ()),
                Undo::Replace { previous } => self.engine.put_entry(previous, true).map(|_| ()),
                Undo::Remove { previous } => self.engine.put_entry(previous, false).map(|_| ()),
                Undo::Retag { key, previous } => self.engine.restore_tags(&key, previous),
                Undo::FlushAll { primary, tags } => {
                    self.engine.restore(primary, tags);
                    Ok(())
                }
            };
            if let Err(err) = result {
                return Err(CoreError::invariant(format!("rollback failed: {err}")));
            }
        }
        Ok(())
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        // Reached on unwind out of the callback.
        if self.state == State::Active {
            if let Err(err) = self.roll_back() {
                error!(error = %err, "rollback of abandoned write transaction failed");
            }
        }
    }
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
