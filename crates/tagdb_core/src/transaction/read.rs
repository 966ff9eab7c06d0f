//! Read transactions and the read operations shared with writers.

use crate::engine::Engine;
use crate::entity::Document;
use crate::error::CoreResult;
use crate::key::PrimaryKey;
use crate::query::{self, QueryOptions};

/// A read-only view of the database, valid for one callback.
///
/// Every read sees the state left by the last committed write.
pub struct ReadTransaction<'a> {
    engine: &'a Engine,
}

impl<'a> ReadTransaction<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Returns the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DocumentNotFound`](crate::CoreError::DocumentNotFound)
    /// if absent, or a log read error.
    pub fn get(&self, key: &str) -> CoreResult<Document> {
        get(self.engine, key)
    }

    /// Returns true if `key` is stored.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        exists(self.engine, key)
    }

    /// Returns the number of documents.
    #[must_use]
    pub fn count(&self) -> usize {
        self.engine.primary().count()
    }

    /// Returns every document matching `options`, in order.
    ///
    /// # Errors
    ///
    /// Returns a log read error.
    pub fn find(&self, options: &QueryOptions) -> CoreResult<Vec<Document>> {
        find(self.engine, options)
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
        scan(self.engine, options, receiver)
    }

    /// Returns the keys matching `options` without loading values.
    ///
    /// # Errors
    ///
    /// Never fails for well-formed indices.
    pub fn keys(&self, options: &QueryOptions) -> CoreResult<Vec<PrimaryKey>> {
        keys(self.engine, options)
    }
}

pub(crate) fn get(engine: &Engine, key: &str) -> CoreResult<Document> {
    let entry = engine.primary().find_by_key(&PrimaryKey::from(key))?;
    engine.document(entry)
}

pub(crate) fn exists(engine: &Engine, key: &str) -> bool {
    engine.primary().contains(&PrimaryKey::from(key))
}

pub(crate) fn find(engine: &Engine, options: &QueryOptions) -> CoreResult<Vec<Document>> {
    let mut documents = Vec::new();
    query::execute(engine, options, |entry| {
        documents.push(engine.document(entry)?);
        Ok(true)
    })?;
    Ok(documents)
}

pub(crate) fn scan<F>(engine: &Engine, options: &QueryOptions, mut receiver: F) -> CoreResult<()>
where
    F: FnMut(Document) -> CoreResult<bool>,
{
    query::execute(engine, options, |entry| receiver(engine.document(entry)?))
}

pub(crate) fn keys(engine: &Engine, options: &QueryOptions) -> CoreResult<Vec<PrimaryKey>> {
    let mut keys = Vec::new();
    query::execute(engine, options, |entry| {
        keys.push(entry.key().clone());
        Ok(true)
    })?;
    Ok(keys)
}
