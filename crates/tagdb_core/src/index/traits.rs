//! Tag index trait.

use crate::key::PrimaryKey;

/// A secondary index from tag name and value to the keys carrying it.
///
/// Buckets keep keys in insertion order. Indices store keys, never entries;
/// results are re-resolved through the primary index.
pub trait TagIndex: Send + Sync {
    /// Indexed value type.
    type Value;

    /// Appends `key` to the bucket for `(name, value)`.
    fn add(&mut self, name: &str, value: Self::Value, key: &PrimaryKey);

    /// Removes `key` from the bucket for `(name, value)`, keeping the order
    /// of the remaining keys.
    ///
    /// Returns true if a key was removed.
    fn remove_entry_by_tag(&mut self, name: &str, value: &Self::Value, key: &PrimaryKey) -> bool;

    /// Returns the keys in the bucket for `(name, value)`.
    fn lookup(&self, name: &str, value: &Self::Value) -> &[PrimaryKey];

    /// Returns every `(name, value, key)` binding.
    fn bindings(&self) -> Vec<(String, Self::Value, PrimaryKey)>;

    /// Returns the total number of key references held.
    fn len(&self) -> usize;

    /// Returns true if the index holds no references.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every bucket.
    fn clear(&mut self);
}

/// Splices `key` out of a bucket, preserving order.
pub(crate) fn splice_out(bucket: &mut Vec<PrimaryKey>, key: &PrimaryKey) -> bool {
    match bucket.iter().position(|k| k == key) {
        Some(idx) => {
            bucket.remove(idx);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_preserves_order() {
        let mut bucket: Vec<PrimaryKey> = ["a", "b", "c"].iter().map(|k| (*k).into()).collect();
        assert!(splice_out(&mut bucket, &"b".into()));
        assert_eq!(bucket, vec![PrimaryKey::from("a"), PrimaryKey::from("c")]);
        assert!(!splice_out(&mut bucket, &"b".into()));
    }
}
