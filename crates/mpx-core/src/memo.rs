//! Single-entry memoization

use crate::error::Result;
use crate::hash::InputHash;

/// Caches the most recent (input hash → output) pair of an operation.
///
/// Capacity is exactly one: a new hash replaces the previous entry. The entry
/// is only written when the computation succeeds.
#[derive(Debug, Clone)]
pub struct SingleEntryMemo<T> {
    entry: Option<(InputHash, T)>,
}

impl<T> Default for SingleEntryMemo<T> {
    fn default() -> Self {
        Self { entry: None }
    }
}

impl<T: Clone> SingleEntryMemo<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `hash`, or run `compute` and cache its result
    pub fn get_or_try_insert_with<F>(&mut self, hash: InputHash, compute: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some((cached_hash, value)) = &self.entry {
            if *cached_hash == hash {
                tracing::debug!(input_hash = %hash, "memo hit");
                return Ok(value.clone());
            }
        }

        let value = compute()?;
        self.entry = Some((hash, value.clone()));
        Ok(value)
    }

    /// The hash of the cached entry, if any
    pub fn cached_hash(&self) -> Option<InputHash> {
        self.entry.as_ref().map(|(h, _)| *h)
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}
