//! Generic keyed multi-bucket index
//!
//! Each key owns an ordered bucket of values. An optional capacity turns
//! every bucket into a bounded FIFO: pushing past the limit evicts the oldest
//! value.
//!
//! Buckets may be filed under a provisional key before the entity they belong
//! to exists. `pin(provisional, canonical)` moves that bucket to the canonical
//! key and leaves an alias behind, so later reads and writes through the
//! provisional key land in the canonical bucket. `unpin` is its exact inverse.
//!
//! # Invariants
//!
//! 1. No bucket is ever stored under a pinned provisional key.
//! 2. Buckets emptied by `pop_value` or `move_value` are dropped.
//! 3. A bucket never holds more than `capacity` values.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

use crate::errors::IndexError;

type IndexResult<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Clone)]
pub struct Index<K, V> {
    buckets: HashMap<K, VecDeque<V>>,
    pins: HashMap<K, K>,
    capacity: Option<usize>,
}

impl<K, V> Default for Index<K, V> {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            pins: HashMap::new(),
            capacity: None,
        }
    }
}

impl<K: Eq + Hash + Clone + Debug, V> Index<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index whose buckets keep at most `capacity` values (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn resolve<'a>(&'a self, key: &'a K) -> &'a K {
        self.pins.get(key).unwrap_or(key)
    }

    /// Ensure a bucket exists for `key`
    ///
    /// # Errors
    ///
    /// `KeyPinned` if `key` is a provisional key that was already pinned.
    pub fn create_bucket(&mut self, key: K) -> IndexResult<()> {
        if self.pins.contains_key(&key) {
            return Err(IndexError::KeyPinned {
                key: format!("{key:?}"),
            });
        }
        self.buckets.entry(key).or_default();
        Ok(())
    }

    /// Append `value` to the bucket for `key`, returning any evicted value
    pub fn push(&mut self, key: K, value: V) -> Option<V> {
        let key = self.resolve(&key).clone();
        let bucket = self.buckets.entry(key).or_default();
        bucket.push_back(value);
        match self.capacity {
            Some(cap) if bucket.len() > cap => bucket.pop_front(),
            _ => None,
        }
    }

    /// Values under `key` in insertion order; empty when the key is unknown
    pub fn iter<'a>(&'a self, key: &'a K) -> impl Iterator<Item = &'a V> + Clone + 'a {
        self.buckets.get(self.resolve(key)).into_iter().flatten()
    }

    /// Remove the whole bucket, returning its contents
    pub fn pop_bucket(&mut self, key: &K) -> Vec<V> {
        let key = self.resolve(key).clone();
        self.buckets
            .remove(&key)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Move the bucket under `provisional` to `canonical` and alias the two
    ///
    /// Values already under `canonical` stay first. The canonical bucket is
    /// created if neither key had one.
    ///
    /// # Errors
    ///
    /// `AlreadyPinned` if `provisional` is already pinned.
    pub fn pin(&mut self, provisional: K, canonical: K) -> IndexResult<()> {
        if self.pins.contains_key(&provisional) {
            return Err(IndexError::AlreadyPinned {
                key: format!("{provisional:?}"),
            });
        }
        let moved = self.buckets.remove(&provisional).unwrap_or_default();
        self.buckets
            .entry(canonical.clone())
            .or_default()
            .extend(moved);
        self.pins.insert(provisional, canonical);
        Ok(())
    }

    /// Inverse of [`Index::pin`]: the canonical bucket returns to `provisional`
    ///
    /// # Errors
    ///
    /// `NotPinned` if `provisional` is not aliased to `canonical`.
    pub fn unpin(&mut self, canonical: &K, provisional: &K) -> IndexResult<()> {
        if self.pins.get(provisional) != Some(canonical) {
            return Err(IndexError::NotPinned {
                key: format!("{provisional:?}"),
            });
        }
        self.pins.remove(provisional);
        if let Some(bucket) = self.buckets.remove(canonical) {
            if !bucket.is_empty() {
                self.buckets.insert(provisional.clone(), bucket);
            }
        }
        Ok(())
    }

    pub fn is_pinned(&self, provisional: &K) -> bool {
        self.pins.contains_key(provisional)
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.pins.is_empty()
    }

    /// Number of values across all buckets
    pub fn value_count(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.buckets.keys()
    }
}

impl<K: Eq + Hash + Clone + Debug, V: PartialEq + Debug> Index<K, V> {
    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.iter(key).any(|v| v == value)
    }

    /// Remove the first occurrence of `value` under `key`
    ///
    /// # Errors
    ///
    /// `BucketNotFound` if no bucket exists, `ValueNotFound` if the bucket
    /// does not hold `value`.
    pub fn pop_value(&mut self, key: &K, value: &V) -> IndexResult<V> {
        let key = self.resolve(key).clone();
        let bucket = self
            .buckets
            .get_mut(&key)
            .ok_or_else(|| IndexError::BucketNotFound {
                key: format!("{key:?}"),
            })?;
        let position =
            bucket
                .iter()
                .position(|v| v == value)
                .ok_or_else(|| IndexError::ValueNotFound {
                    key: format!("{key:?}"),
                    value: format!("{value:?}"),
                })?;
        let removed = bucket.remove(position);
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        removed.ok_or_else(|| IndexError::ValueNotFound {
            key: format!("{key:?}"),
            value: format!("{value:?}"),
        })
    }

    /// `pop_value(from, value)` followed by `push(to, value)`
    ///
    /// # Errors
    ///
    /// Same as [`Index::pop_value`]; nothing moves on error.
    pub fn move_value(&mut self, value: &V, from: &K, to: K) -> IndexResult<Option<V>> {
        let taken = self.pop_value(from, value)?;
        Ok(self.push(to, taken))
    }
}
