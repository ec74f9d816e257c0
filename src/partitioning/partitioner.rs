//! Key partitioning: routing keys to segments.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use twox_hash::XxHash64;

/// Hash function applied to keys before segment selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashFunction {
    /// xxHash64 with the given seed.
    XxHash64 { seed: u64 },
}

impl HashFunction {
    /// Hash a key.
    pub fn hash(&self, key: &[u8]) -> u64 {
        match self {
            HashFunction::XxHash64 { seed } => {
                let mut hasher = XxHash64::with_seed(*seed);
                key.hash(&mut hasher);
                hasher.finish()
            }
        }
    }
}

impl Default for HashFunction {
    fn default() -> Self {
        HashFunction::XxHash64 { seed: 0 }
    }
}

/// Maps keys to segments.
pub trait KeyPartitioner: Send + Sync + Debug {
    /// Segment owning `key`. Always lower than [`num_segments`](Self::num_segments).
    fn segment(&self, key: &[u8]) -> usize;

    /// Number of segments this partitioner distributes keys over.
    fn num_segments(&self) -> usize;
}

/// Default partitioner: hashes the key and scales the hash onto the segment range.
#[derive(Debug, Clone)]
pub struct HashPartitioner {
    hash_function: HashFunction,
    num_segments: usize,
}

impl HashPartitioner {
    /// Create a partitioner over `num_segments` segments.
    pub fn new(hash_function: HashFunction, num_segments: usize) -> Self {
        Self {
            hash_function,
            num_segments: num_segments.max(1),
        }
    }
}

impl KeyPartitioner for HashPartitioner {
    fn segment(&self, key: &[u8]) -> usize {
        let hash = self.hash_function.hash(key) as u128;
        ((hash * self.num_segments as u128) >> 64) as usize
    }

    fn num_segments(&self) -> usize {
        self.num_segments
    }
}

/// Extracts the group a key belongs to. Keys of one group share a segment.
pub trait Grouper: Send + Sync + Debug {
    /// Group key for `key`, or `None` if the key is not grouped.
    fn group_key(&self, key: &[u8]) -> Option<Vec<u8>>;
}

/// Groups keys by a `{tag}` section, e.g. `user:{42}:profile` and
/// `user:{42}:cart` both route by `42`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashTagGrouper;

impl Grouper for HashTagGrouper {
    fn group_key(&self, key: &[u8]) -> Option<Vec<u8>> {
        let open = key.iter().position(|&b| b == b'{')?;
        let len = key[open + 1..].iter().position(|&b| b == b'}')?;
        if len == 0 {
            return None;
        }
        Some(key[open + 1..open + 1 + len].to_vec())
    }
}

/// Partitioner that routes grouped keys by their group key.
#[derive(Debug, Clone)]
pub struct GroupingPartitioner {
    inner: Arc<dyn KeyPartitioner>,
    groupers: Vec<Arc<dyn Grouper>>,
}

impl GroupingPartitioner {
    /// Wrap `inner`, consulting `groupers` in order.
    pub fn new(inner: Arc<dyn KeyPartitioner>, groupers: Vec<Arc<dyn Grouper>>) -> Self {
        Self { inner, groupers }
    }
}

impl KeyPartitioner for GroupingPartitioner {
    fn segment(&self, key: &[u8]) -> usize {
        match self.groupers.iter().find_map(|g| g.group_key(key)) {
            Some(group) => self.inner.segment(&group),
            None => self.inner.segment(key),
        }
    }

    fn num_segments(&self) -> usize {
        self.inner.num_segments()
    }
}
