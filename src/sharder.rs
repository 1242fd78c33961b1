//! Contiguous partitioning of a round's input across workers.
//!
//! Shard sizes differ by at most one: the first `len % n` shards carry one
//! extra record, so the concatenation of all shards is exactly the input.

use crate::domain::Record;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub index: usize,
    pub records: Vec<Record>,
}

impl Shard {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Split `records` into at most `n` ordered, disjoint, non-empty shards.
///
/// `n == 0` is treated as `1`. When `n >= records.len()` every record gets its
/// own shard.
pub fn shard(records: Vec<Record>, n: usize) -> Vec<Shard> {
    let len = records.len();
    if len == 0 {
        return Vec::new();
    }

    let count = n.max(1).min(len);
    let base = len / count;
    let remainder = len % count;

    let mut shards = Vec::with_capacity(count);
    let mut iter = records.into_iter();
    for index in 0..count {
        let size = base + usize::from(index < remainder);
        shards.push(Shard {
            index,
            records: iter.by_ref().take(size).collect(),
        });
    }

    shards
}
