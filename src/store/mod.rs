//! Key-value store primitives consumed by the command engine
//!
//! The engine only needs a small slice of a store: sorted-set insert, remove,
//! range and rank operations, hash reads, plain sets and key expiry. Any
//! backend that provides these can host the engine; `MemoryStore` is the
//! in-process implementation.

use std::time::Duration;

use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("WRONGTYPE operation against key '{key}' holding the wrong kind of value (expected {expected})")]
    WrongType { key: String, expected: KeyType },

    #[error("corrupt entry in '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Kind of value stored at a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    None,
    SortedSet,
    Hash,
    Set,
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KeyType::None => "none",
            KeyType::SortedSet => "zset",
            KeyType::Hash => "hash",
            KeyType::Set => "set",
        };
        f.write_str(name)
    }
}

/// A sorted-set member together with its score
pub type Scored = (Vec<u8>, f64);

/// Store primitives
///
/// Rank arguments follow the usual convention: zero-based, negative values
/// count from the end (-1 is the last member), and both ends are inclusive.
/// Score ranges are inclusive on both ends. Operations on a missing key behave
/// as on an empty value of the expected kind.
pub trait Store: Send {
    fn key_type(&self, key: &str) -> KeyType;

    fn exists(&self, key: &str) -> bool {
        self.key_type(key) != KeyType::None
    }

    fn delete(&mut self, key: &str) -> bool;

    /// Remaining time to live, `None` when the key is missing or persistent
    fn ttl(&self, key: &str) -> Option<Duration>;

    fn expire(&mut self, key: &str, ttl: Duration) -> bool;

    // sorted sets

    /// Add or update a member. Returns true when the member is new.
    fn zadd(&mut self, key: &str, score: f64, member: &[u8]) -> StoreResult<bool>;

    fn zrem(&mut self, key: &str, member: &[u8]) -> StoreResult<bool>;

    fn zrem_range_by_score(&mut self, key: &str, min: f64, max: f64) -> StoreResult<usize>;

    fn zrem_range_by_rank(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<usize>;

    /// Members by rank. With `rev`, ranks count from the highest score.
    fn zrange(&self, key: &str, start: i64, stop: i64, rev: bool) -> StoreResult<Vec<Scored>>;

    /// Members with `min <= score <= max`, ascending, or descending with `rev`
    fn zrange_by_score(&self, key: &str, min: f64, max: f64, rev: bool)
    -> StoreResult<Vec<Scored>>;

    fn zrank(&self, key: &str, member: &[u8]) -> StoreResult<Option<usize>>;

    fn zcard(&self, key: &str) -> StoreResult<usize>;

    fn zcount(&self, key: &str, min: f64, max: f64) -> StoreResult<usize>;

    fn zscore(&self, key: &str, member: &[u8]) -> StoreResult<Option<f64>>;

    // hashes

    fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> StoreResult<bool>;

    fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    // plain sets

    fn sadd(&mut self, key: &str, member: &[u8]) -> StoreResult<bool>;

    fn smembers(&self, key: &str) -> StoreResult<Vec<Vec<u8>>>;
}

/// Resolve an inclusive rank range against a collection of `len` items.
///
/// Returns `None` when the range selects nothing.
pub fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize_range(0, -1, 3), Some((0, 2)));
        assert_eq!(normalize_range(1, 10, 3), Some((1, 2)));
        assert_eq!(normalize_range(-2, -1, 3), Some((1, 2)));
        assert_eq!(normalize_range(-10, 0, 3), Some((0, 0)));
        assert_eq!(normalize_range(2, 1, 3), None);
        assert_eq!(normalize_range(5, 6, 3), None);
        assert_eq!(normalize_range(0, -1, 0), None);
        assert_eq!(normalize_range(0, -5, 3), None);
    }
}
