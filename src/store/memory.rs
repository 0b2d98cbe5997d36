//! In-process store
//!
//! Sorted sets order members by score, then by member bytes. Expired keys are
//! dropped lazily: reads ignore them and writes replace them.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use super::{KeyType, Scored, Store, StoreError, StoreResult, normalize_range};

/// Score with a total order
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default, Clone)]
struct SortedSet {
    scores: HashMap<Vec<u8>, f64>,
    ordered: BTreeSet<(Score, Vec<u8>)>,
}

impl SortedSet {
    fn insert(&mut self, score: f64, member: &[u8]) -> bool {
        let is_new = match self.scores.insert(member.to_vec(), score) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.to_vec()));
                false
            }
            None => true,
        };
        self.ordered.insert((Score(score), member.to_vec()));
        is_new
    }

    fn remove(&mut self, member: &[u8]) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(Score(score), member.to_vec()));
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn by_score(&self, min: f64, max: f64) -> impl Iterator<Item = &(Score, Vec<u8>)> {
        self.ordered
            .iter()
            .skip_while(move |(s, _)| s.0 < min)
            .take_while(move |(s, _)| s.0 <= max)
    }

    fn by_rank(&self, start: i64, stop: i64, rev: bool) -> Vec<Scored> {
        let Some((start, stop)) = normalize_range(start, stop, self.len()) else {
            return Vec::new();
        };
        let take = stop - start + 1;
        let to_scored = |(s, m): &(Score, Vec<u8>)| (m.clone(), s.0);
        if rev {
            self.ordered.iter().rev().skip(start).take(take).map(to_scored).collect()
        } else {
            self.ordered.iter().skip(start).take(take).map(to_scored).collect()
        }
    }
}

#[derive(Debug, Clone)]
enum Data {
    SortedSet(SortedSet),
    Hash(HashMap<String, Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
}

impl Data {
    fn key_type(&self) -> KeyType {
        match self {
            Data::SortedSet(_) => KeyType::SortedSet,
            Data::Hash(_) => KeyType::Hash,
            Data::Set(_) => KeyType::Set,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Data::SortedSet(z) => z.len() == 0,
            Data::Hash(h) => h.is_empty(),
            Data::Set(s) => s.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// Store held entirely in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Entry>,
}

fn wrong_type(key: &str, expected: KeyType) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<&Data> {
        self.entries
            .get(key)
            .filter(|e| e.is_live(Instant::now()))
            .map(|e| &e.data)
    }

    fn zset(&self, key: &str) -> StoreResult<Option<&SortedSet>> {
        match self.live(key) {
            None => Ok(None),
            Some(Data::SortedSet(z)) => Ok(Some(z)),
            Some(_) => Err(wrong_type(key, KeyType::SortedSet)),
        }
    }

    /// Mutable access to the value at `key`, creating it with `init` when the
    /// key is missing or expired
    fn slot(&mut self, key: &str, init: fn() -> Data) -> &mut Data {
        let now = Instant::now();
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            data: init(),
            expires_at: None,
        });
        if !entry.is_live(now) {
            *entry = Entry {
                data: init(),
                expires_at: None,
            };
        }
        &mut entry.data
    }

    fn zset_mut(&mut self, key: &str) -> StoreResult<&mut SortedSet> {
        match self.slot(key, || Data::SortedSet(SortedSet::default())) {
            Data::SortedSet(z) => Ok(z),
            _ => Err(wrong_type(key, KeyType::SortedSet)),
        }
    }

    /// Drop `key` if the last write left it empty
    fn prune(&mut self, key: &str) {
        if self.entries.get(key).map(|e| e.data.is_empty()).unwrap_or(false) {
            self.entries.remove(key);
        }
    }

    fn zmutate<T>(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut SortedSet) -> T,
    ) -> StoreResult<T> {
        if self.live(key).is_none() {
            // nothing to remove from a missing key; avoid creating it
            let mut empty = SortedSet::default();
            return Ok(f(&mut empty));
        }
        let result = f(self.zset_mut(key)?);
        self.prune(key);
        Ok(result)
    }
}

impl Store for MemoryStore {
    fn key_type(&self, key: &str) -> KeyType {
        self.live(key).map(Data::key_type).unwrap_or(KeyType::None)
    }

    fn delete(&mut self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(key)
            .map(|e| e.is_live(now))
            .unwrap_or(false)
    }

    fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    fn zadd(&mut self, key: &str, score: f64, member: &[u8]) -> StoreResult<bool> {
        if score.is_nan() {
            return Err(StoreError::Corrupt {
                key: key.to_string(),
                reason: "score is not a number".to_string(),
            });
        }
        Ok(self.zset_mut(key)?.insert(score, member))
    }

    fn zrem(&mut self, key: &str, member: &[u8]) -> StoreResult<bool> {
        self.zmutate(key, |z| z.remove(member))
    }

    fn zrem_range_by_score(&mut self, key: &str, min: f64, max: f64) -> StoreResult<usize> {
        self.zmutate(key, |z| {
            let doomed: Vec<Vec<u8>> = z.by_score(min, max).map(|(_, m)| m.clone()).collect();
            for member in &doomed {
                z.remove(member);
            }
            doomed.len()
        })
    }

    fn zrem_range_by_rank(&mut self, key: &str, start: i64, stop: i64) -> StoreResult<usize> {
        self.zmutate(key, |z| {
            let doomed = z.by_rank(start, stop, false);
            for (member, _) in &doomed {
                z.remove(member);
            }
            doomed.len()
        })
    }

    fn zrange(&self, key: &str, start: i64, stop: i64, rev: bool) -> StoreResult<Vec<Scored>> {
        Ok(self
            .zset(key)?
            .map(|z| z.by_rank(start, stop, rev))
            .unwrap_or_default())
    }

    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        rev: bool,
    ) -> StoreResult<Vec<Scored>> {
        let Some(z) = self.zset(key)? else {
            return Ok(Vec::new());
        };
        let mut members: Vec<Scored> = z.by_score(min, max).map(|(s, m)| (m.clone(), s.0)).collect();
        if rev {
            members.reverse();
        }
        Ok(members)
    }

    fn zrank(&self, key: &str, member: &[u8]) -> StoreResult<Option<usize>> {
        let Some(z) = self.zset(key)? else {
            return Ok(None);
        };
        let Some(score) = z.scores.get(member) else {
            return Ok(None);
        };
        let target = (Score(*score), member.to_vec());
        Ok(Some(z.ordered.range(..&target).count()))
    }

    fn zcard(&self, key: &str) -> StoreResult<usize> {
        Ok(self.zset(key)?.map(SortedSet::len).unwrap_or(0))
    }

    fn zcount(&self, key: &str, min: f64, max: f64) -> StoreResult<usize> {
        Ok(self
            .zset(key)?
            .map(|z| z.by_score(min, max).count())
            .unwrap_or(0))
    }

    fn zscore(&self, key: &str, member: &[u8]) -> StoreResult<Option<f64>> {
        Ok(self.zset(key)?.and_then(|z| z.scores.get(member).copied()))
    }

    fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> StoreResult<bool> {
        match self.slot(key, || Data::Hash(HashMap::new())) {
            Data::Hash(h) => Ok(h.insert(field.to_string(), value.to_vec()).is_none()),
            _ => Err(wrong_type(key, KeyType::Hash)),
        }
    }

    fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(Data::Hash(h)) => {
                let mut fields: Vec<(String, Vec<u8>)> =
                    h.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                fields.sort();
                Ok(fields)
            }
            Some(_) => Err(wrong_type(key, KeyType::Hash)),
        }
    }

    fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        match self.live(key) {
            None => Ok(vec![None; fields.len()]),
            Some(Data::Hash(h)) => Ok(fields.iter().map(|f| h.get(f).cloned()).collect()),
            Some(_) => Err(wrong_type(key, KeyType::Hash)),
        }
    }

    fn sadd(&mut self, key: &str, member: &[u8]) -> StoreResult<bool> {
        match self.slot(key, || Data::Set(BTreeSet::new())) {
            Data::Set(s) => Ok(s.insert(member.to_vec())),
            _ => Err(wrong_type(key, KeyType::Set)),
        }
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<Vec<u8>>> {
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(Data::Set(s)) => Ok(s.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key, KeyType::Set)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(scored: Vec<Scored>) -> Vec<Vec<u8>> {
        scored.into_iter().map(|(m, _)| m).collect()
    }

    #[test]
    fn test_sorted_set_ordering() {
        let mut store = MemoryStore::new();
        store.zadd("z", 3.0, b"c").unwrap();
        store.zadd("z", 1.0, b"a").unwrap();
        store.zadd("z", 2.0, b"b").unwrap();
        assert!(!store.zadd("z", 2.0, b"b").unwrap());

        assert_eq!(store.zcard("z").unwrap(), 3);
        assert_eq!(members(store.zrange("z", 0, -1, false).unwrap()), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(members(store.zrange("z", 0, 0, true).unwrap()), vec![b"c".to_vec()]);
        assert_eq!(store.zrank("z", b"b").unwrap(), Some(1));
        assert_eq!(store.zrank("z", b"x").unwrap(), None);
        assert_eq!(store.zcount("z", 1.5, 3.0).unwrap(), 2);
        assert_eq!(store.zscore("z", b"c").unwrap(), Some(3.0));
    }

    #[test]
    fn test_score_update_moves_member() {
        let mut store = MemoryStore::new();
        store.zadd("z", 1.0, b"a").unwrap();
        store.zadd("z", 2.0, b"b").unwrap();
        store.zadd("z", 5.0, b"a").unwrap();
        assert_eq!(members(store.zrange("z", 0, -1, false).unwrap()), vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_range_removal() {
        let mut store = MemoryStore::new();
        for (i, m) in [b"a", b"b", b"c", b"d"].iter().enumerate() {
            store.zadd("z", i as f64, *m).unwrap();
        }
        assert_eq!(store.zrem_range_by_score("z", 1.0, 2.0).unwrap(), 2);
        assert_eq!(store.zrem_range_by_rank("z", -1, -1).unwrap(), 1);
        assert_eq!(members(store.zrange("z", 0, -1, false).unwrap()), vec![b"a".to_vec()]);

        assert!(store.zrem("z", b"a").unwrap());
        // empty sorted sets disappear
        assert_eq!(store.key_type("z"), KeyType::None);
    }

    #[test]
    fn test_score_range_reverse() {
        let mut store = MemoryStore::new();
        store.zadd("z", 1.0, b"a").unwrap();
        store.zadd("z", 2.0, b"b").unwrap();
        store.zadd("z", 3.0, b"c").unwrap();
        let rev = store.zrange_by_score("z", f64::NEG_INFINITY, 2.0, true).unwrap();
        assert_eq!(members(rev), vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_wrong_type() {
        let mut store = MemoryStore::new();
        store.hset("h", "f", b"1").unwrap();
        assert!(matches!(store.zadd("h", 1.0, b"a"), Err(StoreError::WrongType { .. })));
        assert!(store.zcard("h").is_err());
        assert_eq!(store.hmget("h", &["f".to_string(), "g".to_string()]).unwrap(), vec![Some(b"1".to_vec()), None]);
    }

    #[test]
    fn test_expiry() {
        let mut store = MemoryStore::new();
        store.sadd("s", b"x").unwrap();
        assert_eq!(store.ttl("s"), None);
        assert!(store.expire("s", Duration::from_secs(60)));
        assert!(store.ttl("s").unwrap() > Duration::from_secs(50));

        assert!(store.expire("s", Duration::ZERO));
        assert_eq!(store.key_type("s"), KeyType::None);
        assert!(store.smembers("s").unwrap().is_empty());
        assert!(store.is_empty());
    }
}
