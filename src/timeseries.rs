//! Time series commands
//!
//! A series is a sorted set whose members are JSON-encoded `[timestamp,
//! payload]` pairs scored by their timestamp. `add` keeps at most one entry
//! per timestamp; `pop` and `ipop` verify that property whenever they remove
//! an entry.

use serde_json::{Number, Value as Json};
use tracing::warn;

use crate::cjson;
use crate::command::{Args, Command};
use crate::error::{Error, Result};
use crate::store::{Store, StoreError};
use crate::value::HostValue;

/// One decoded series entry
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub timestamp: f64,
    pub payload: HostValue,
}

impl Entry {
    /// `[timestamp, payload]` as returned to callers
    pub fn into_pair(self) -> HostValue {
        HostValue::List(vec![HostValue::number(self.timestamp), self.payload])
    }
}

/// Encode an entry as the member stored in the sorted set
pub fn encode_entry(timestamp: f64, payload: &HostValue) -> Result<Vec<u8>> {
    let stamp = match HostValue::number(timestamp) {
        HostValue::Int(i) => Json::Number(i.into()),
        _ => Number::from_f64(timestamp)
            .map(Json::Number)
            .ok_or_else(|| Error::command(format!("invalid timestamp {}", timestamp)))?,
    };
    let payload = cjson::to_json(payload).map_err(|e| {
        Error::command(format!(
            "payload at timestamp {} must be JSON-serializable, with strings in UTF-8: {}",
            timestamp, e
        ))
    })?;
    let json = Json::Array(vec![stamp, payload]);
    serde_json::to_vec(&json).map_err(|e| Error::type_error(e.to_string()))
}

/// Decode a stored member. The score is authoritative for the timestamp.
pub fn decode_entry(key: &str, score: f64, member: &[u8]) -> Result<Entry> {
    let corrupt = |reason: String| {
        Error::Store(StoreError::Corrupt {
            key: key.to_string(),
            reason,
        })
    };
    let json: Json = serde_json::from_slice(member).map_err(|e| corrupt(e.to_string()))?;
    match json {
        Json::Array(mut items) if items.len() == 2 => Ok(Entry {
            timestamp: score,
            payload: cjson::from_json(items.remove(1)),
        }),
        _ => Err(corrupt("expected a [timestamp, payload] pair".to_string())),
    }
}

fn decode_all(key: &str, entries: Vec<(Vec<u8>, f64)>) -> Result<Vec<Entry>> {
    entries
        .into_iter()
        .map(|(member, score)| decode_entry(key, score, &member))
        .collect()
}

/// Entries with `start <= timestamp <= stop`, in timestamp order
pub fn range<S: Store + ?Sized>(store: &S, key: &str, start: f64, stop: f64) -> Result<Vec<Entry>> {
    decode_all(key, store.zrange_by_score(key, start, stop, false)?)
}

/// Entries with rank in `[start, stop]`, in timestamp order
pub fn irange<S: Store + ?Sized>(store: &S, key: &str, start: i64, stop: i64) -> Result<Vec<Entry>> {
    decode_all(key, store.zrange(key, start, stop, false)?)
}

/// Insert or replace the entry at `timestamp`
pub fn add<S: Store + ?Sized>(store: &mut S, key: &str, timestamp: f64, payload: &HostValue) -> Result<()> {
    let member = encode_entry(timestamp, payload)?;
    store.zrem_range_by_score(key, timestamp, timestamp)?;
    store.zadd(key, timestamp, &member)?;
    Ok(())
}

/// Run one time series command against `key`
pub fn execute<S: Store + ?Sized>(
    store: &mut S,
    command: Command,
    key: &str,
    args: Args<'_>,
) -> Result<HostValue> {
    match command {
        Command::Size => Ok(HostValue::from(store.zcard(key)?)),
        Command::Add => {
            if args.len() % 2 != 0 {
                return Err(Error::command(format!(
                    "command add expects timestamp/value pairs, got {} arguments",
                    args.len()
                )));
            }
            for pair in 0..args.len() / 2 {
                let timestamp = args.score(2 * pair)?;
                add(store, key, timestamp, args.get(2 * pair + 1)?)?;
            }
            Ok(HostValue::None)
        }
        Command::Exists => {
            let timestamp = args.score(0)?;
            Ok(HostValue::Bool(store.zcount(key, timestamp, timestamp)? > 0))
        }
        Command::Rank => {
            let timestamp = args.score(0)?;
            let found = store.zrange_by_score(key, timestamp, timestamp, false)?;
            match found.first() {
                Some((member, _)) => Ok(HostValue::from(store.zrank(key, member)?)),
                None => Ok(HostValue::None),
            }
        }
        Command::Get => {
            let timestamp = args.score(0)?;
            Ok(range(store, key, timestamp, timestamp)?
                .into_iter()
                .next()
                .map(|entry| entry.payload)
                .unwrap_or(HostValue::None))
        }
        Command::Pop => {
            let timestamp = args.score(0)?;
            pop_at(store, key, timestamp)
        }
        Command::IPop => {
            let index = args.rank(0)?;
            match store.zrange(key, index, index, false)?.into_iter().next() {
                Some((_, timestamp)) => pop_at(store, key, timestamp),
                None => Ok(HostValue::None),
            }
        }
        Command::Times => {
            let (start, stop) = (args.score(0)?, args.score(1)?);
            Ok(timestamps(store.zrange_by_score(key, start, stop, false)?))
        }
        Command::ITimes => {
            let (start, stop) = (args.rank(0)?, args.rank(1)?);
            Ok(timestamps(store.zrange(key, start, stop, false)?))
        }
        Command::Range => {
            let (start, stop) = (args.score(0)?, args.score(1)?);
            Ok(pairs(range(store, key, start, stop)?))
        }
        Command::IRange => {
            let (start, stop) = (args.rank(0)?, args.rank(1)?);
            Ok(pairs(irange(store, key, start, stop)?))
        }
        Command::Count => {
            let (start, stop) = (args.score(0)?, args.score(1)?);
            Ok(HostValue::from(store.zcount(key, start, stop)?))
        }
        Command::PopRange => {
            let (start, stop) = (args.score(0)?, args.score(1)?);
            let entries = range(store, key, start, stop)?;
            store.zrem_range_by_score(key, start, stop)?;
            Ok(pairs(entries))
        }
        Command::IPopRange => {
            let (start, stop) = (args.rank(0)?, args.rank(1)?);
            let entries = irange(store, key, start, stop)?;
            store.zrem_range_by_rank(key, start, stop)?;
            Ok(pairs(entries))
        }
        other => Err(Error::command(format!("{} is not a time series command", other))),
    }
}

/// Remove the single entry at `timestamp` and return its payload
fn pop_at<S: Store + ?Sized>(store: &mut S, key: &str, timestamp: f64) -> Result<HostValue> {
    let Some(entry) = range(store, key, timestamp, timestamp)?.into_iter().next() else {
        return Ok(HostValue::None);
    };
    let removed = store.zrem_range_by_score(key, timestamp, timestamp)?;
    if removed != 1 {
        warn!(key, timestamp, removed, "timestamp is not unique in series");
        return Err(Error::Critical {
            key: key.to_string(),
            timestamp: HostValue::number(timestamp).to_string(),
            removed,
        });
    }
    Ok(entry.payload)
}

fn timestamps(entries: Vec<(Vec<u8>, f64)>) -> HostValue {
    HostValue::List(
        entries
            .into_iter()
            .map(|(_, score)| HostValue::number(score))
            .collect(),
    )
}

fn pairs(entries: Vec<Entry>) -> HostValue {
    HostValue::List(entries.into_iter().map(Entry::into_pair).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn run(store: &mut MemoryStore, name: &str, args: Vec<HostValue>) -> Result<HostValue> {
        let command: Command = name.parse()?;
        execute(store, command, "ts", Args::new(command, &args))
    }

    fn seeded() -> MemoryStore {
        let mut store = MemoryStore::new();
        run(
            &mut store,
            "add",
            vec![
                HostValue::Int(1000),
                HostValue::from("x"),
                HostValue::Int(2000),
                HostValue::from("y"),
                HostValue::Int(3000),
                HostValue::map([("v", HostValue::Float(1.5))]),
            ],
        )
        .unwrap();
        store
    }

    #[test]
    fn test_entry_encoding() {
        let member = encode_entry(1000.0, &HostValue::from("x")).unwrap();
        assert_eq!(member, br#"[1000,"x"]"#.to_vec());
        let member = encode_entry(1.5, &HostValue::Int(2)).unwrap();
        assert_eq!(member, br#"[1.5,2]"#.to_vec());

        let entry = decode_entry("ts", 1000.0, br#"[1000,"x"]"#).unwrap();
        assert_eq!(entry.payload, HostValue::from("x"));
        assert!(decode_entry("ts", 1.0, b"not json").is_err());
    }

    #[test]
    fn test_add_replaces_same_timestamp() {
        let mut store = seeded();
        run(&mut store, "add", vec![HostValue::Int(2000), HostValue::from("z")]).unwrap();
        assert_eq!(run(&mut store, "size", vec![]).unwrap(), HostValue::Int(3));
        assert_eq!(
            run(&mut store, "get", vec![HostValue::Int(2000)]).unwrap(),
            HostValue::from("z")
        );
    }

    #[test]
    fn test_add_odd_arguments() {
        let mut store = MemoryStore::new();
        let err = run(&mut store, "add", vec![HostValue::Int(1)]).unwrap_err();
        assert!(matches!(err, Error::Command(_)));
        assert_eq!(run(&mut store, "size", vec![]).unwrap(), HostValue::Int(0));
    }

    #[test]
    fn test_add_rejects_binary_payload() {
        let mut store = MemoryStore::new();
        let err = run(&mut store, "add", vec![HostValue::Int(1), HostValue::Bytes(vec![0xff, 0x00])])
            .unwrap_err();
        match err {
            Error::Command(message) => {
                assert!(message.contains("timestamp 1"));
                assert!(message.contains("UTF-8"));
            }
            other => panic!("Expected Command, got {:?}", other),
        }
        assert_eq!(run(&mut store, "size", vec![]).unwrap(), HostValue::Int(0));
    }

    #[test]
    fn test_lookups() {
        let mut store = seeded();
        assert_eq!(
            run(&mut store, "exists", vec![HostValue::Int(2000)]).unwrap(),
            HostValue::Bool(true)
        );
        assert_eq!(
            run(&mut store, "exists", vec![HostValue::Int(2500)]).unwrap(),
            HostValue::Bool(false)
        );
        assert_eq!(
            run(&mut store, "rank", vec![HostValue::Int(2000)]).unwrap(),
            HostValue::Int(1)
        );
        assert_eq!(
            run(&mut store, "rank", vec![HostValue::Int(2500)]).unwrap(),
            HostValue::None
        );
        assert_eq!(
            run(&mut store, "itimes", vec![HostValue::Int(0), HostValue::Int(-1)]).unwrap(),
            HostValue::List(vec![
                HostValue::Int(1000),
                HostValue::Int(2000),
                HostValue::Int(3000),
            ])
        );
        assert_eq!(
            run(&mut store, "count", vec![HostValue::from("-inf"), HostValue::Int(2000)]).unwrap(),
            HostValue::Int(2)
        );
    }

    #[test]
    fn test_ranges() {
        let mut store = seeded();
        assert_eq!(
            run(&mut store, "range", vec![HostValue::Int(0), HostValue::Int(1500)]).unwrap(),
            HostValue::List(vec![HostValue::List(vec![
                HostValue::Int(1000),
                HostValue::from("x"),
            ])])
        );
        assert_eq!(
            run(&mut store, "irange", vec![HostValue::Int(-1), HostValue::Int(-1)]).unwrap(),
            HostValue::List(vec![HostValue::List(vec![
                HostValue::Int(3000),
                HostValue::map([("v", HostValue::Float(1.5))]),
            ])])
        );
        assert_eq!(
            run(&mut store, "times", vec![HostValue::Int(1500), HostValue::Int(5000)]).unwrap(),
            HostValue::List(vec![HostValue::Int(2000), HostValue::Int(3000)])
        );
    }

    #[test]
    fn test_pops() {
        let mut store = seeded();
        assert_eq!(
            run(&mut store, "pop", vec![HostValue::Int(1000)]).unwrap(),
            HostValue::from("x")
        );
        assert_eq!(run(&mut store, "pop", vec![HostValue::Int(1000)]).unwrap(), HostValue::None);
        assert_eq!(run(&mut store, "size", vec![]).unwrap(), HostValue::Int(2));

        assert_eq!(
            run(&mut store, "ipop", vec![HostValue::Int(0)]).unwrap(),
            HostValue::from("y")
        );
        assert_eq!(run(&mut store, "ipop", vec![HostValue::Int(5)]).unwrap(), HostValue::None);

        let popped = run(&mut store, "ipop_range", vec![HostValue::Int(0), HostValue::Int(-1)]).unwrap();
        assert_eq!(popped.as_list().unwrap().len(), 1);
        assert_eq!(run(&mut store, "size", vec![]).unwrap(), HostValue::Int(0));
    }

    #[test]
    fn test_pop_detects_duplicate_timestamps() {
        let mut store = MemoryStore::new();
        store.zadd("ts", 5.0, br#"[5,"a"]"#).unwrap();
        store.zadd("ts", 5.0, br#"[5,"b"]"#).unwrap();

        match run(&mut store, "pop", vec![HostValue::Int(5)]) {
            Err(Error::Critical { removed, .. }) => assert_eq!(removed, 2),
            other => panic!("Expected Critical, got {:?}", other),
        }
    }

    #[test]
    fn test_pop_range() {
        let mut store = seeded();
        let popped = run(&mut store, "pop_range", vec![HostValue::Int(0), HostValue::Int(2500)]).unwrap();
        assert_eq!(popped.as_list().unwrap().len(), 2);
        assert_eq!(run(&mut store, "size", vec![]).unwrap(), HostValue::Int(1));
    }
}
