//! Sorted-set helper commands: ranked/scored pop, scored difference,
//! predicate-filtered id extraction and set kind conversion

use tracing::debug;

use crate::command::{Args, Command};
use crate::error::{Error, Result};
use crate::interpreter::Interpreter;
use crate::store::{KeyType, Scored, Store};
use crate::value::HostValue;

/// How `zpop` selects its range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopBy {
    Rank,
    Score,
}

impl PopBy {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "rank" => Ok(PopBy::Rank),
            "score" => Ok(PopBy::Score),
            other => Err(Error::command(format!(
                "zpop selects by 'rank' or 'score', not '{}'",
                other
            ))),
        }
    }
}

/// Remove and return a rank or score range of `key`.
///
/// With `desc`, ranks count from the highest score; for score ranges `start`
/// is then the upper bound.
pub fn zpop<S: Store + ?Sized>(
    store: &mut S,
    key: &str,
    by: PopBy,
    start: &HostValue,
    stop: &HostValue,
    desc: bool,
) -> Result<Vec<Scored>> {
    match by {
        PopBy::Rank => {
            let start = start.as_int().map_err(Error::command)?;
            let stop = stop.as_int().map_err(Error::command)?;
            let selected = store.zrange(key, start, stop, desc)?;
            for (member, _) in &selected {
                store.zrem(key, member)?;
            }
            Ok(selected)
        }
        PopBy::Score => {
            let start = start.as_float().map_err(Error::command)?;
            let stop = stop.as_float().map_err(Error::command)?;
            let (min, max) = if desc { (stop, start) } else { (start, stop) };
            let selected = store.zrange_by_score(key, min, max, desc)?;
            store.zrem_range_by_score(key, min, max)?;
            Ok(selected)
        }
    }
}

/// Subtract `sources` from `dest`, after copying `first` into `dest` when
/// the two keys differ.
///
/// With `withscores`, scores of matching members are decremented and a
/// member is removed once its score is exactly zero; otherwise matching
/// members are removed outright. Returns the cardinality of `dest`.
pub fn zdiffstore<S: Store + ?Sized>(
    store: &mut S,
    dest: &str,
    first: &str,
    sources: &[String],
    withscores: bool,
) -> Result<usize> {
    if dest != first {
        let members = store.zrange(first, 0, -1, false)?;
        store.delete(dest);
        for (member, score) in &members {
            store.zadd(dest, *score, member)?;
        }
    }

    for source in sources {
        for (member, score) in store.zrange(source, 0, -1, false)? {
            if withscores {
                let Some(current) = store.zscore(dest, &member)? else {
                    continue;
                };
                let remaining = current - score;
                if remaining == 0.0 {
                    store.zrem(dest, &member)?;
                } else {
                    store.zadd(dest, remaining, &member)?;
                }
            } else {
                store.zrem(dest, &member)?;
            }
        }
    }
    Ok(store.zcard(dest)?)
}

/// Where `filter_ids` loads candidate records from
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMeta {
    pub namespace: String,
    pub fields: Option<Vec<String>>,
}

impl RecordMeta {
    pub fn from_value(value: &HostValue) -> Result<Self> {
        let namespace = value
            .get("namespace")
            .ok_or_else(|| Error::command("filter_ids metadata requires a namespace"))?
            .as_str()
            .map_err(Error::command)?
            .to_string();
        let fields = match value.get("fields").filter(|v| !v.is_none()) {
            Some(list) => Some(
                list.as_list()
                    .map_err(Error::command)?
                    .iter()
                    .map(|f| f.as_str().map(str::to_string).map_err(Error::command))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        Ok(RecordMeta { namespace, fields })
    }

    fn record_key(&self, id: &str) -> String {
        format!("{}:{}", self.namespace, id)
    }
}

/// Load the hash record of `id`, turning numeric field values into numbers
fn load_record<S: Store + ?Sized>(store: &S, meta: &RecordMeta, id: &str) -> Result<HostValue> {
    let key = meta.record_key(id);
    let fields: Vec<(String, Vec<u8>)> = match &meta.fields {
        Some(names) => names
            .iter()
            .cloned()
            .zip(store.hmget(&key, names)?)
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect(),
        None => store.hgetall(&key)?,
    };

    let mut record: Vec<(String, HostValue)> = fields
        .into_iter()
        .map(|(name, raw)| (name, coerce(raw)))
        .collect();
    record.push(("id".to_string(), HostValue::from(id)));
    Ok(HostValue::map(record))
}

fn coerce(raw: Vec<u8>) -> HostValue {
    let bytes = HostValue::Bytes(raw);
    match bytes.as_float() {
        Ok(n) if n.is_finite() => HostValue::number(n),
        _ => bytes.decode_utf8(),
    }
}

/// Add to `dest` every id of the `source` set whose record satisfies
/// `predicate`, a script expression evaluated with the global `record`
/// bound to the loaded record. Returns the number of ids added.
pub fn filter_ids<S: Store + ?Sized>(
    store: &mut S,
    predicates: &Interpreter,
    dest: &str,
    source: &str,
    meta: &RecordMeta,
    predicate: &str,
) -> Result<usize> {
    let ids = store.smembers(source)?;
    if source == dest {
        store.delete(dest);
    }

    let script = format!("return ({})", predicate);
    let mut added = 0;
    for id in ids {
        let id = String::from_utf8(id)
            .map_err(|_| Error::command(format!("id in '{}' is not valid UTF-8", source)))?;
        let record = load_record(store, meta, &id)?;
        predicates.set_global("record", &record)?;
        let verdict = predicates.execute(script.as_bytes());
        predicates.set_global("record", &HostValue::None)?;
        if verdict?.is_truthy() && store.sadd(dest, id.as_bytes())? {
            added += 1;
        }
    }
    debug!(dest, source, added, "filtered ids");
    Ok(added)
}

/// Target kind of `move2set`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    Sorted,
    Plain,
}

impl SetKind {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "z" => Ok(SetKind::Sorted),
            "s" => Ok(SetKind::Plain),
            other => Err(Error::command(format!(
                "move2set converts to 'z' or 's', not '{}'",
                other
            ))),
        }
    }
}

/// Convert plain sets to sorted sets (score 0) or back, keeping each key's
/// time to live. Keys that are missing or already of the target kind are
/// left alone. Returns the number of keys converted.
pub fn move2set<S: Store + ?Sized>(store: &mut S, keys: &[String], kind: SetKind) -> Result<usize> {
    let mut converted = 0;
    for key in keys {
        let ttl = store.ttl(key);
        match (kind, store.key_type(key)) {
            (SetKind::Sorted, KeyType::Set) => {
                let members = store.smembers(key)?;
                store.delete(key);
                for member in &members {
                    store.zadd(key, 0.0, member)?;
                }
            }
            (SetKind::Plain, KeyType::SortedSet) => {
                let members = store.zrange(key, 0, -1, false)?;
                store.delete(key);
                for (member, _) in &members {
                    store.sadd(key, member)?;
                }
            }
            _ => continue,
        }
        if let Some(ttl) = ttl {
            store.expire(key, ttl);
        }
        converted += 1;
    }
    Ok(converted)
}

fn scored_list(selected: Vec<Scored>, withscores: bool) -> HostValue {
    let mut items = Vec::with_capacity(selected.len() * if withscores { 2 } else { 1 });
    for (member, score) in selected {
        items.push(HostValue::Bytes(member));
        if withscores {
            items.push(HostValue::number(score));
        }
    }
    HostValue::List(items)
}

/// Run one sorted-set command
pub fn execute<S: Store + ?Sized>(
    store: &mut S,
    predicates: &Interpreter,
    command: Command,
    keys: &[String],
    args: Args<'_>,
) -> Result<HostValue> {
    match command {
        Command::ZPop => {
            args.require(4)?;
            let by = PopBy::parse(args.text(0)?)?;
            let selected = zpop(store, &keys[0], by, args.get(1)?, args.get(2)?, args.flag(3)?)?;
            Ok(scored_list(selected, args.flag(4)?))
        }
        Command::ZDiffStore => {
            let count = zdiffstore(store, &keys[0], &keys[1], &keys[2..], args.flag(0)?)?;
            Ok(HostValue::from(count))
        }
        Command::FilterIds => {
            args.require(2)?;
            let meta = RecordMeta::from_value(args.get(0)?)?;
            let predicate = args.text(1)?;
            let added = filter_ids(store, predicates, &keys[0], &keys[1], &meta, predicate)?;
            Ok(HostValue::from(added))
        }
        Command::Move2Set => {
            args.require(1)?;
            let kind = SetKind::parse(args.text(0)?)?;
            Ok(HostValue::from(move2set(store, keys, kind)?))
        }
        other => Err(Error::command(format!("{} is not a sorted-set command", other))),
    }
}
