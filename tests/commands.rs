use std::sync::Arc;
use std::time::Duration;

use luaseries::{Engine, HostValue, Interpreter, KeyType, MemoryStore, Store, engine};

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|k| k.to_string()).collect()
}

fn engine_with(setup: impl FnOnce(&mut MemoryStore)) -> Engine<MemoryStore> {
    let mut store = MemoryStore::new();
    setup(&mut store);
    Engine::new(store).unwrap()
}

#[test]
fn test_zpop_by_rank() {
    let series = engine_with(|store| {
        store.zadd("z", 1.0, b"a").unwrap();
        store.zadd("z", 2.0, b"b").unwrap();
        store.zadd("z", 3.0, b"c").unwrap();
    });

    let popped = series
        .invoke(
            "zpop",
            &keys(&["z"]),
            &[HostValue::from("rank"), HostValue::Int(0), HostValue::Int(0), HostValue::Bool(false)],
        )
        .unwrap();
    assert_eq!(popped, HostValue::List(vec![HostValue::Bytes(b"a".to_vec())]));

    series.with_store(|store| {
        assert_eq!(
            store.zrange("z", 0, -1, false).unwrap(),
            vec![(b"b".to_vec(), 2.0), (b"c".to_vec(), 3.0)]
        );
    });
}

#[test]
fn test_zpop_by_score_with_scores() {
    let series = engine_with(|store| {
        for (i, m) in ["a", "b", "c", "d"].iter().enumerate() {
            store.zadd("z", (i + 1) as f64, m.as_bytes()).unwrap();
        }
    });

    let popped = series
        .invoke(
            "zpop",
            &keys(&["z"]),
            &[
                HostValue::from("score"),
                HostValue::Int(2),
                HostValue::Int(3),
                HostValue::Bool(false),
                HostValue::Bool(true),
            ],
        )
        .unwrap();
    assert_eq!(
        popped,
        HostValue::List(vec![
            HostValue::Bytes(b"b".to_vec()),
            HostValue::Int(2),
            HostValue::Bytes(b"c".to_vec()),
            HostValue::Int(3),
        ])
    );
    assert_eq!(series.with_store(|store| store.zcard("z").unwrap()), 2);
}

#[test]
fn test_zdiffstore_score_agnostic() {
    let series = engine_with(|store| {
        store.zadd("dest", 1.0, b"a").unwrap();
        store.zadd("dest", 2.0, b"b").unwrap();
        store.zadd("src", 1.0, b"a").unwrap();
    });

    let count = series
        .invoke_multi("zdiffstore", &keys(&["dest", "dest", "src"]), &[HostValue::Bool(false)])
        .unwrap();
    assert_eq!(count, HostValue::Int(1));
    series.with_store(|store| {
        assert_eq!(store.zrange("dest", 0, -1, false).unwrap(), vec![(b"b".to_vec(), 2.0)]);
    });
}

#[test]
fn test_zdiffstore_scores_cancel() {
    let series = engine_with(|store| {
        store.zadd("dest", 1.0, b"a").unwrap();
        store.zadd("dest", 2.0, b"b").unwrap();
        store.zadd("src", 1.0, b"a").unwrap();
        store.zadd("src", 0.5, b"b").unwrap();
    });

    let count = series
        .invoke_multi("zdiffstore", &keys(&["dest", "dest", "src"]), &[HostValue::Bool(true)])
        .unwrap();
    assert_eq!(count, HostValue::Int(1));
    series.with_store(|store| {
        assert_eq!(store.zscore("dest", b"a").unwrap(), None);
        assert_eq!(store.zscore("dest", b"b").unwrap(), Some(1.5));
    });
}

#[test]
fn test_zdiffstore_needs_invoke_multi() {
    let series = engine_with(|_| {});
    let err = series
        .invoke("zdiffstore", &keys(&["dest", "src"]), &[])
        .unwrap_err();
    assert!(err.to_string().contains("only one timeseries permitted"));
}

#[test]
fn test_filter_ids_from_script() {
    let series = Arc::new(engine_with(|store| {
        for (id, age) in [("1", "17"), ("2", "42"), ("3", "65")] {
            store.sadd("people", id.as_bytes()).unwrap();
            store.hset(&format!("person:{}", id), "age", age.as_bytes()).unwrap();
        }
    }));
    let interp = Interpreter::open(true).unwrap();
    engine::register(&interp, "ts", Arc::clone(&series)).unwrap();

    let added = interp
        .execute(
            br#"
            local meta = {namespace = 'person', fields = {'age'}}
            return ts.invoke_multi('filter_ids', {'adults', 'people'}, {meta, 'record.age >= 18'})
            "#,
        )
        .unwrap();
    assert_eq!(added, HostValue::Int(2));

    series.with_store(|store| {
        let mut adults = store.smembers("adults").unwrap();
        adults.sort();
        assert_eq!(adults, vec![b"2".to_vec(), b"3".to_vec()]);
        assert_eq!(store.smembers("people").unwrap().len(), 3);
    });
}

#[test]
fn test_move2set_round_trip() {
    let series = engine_with(|store| {
        store.sadd("tags", b"x").unwrap();
        store.sadd("tags", b"y").unwrap();
        store.expire("tags", Duration::from_secs(600));
        store.hset("hash", "f", b"v").unwrap();
    });

    let converted = series
        .invoke_multi("move2set", &keys(&["tags", "hash"]), &[HostValue::from("z")])
        .unwrap();
    assert_eq!(converted, HostValue::Int(1));
    series.with_store(|store| {
        assert_eq!(store.key_type("tags"), KeyType::SortedSet);
        assert_eq!(store.key_type("hash"), KeyType::Hash);
        assert!(store.ttl("tags").is_some());
    });

    assert!(
        series
            .invoke_multi("move2set", &keys(&["tags"]), &[HostValue::from("q")])
            .is_err()
    );
}

#[test]
fn test_stats_from_script() {
    let series = Arc::new(engine_with(|_| {}));
    let interp = Interpreter::open(true).unwrap();
    engine::register(&interp, "ts", Arc::clone(&series)).unwrap();

    let result = interp
        .execute(
            br#"
            ts.invoke('add', {'s'}, {1, 1, 2, 2, 3, 3, 4, 4})
            ts.invoke('add', {'single'}, {1, 7})
            local full = ts.invoke('stats', {'s'}, {'-inf', '+inf'})
            local sparse = ts.invoke('stats', {'single'}, {'-inf', '+inf'})
            return full.fields.value.mean, full.fields.value.min, full.fields.value.max,
                   full.fields.value.count, sparse.fields.value == nil
            "#,
        )
        .unwrap();
    assert_eq!(
        result,
        HostValue::List(vec![
            HostValue::Float(2.5),
            HostValue::Int(1),
            HostValue::Int(4),
            HostValue::Int(4),
            HostValue::Bool(true),
        ])
    );
}

#[test]
fn test_multi_stats_with_fields() {
    let series = engine_with(|_| {});
    for (k, offset) in [("x", 0), ("y", 100)] {
        let samples: Vec<HostValue> = (1..=4)
            .flat_map(|t| {
                [
                    HostValue::Int(t),
                    HostValue::map([
                        ("open", HostValue::Int(t + offset)),
                        ("close", HostValue::Int(t * 2 + offset)),
                    ]),
                ]
            })
            .collect();
        series.invoke("add", &keys(&[k]), &samples).unwrap();
    }
    // y has no entry at t = 2, so only three rows are complete
    series.invoke("pop", &keys(&["y"]), &[HostValue::Int(2)]).unwrap();

    let result = series
        .invoke_multi(
            "multi_stats",
            &keys(&["x", "y"]),
            &[
                HostValue::Int(0),
                HostValue::Int(10),
                HostValue::List(vec![HostValue::from("open")]),
            ],
        )
        .unwrap();
    assert_eq!(result.get("N"), Some(&HostValue::Int(3)));
    assert_eq!(
        result.get("fields"),
        Some(&HostValue::List(vec![HostValue::from("x:open"), HostValue::from("y:open")]))
    );
    assert_eq!(
        result.get("sum"),
        Some(&HostValue::List(vec![HostValue::Int(8), HostValue::Int(308)]))
    );
}
