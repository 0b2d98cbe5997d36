#![no_main]

use libfuzzer_sys::fuzz_target;
use luaseries::{Command, Engine, HostValue, MemoryStore};

const KEYS: [&str; 3] = ["a", "b", "c"];

fn value(byte: u8) -> HostValue {
    match byte % 6 {
        0 => HostValue::Int(i64::from(byte) * 10),
        1 => HostValue::Float(f64::from(byte) / 4.0),
        2 => HostValue::from("-inf"),
        3 => HostValue::from("+inf"),
        4 => HostValue::Int(-i64::from(byte % 4)),
        _ => HostValue::from(format!("v{}", byte)),
    }
}

fuzz_target!(|data: &[u8]| {
    let engine = Engine::new(MemoryStore::new()).expect("engine opens");

    // Each operation is: command byte, key count, argument count, arguments
    let mut bytes = data.iter().copied();
    while let (Some(c), Some(k), Some(n)) = (bytes.next(), bytes.next(), bytes.next()) {
        let command = Command::ALL[usize::from(c) % Command::ALL.len()];
        if command == Command::FilterIds {
            continue;
        }
        let keys: Vec<String> = (0..=usize::from(k % 3))
            .map(|i| KEYS[(usize::from(k) + i) % KEYS.len()].to_string())
            .collect();
        let args: Vec<HostValue> = (0..n % 6).filter_map(|_| bytes.next()).map(value).collect();

        // Errors are fine; panics are not
        let _ = engine.invoke_multi(command.name(), &keys, &args);
    }

    // Property: count over the whole score range agrees with size
    for key in KEYS {
        let keys = [key.to_string()];
        let size = engine.invoke("size", &keys, &[]);
        let count = engine.invoke(
            "count",
            &keys,
            &[HostValue::from("-inf"), HostValue::from("+inf")],
        );
        if let (Ok(size), Ok(count)) = (size, count) {
            assert_eq!(size, count);
        }
    }
});
