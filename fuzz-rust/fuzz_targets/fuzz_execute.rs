#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use luaseries::{Interpreter, InterpreterConfig};

fn interpreter() -> &'static Interpreter {
    static INTERPRETER: OnceLock<Interpreter> = OnceLock::new();
    INTERPRETER.get_or_init(|| {
        let config = InterpreterConfig {
            memory_limit: Some(16 * 1024 * 1024),
            ..InterpreterConfig::default()
        };
        Interpreter::with_config(config).expect("interpreter opens")
    })
}

fuzz_target!(|data: &[u8]| {
    // Skip very large inputs to avoid timeouts
    if data.len() > 4096 {
        return;
    }
    // Loops can run forever; only straight-line scripts are interesting here
    const LOOPS: [&[u8]; 5] = [b"while", b"repeat", b"for", b"goto", b"load"];
    if LOOPS.iter().any(|kw| data.windows(kw.len()).any(|w| w == *kw)) {
        return;
    }
    // Libraries that reach outside the VM
    const HOST: [&[u8]; 5] = [b"debug", b"package", b"require", b"os", b"io"];
    if HOST.iter().any(|name| data.windows(name.len()).any(|w| w == *name)) {
        return;
    }

    let interpreter = interpreter();

    // May fail with any error, but must never panic
    let _ = interpreter.execute(data);

    // Property: every exit path leaves the interpreter idle
    assert_eq!(interpreter.depth(), 0);
});
