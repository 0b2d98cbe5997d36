use std::process::ExitCode;
use std::sync::Arc;

use luaseries::{Engine, HostValue, Interpreter, InterpreterConfig, MemoryStore, engine};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEMO_SCRIPT: &str = r#"
ts.invoke('add', {'prices'}, {1000, 10.5, 2000, 11, 3000, 12.25, 4000, 11.75})
local size = ts.invoke('size', {'prices'})
local window = ts.invoke('range', {'prices'}, {1500, 3500})
local stats = ts.invoke('stats', {'prices'}, {'-inf', '+inf'})
return size, window, cjson.encode(stats)
"#;

fn print_header(title: &str) {
    println!("\n{}", "=".repeat(80));
    println!("  {}", title);
    println!("{}", "=".repeat(80));
}

fn print_value(value: &HostValue) {
    match value {
        HostValue::List(items) => {
            for (i, item) in items.iter().enumerate() {
                println!("  [{}] {}", i + 1, item);
            }
        }
        other => println!("  {}", other),
    }
}

fn run(script: &[u8], keys: &[HostValue], args: &[HostValue]) -> luaseries::Result<HostValue> {
    let config = match std::env::var("LUASERIES_CONFIG") {
        Ok(json) => InterpreterConfig::from_json(&json)?,
        Err(_) => InterpreterConfig::default(),
    };
    let interpreter = Interpreter::with_config(config)?;
    let series = Arc::new(Engine::new(MemoryStore::new())?);
    engine::register(&interpreter, "ts", series)?;

    interpreter.execute_with_args(script, keys, args)
}

/// Usage: luaseries [SCRIPT [KEY...] [-- ARG...]]
///
/// Without a script, runs a short demo against an in-memory store.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut argv = std::env::args().skip(1);
    let (title, script) = match argv.next() {
        Some(path) => match std::fs::read(&path) {
            Ok(script) => (path, script),
            Err(e) => {
                error!(path = %path, error = %e, "cannot read script");
                return ExitCode::FAILURE;
            }
        },
        None => ("demo".to_string(), DEMO_SCRIPT.as_bytes().to_vec()),
    };

    let rest: Vec<String> = argv.collect();
    let split = rest.iter().position(|a| a == "--").unwrap_or(rest.len());
    let keys: Vec<HostValue> = rest[..split].iter().map(|k| HostValue::from(k.as_str())).collect();
    let args: Vec<HostValue> = rest
        .iter()
        .skip(split + 1)
        .map(|a| HostValue::from(a.as_str()))
        .collect();

    info!(script = %title, keys = keys.len(), args = args.len(), "running script");
    print_header(&format!("Script: {}", title));
    match run(&script, &keys, &args) {
        Ok(value) => {
            print_value(&value.decode_utf8());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "script failed");
            println!("  ✗ {}", e);
            ExitCode::FAILURE
        }
    }
}
