//! Lua scripting bridge with a time series command engine
//!
//! An embedded Lua 5.4 VM that host code drives through a small facade, and
//! a command engine over sorted sets that scripts reach as a registered
//! library.
//!
//! # Architecture
//!
//! - **Interpreter**: owns the VM and the lock that guards it; executes
//!   scripts and routes script calls back into registered host objects
//! - **Marshaling**: converts between VM values and `HostValue`
//! - **Host objects**: anything implementing `HostObject` can be exposed to
//!   scripts as a library table
//! - **Engine**: time series, statistics and sorted-set commands over any
//!   `Store`
//!
//! # Example Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use luaseries::{Engine, HostValue, Interpreter, MemoryStore};
//!
//! let interpreter = Interpreter::open(true)?;
//! let series = Arc::new(Engine::new(MemoryStore::new())?);
//! luaseries::engine::register(&interpreter, "ts", series)?;
//!
//! let size = interpreter.execute(br#"
//!     ts.invoke('add', {'prices'}, {1000, 'x', 2000, 'y'})
//!     return ts.invoke('size', {'prices'})
//! "#)?;
//! assert_eq!(size, HostValue::Int(2));
//! ```

// Bridge
pub mod cjson;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod interpreter;
pub mod marshal;
pub mod value;

// Command engine
pub mod command;
pub mod engine;
pub mod stats;
pub mod store;
pub mod timeseries;
pub mod zset;

// Python host
#[cfg(feature = "python")]
pub mod python_bindings;
#[cfg(feature = "python")]
pub mod python_object;

// Re-export main types for convenience
pub use command::Command;
pub use config::{Encoding, InterpreterConfig};
pub use dispatcher::{FnObject, HostObject};
pub use engine::Engine;
pub use error::{Error, Result};
pub use interpreter::{Interpreter, StdLibrary};
pub use store::{KeyType, MemoryStore, Store, StoreError};
pub use value::HostValue;
