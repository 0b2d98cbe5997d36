//! Command engine
//!
//! `Engine` owns a store and runs named commands against it. Every command
//! runs under the store lock, so one invocation is never interleaved with
//! another on the same engine.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::command::{Args, Command, KeyArity};
use crate::dispatcher::HostObject;
use crate::error::{Error, Result};
use crate::interpreter::Interpreter;
use crate::stats::{self, Series};
use crate::store::Store;
use crate::timeseries;
use crate::value::HostValue;
use crate::zset;

pub struct Engine<S: Store> {
    store: Mutex<S>,
    /// Private VM used to evaluate `filter_ids` predicates
    predicates: Interpreter,
}

impl<S: Store> Engine<S> {
    /// Methods exposed to scripts when the engine is registered as a library
    pub const METHODS: [&'static str; 2] = ["invoke", "invoke_multi"];

    pub fn new(store: S) -> Result<Self> {
        Ok(Engine {
            store: Mutex::new(store),
            predicates: Interpreter::open(true)?,
        })
    }

    /// Run a command addressing a single key
    pub fn invoke(&self, name: &str, keys: &[String], args: &[HostValue]) -> Result<HostValue> {
        let command: Command = name.parse()?;
        if keys.len() > 1 {
            return Err(Error::command(format!(
                "only one timeseries permitted for command {}",
                command
            )));
        }
        self.run(command, keys, args)
    }

    /// Run a command that may address several keys
    pub fn invoke_multi(&self, name: &str, keys: &[String], args: &[HostValue]) -> Result<HostValue> {
        let command: Command = name.parse()?;
        self.run(command, keys, args)
    }

    /// Run `f` with exclusive access to the store
    pub fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.store.lock())
    }

    pub fn into_store(self) -> S {
        self.store.into_inner()
    }

    fn run(&self, command: Command, keys: &[String], args: &[HostValue]) -> Result<HostValue> {
        command.check_keys(keys.len())?;
        debug!(command = %command, keys = ?keys, args = args.len(), write = command.is_write(), "invoking command");

        let args = Args::new(command, args);
        let mut store = self.store.lock();
        let store = &mut *store;
        match command {
            Command::Stats | Command::IStats => {
                args.require(2)?;
                let entries = if command == Command::Stats {
                    timeseries::range(&*store, &keys[0], args.score(0)?, args.score(1)?)?
                } else {
                    timeseries::irange(&*store, &keys[0], args.rank(0)?, args.rank(1)?)?
                };
                let fields = args.fields(2)?;
                let series = Series::from_entries(&entries, fields.as_deref());
                Ok(stats::univariate(&series).unwrap_or(HostValue::None))
            }
            Command::MultiStats => {
                args.require(2)?;
                let (start, stop) = (args.score(0)?, args.score(1)?);
                let fields = args.fields(2)?;
                let series = keys
                    .iter()
                    .map(|key| {
                        let entries = timeseries::range(&*store, key, start, stop)?;
                        Ok((key.clone(), Series::from_entries(&entries, fields.as_deref())))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(stats::multivariate(&series).unwrap_or(HostValue::None))
            }
            Command::ZPop | Command::ZDiffStore | Command::FilterIds | Command::Move2Set => {
                zset::execute(store, &self.predicates, command, keys, args)
            }
            _ if command.key_arity() == KeyArity::One => {
                timeseries::execute(store, command, &keys[0], args)
            }
            other => Err(Error::command(format!("command {} has no handler", other))),
        }
    }
}

fn keys_arg(value: Option<&HostValue>) -> Result<Vec<String>> {
    let Some(value) = value.filter(|v| !v.is_none()) else {
        return Ok(Vec::new());
    };
    match value {
        HostValue::Bytes(_) | HostValue::Text(_) => {
            Ok(vec![value.as_str().map_err(Error::command)?.to_string()])
        }
        other => other
            .as_list()
            .map_err(Error::command)?
            .iter()
            .map(|key| key.as_str().map(str::to_string).map_err(Error::command))
            .collect(),
    }
}

fn args_arg(value: Option<HostValue>) -> Result<Vec<HostValue>> {
    match value {
        None | Some(HostValue::None) => Ok(Vec::new()),
        Some(HostValue::List(items)) => Ok(items),
        Some(other) => Ok(other.as_list().map_err(Error::command)?.to_vec()),
    }
}

/// Scripts call `lib.invoke(name, keys, args)` and `lib.invoke_multi(name, keys, args)`
impl<S: Store + 'static> HostObject for Engine<S> {
    fn is_callable(&self, method: &str) -> bool {
        Self::METHODS.contains(&method)
    }

    fn call(&self, method: &str, args: Vec<HostValue>) -> Result<HostValue> {
        let mut args = args.into_iter();
        let name = args
            .next()
            .ok_or_else(|| Error::command(format!("{} requires a command name", method)))?;
        let name = name.as_str().map_err(Error::command)?.to_string();
        let keys = keys_arg(args.next().as_ref())?;
        let arguments = args_arg(args.next())?;

        match method {
            "invoke" => self.invoke(&name, &keys, &arguments),
            "invoke_multi" => self.invoke_multi(&name, &keys, &arguments),
            other => Err(Error::Runtime(format!("method {} not found", other))),
        }
    }
}

/// Register `engine` in `interpreter` as a library called `name`
pub fn register<S: Store + 'static>(
    interpreter: &Interpreter,
    name: &str,
    engine: Arc<Engine<S>>,
) -> Result<()> {
    interpreter.register_library(name, engine, &Engine::<S>::METHODS)
}
