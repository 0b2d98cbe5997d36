use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mlua::{Lua, LuaOptions, MultiValue, StdLib, Value};
use parking_lot::ReentrantMutex;
use tracing::{debug, trace, warn};

use crate::cjson;
use crate::config::{Encoding, InterpreterConfig};
use crate::dispatcher::HostObject;
use crate::error::{Error, Result};
use crate::marshal;
use crate::value::HostValue;

/// Standard libraries that can be opened by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdLibrary {
    Base,
    Table,
    String,
    Math,
    Debug,
    Coroutine,
    Package,
    Os,
    Io,
    Json,
}

impl StdLibrary {
    pub const ALL: [StdLibrary; 10] = [
        StdLibrary::Base,
        StdLibrary::Table,
        StdLibrary::String,
        StdLibrary::Math,
        StdLibrary::Debug,
        StdLibrary::Coroutine,
        StdLibrary::Package,
        StdLibrary::Os,
        StdLibrary::Io,
        StdLibrary::Json,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StdLibrary::Base => "base",
            StdLibrary::Table => "table",
            StdLibrary::String => "string",
            StdLibrary::Math => "math",
            StdLibrary::Debug => "debug",
            StdLibrary::Coroutine => "coroutine",
            StdLibrary::Package => "package",
            StdLibrary::Os => "os",
            StdLibrary::Io => "io",
            StdLibrary::Json => cjson::MODULE_NAME,
        }
    }

    /// Resolve a library name. `""` and `"_G"` are aliases of the base library.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "" | "_G" => Some(StdLibrary::Base),
            _ => Self::ALL.into_iter().find(|lib| lib.name() == name),
        }
    }

    fn flag(self) -> Option<StdLib> {
        match self {
            StdLibrary::Base | StdLibrary::Json => None,
            StdLibrary::Table => Some(StdLib::TABLE),
            StdLibrary::String => Some(StdLib::STRING),
            StdLibrary::Math => Some(StdLib::MATH),
            StdLibrary::Debug => Some(StdLib::DEBUG),
            StdLibrary::Coroutine => Some(StdLib::COROUTINE),
            StdLibrary::Package => Some(StdLib::PACKAGE),
            StdLibrary::Os => Some(StdLib::OS),
            StdLibrary::Io => Some(StdLib::IO),
        }
    }
}

/// A registered library: one host object plus the method names exposed from it
struct Library {
    name: String,
    object: Arc<dyn HostObject>,
    methods: Vec<String>,
}

/// Library registry, stored in the VM's application data.
///
/// VM closures never hold the host object itself, only a `CallableHandle`
/// into this table. The registry owns the host objects for as long as the
/// interpreter lives.
#[derive(Default)]
struct Registry {
    libraries: Vec<Library>,
    by_name: HashMap<String, usize>,
}

#[derive(Debug, Clone, Copy)]
struct CallableHandle {
    library: usize,
    method: usize,
}

#[derive(Default)]
struct LoadedLibraries(HashSet<StdLibrary>);

/// Embedded script interpreter
///
/// Owns one VM together with the lock that guards it. Every operation that
/// touches the VM (load, call, globals, registration) holds the lock for its
/// full duration. Calls from scripts back into registered host objects run
/// while the lock is already held and never try to take it again.
///
/// The lock is reentrant: a host object invoked from a script may call back
/// into the same interpreter on the same thread.
pub struct Interpreter {
    lua: Lua,
    lock: ReentrantMutex<()>,
    depth: AtomicUsize,
    config: InterpreterConfig,
}

impl Interpreter {
    /// Open a VM, optionally with the standard libraries installed
    pub fn open(load_std_libs: bool) -> Result<Self> {
        Self::with_config(InterpreterConfig {
            load_std_libs,
            ..InterpreterConfig::default()
        })
    }

    pub fn with_config(config: InterpreterConfig) -> Result<Self> {
        let libs = if config.load_std_libs {
            StdLib::ALL_SAFE | StdLib::DEBUG
        } else {
            StdLib::NONE
        };
        // SAFETY: scripts get the `debug` library and C module loading through
        // `package`. Only scripts trusted by the embedding host are executed.
        let lua = unsafe { Lua::unsafe_new_with(libs, LuaOptions::default()) };

        let mut loaded = LoadedLibraries::default();
        loaded.0.insert(StdLibrary::Base);
        if config.load_std_libs {
            cjson::install(&lua)?;
            loaded.0.extend(StdLibrary::ALL);
        }
        lua.set_app_data(Registry::default());
        lua.set_app_data(loaded);

        if let Some(limit) = config.memory_limit {
            lua.set_memory_limit(limit).map_err(Error::from_lua)?;
        }

        debug!(
            std_libs = config.load_std_libs,
            memory_limit = ?config.memory_limit,
            "interpreter opened"
        );
        Ok(Interpreter {
            lua,
            lock: ReentrantMutex::new(()),
            depth: AtomicUsize::new(0),
            config,
        })
    }

    /// Names accepted by `load_library`
    pub fn standard_libraries() -> Vec<&'static str> {
        StdLibrary::ALL.iter().map(|lib| lib.name()).collect()
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Number of script executions currently in flight (0 when idle)
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Names of the registered libraries, in registration order
    pub fn libraries(&self) -> Vec<String> {
        let _guard = self.lock.lock();
        self.lua
            .app_data_ref::<Registry>()
            .map(|registry| registry.libraries.iter().map(|lib| lib.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Expose `methods` of `object` to scripts as a global table named `name`
    ///
    /// Fails if `name` is already registered or if any method is not callable
    /// on `object`. Nothing is installed when registration fails.
    pub fn register_library(
        &self,
        name: &str,
        object: Arc<dyn HostObject>,
        methods: &[&str],
    ) -> Result<()> {
        let _guard = self.lock.lock();

        let index = {
            let registry = self
                .lua
                .app_data_ref::<Registry>()
                .ok_or_else(|| Error::Runtime("library registry is missing".to_string()))?;
            if registry.by_name.contains_key(name) {
                return Err(Error::DuplicateLibrary(name.to_string()));
            }
            registry.libraries.len()
        };
        if let Some(method) = methods.iter().find(|m| !object.is_callable(m)) {
            return Err(Error::NotCallable {
                library: name.to_string(),
                method: method.to_string(),
            });
        }

        let table = self.lua.create_table()?;
        for (position, method) in methods.iter().enumerate() {
            let handle = CallableHandle {
                library: index,
                method: position,
            };
            let function = self
                .lua
                .create_function(move |lua, args: MultiValue| dispatch(lua, handle, args))?;
            table.set(*method, function)?;
        }
        self.lua.globals().set(name, table)?;

        let mut registry = self
            .lua
            .app_data_mut::<Registry>()
            .ok_or_else(|| Error::Runtime("library registry is missing".to_string()))?;
        registry.by_name.insert(name.to_string(), index);
        registry.libraries.push(Library {
            name: name.to_string(),
            object,
            methods: methods.iter().map(|m| m.to_string()).collect(),
        });

        debug!(library = name, methods = methods.len(), "library registered");
        Ok(())
    }

    /// Open one standard library by name, at most once.
    ///
    /// Returns `Ok(false)` for unknown names so callers can test for a library.
    pub fn load_library(&self, name: &str) -> Result<bool> {
        let Some(library) = StdLibrary::from_name(name) else {
            debug!(library = name, "library not found");
            return Ok(false);
        };

        let _guard = self.lock.lock();
        if self.is_loaded(library) {
            return Ok(true);
        }
        match library.flag() {
            Some(flag) => self.lua.load_std_libs(flag).map_err(Error::from_lua)?,
            None if library == StdLibrary::Json => cjson::install(&self.lua)?,
            None => {}
        }
        if let Some(mut loaded) = self.lua.app_data_mut::<LoadedLibraries>() {
            loaded.0.insert(library);
        }

        debug!(library = library.name(), "library loaded");
        Ok(true)
    }

    fn is_loaded(&self, library: StdLibrary) -> bool {
        self.lua
            .app_data_ref::<LoadedLibraries>()
            .map(|loaded| loaded.0.contains(&library))
            .unwrap_or(false)
    }

    /// Set a global variable visible to scripts
    pub fn set_global(&self, name: &str, value: &HostValue) -> Result<()> {
        let _guard = self.lock.lock();
        let value = marshal::to_vm(&self.lua, value)?;
        self.lua.globals().set(name, value)?;
        Ok(())
    }

    /// Read a global variable
    pub fn get_global(&self, name: &str) -> Result<HostValue> {
        let _guard = self.lock.lock();
        let value: Value = self.lua.globals().get(name)?;
        self.decode(marshal::to_host(value)?)
    }

    /// Compile and run a script
    ///
    /// No results gives `HostValue::None`, one result gives that value, and
    /// several results give a `HostValue::List` of all of them.
    pub fn execute(&self, script: &[u8]) -> Result<HostValue> {
        self.execute_with_args(script, &[], &[])
    }

    /// Compile and run a script with `KEYS` and `ARGV` globals installed for
    /// the duration of the call
    pub fn execute_with_args(
        &self,
        script: &[u8],
        keys: &[HostValue],
        args: &[HostValue],
    ) -> Result<HostValue> {
        let _guard = self.lock.lock();
        let mut scope = ScriptScope::enter(self);
        if !keys.is_empty() || !args.is_empty() {
            scope.install_arguments(keys, args)?;
        }
        trace!(bytes = script.len(), keys = keys.len(), "executing script");

        let function = self
            .lua
            .load(script)
            .set_name(self.config.chunk_name.as_str())
            .into_function()
            .map_err(Error::from_lua)?;

        let results: MultiValue = function.call(()).map_err(|err| {
            let err = Error::from_lua(err);
            if let Error::NoMemory(message) = &err {
                warn!(message = %message, "script ran out of memory");
            }
            err
        })?;

        let mut values = results.into_iter().collect::<Vec<Value>>();
        let value = match values.len() {
            0 => HostValue::None,
            1 => marshal::to_host(values.remove(0))?,
            _ => HostValue::List(
                values
                    .into_iter()
                    .map(marshal::to_host)
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        self.decode(value)
    }

    /// Tear down the VM and release every registered host object
    pub fn close(self) {
        debug!(libraries = self.libraries().len(), "interpreter closed");
    }

    fn decode(&self, value: HostValue) -> Result<HostValue> {
        Ok(match self.config.encoding {
            Encoding::Bytes => value,
            Encoding::Utf8 => value.decode_utf8(),
        })
    }
}

/// Route a script call to the host object behind `handle`
fn dispatch(lua: &Lua, handle: CallableHandle, args: MultiValue) -> mlua::Result<Value> {
    let (object, method) = {
        let registry = lua
            .app_data_ref::<Registry>()
            .ok_or_else(|| mlua::Error::runtime("library registry is missing"))?;
        let library = registry
            .libraries
            .get(handle.library)
            .ok_or_else(|| mlua::Error::runtime("stale library handle"))?;
        let method = library
            .methods
            .get(handle.method)
            .ok_or_else(|| mlua::Error::runtime("stale method handle"))?;
        (Arc::clone(&library.object), method.clone())
    };

    let mut host_args = Vec::with_capacity(args.len());
    for arg in args {
        host_args.push(marshal::to_host(arg).map_err(mlua::Error::external)?);
    }
    trace!(method = %method, args = host_args.len(), "dispatching host call");

    let result = object.call(&method, host_args).map_err(mlua::Error::external)?;
    marshal::to_vm(lua, &result).map_err(mlua::Error::external)
}

/// Per-execution guard.
///
/// Tracks the in-flight depth and restores `KEYS`/`ARGV` to what they were
/// before the call on every exit path, so nothing set for one script is
/// visible to the next.
struct ScriptScope<'a> {
    interpreter: &'a Interpreter,
    saved: Option<(Value, Value)>,
}

impl<'a> ScriptScope<'a> {
    fn enter(interpreter: &'a Interpreter) -> ScriptScope<'a> {
        interpreter.depth.fetch_add(1, Ordering::SeqCst);
        ScriptScope {
            interpreter,
            saved: None,
        }
    }

    fn install_arguments(&mut self, keys: &[HostValue], args: &[HostValue]) -> Result<()> {
        let lua = &self.interpreter.lua;
        let globals = lua.globals();
        if self.saved.is_none() {
            self.saved = Some((globals.get("KEYS")?, globals.get("ARGV")?));
        }
        globals.set("KEYS", marshal::to_vm(lua, &HostValue::List(keys.to_vec()))?)?;
        globals.set("ARGV", marshal::to_vm(lua, &HostValue::List(args.to_vec()))?)?;
        Ok(())
    }
}

impl Drop for ScriptScope<'_> {
    fn drop(&mut self) {
        if let Some((keys, args)) = self.saved.take() {
            let globals = self.interpreter.lua.globals();
            if let Err(err) = globals.set("KEYS", keys).and_then(|_| globals.set("ARGV", args)) {
                warn!(error = %err, "failed to restore script arguments");
            }
        }
        self.interpreter.depth.fetch_sub(1, Ordering::SeqCst);
    }
}
