//! Python bindings for the Lua bridge
//!
//! This module exposes `Interpreter` to Python using PyO3.

use std::sync::Arc;

use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyMemoryError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyBytes;

use crate::config::{Encoding, InterpreterConfig};
use crate::engine::{self, Engine};
use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::python_object::{PyHostObject, host_to_py, py_to_host};
use crate::store::MemoryStore;
use crate::value::HostValue;

create_exception!(luaseries, LuaError, PyException);
create_exception!(luaseries, LuaSyntaxError, LuaError);
create_exception!(luaseries, LuaRuntimeError, LuaError);

fn to_py_err(err: Error) -> PyErr {
    let message = err.to_string();
    match err {
        Error::Syntax(_) => LuaSyntaxError::new_err(message),
        Error::NoMemory(_) => PyMemoryError::new_err(message),
        Error::Type(_) => PyTypeError::new_err(message),
        Error::DuplicateLibrary(_) | Error::NotCallable { .. } => PyValueError::new_err(message),
        Error::Runtime(_) | Error::Command(_) | Error::Critical { .. } | Error::Store(_) => {
            LuaRuntimeError::new_err(message)
        }
    }
}

/// Script source as bytes, from either `str` or `bytes`
fn script_bytes(script: &Bound<'_, PyAny>) -> PyResult<Vec<u8>> {
    if let Ok(bytes) = script.downcast::<PyBytes>() {
        return Ok(bytes.as_bytes().to_vec());
    }
    script
        .extract::<String>()
        .map(String::into_bytes)
        .map_err(|_| PyTypeError::new_err("script must be str or bytes"))
}

fn sequence_arg(value: Option<&Bound<'_, PyAny>>) -> PyResult<Vec<HostValue>> {
    match value.map(py_to_host) {
        None | Some(HostValue::None) => Ok(Vec::new()),
        Some(HostValue::List(items)) => Ok(items),
        Some(other) => Err(PyTypeError::new_err(format!(
            "expected a sequence, got {}",
            other.type_name()
        ))),
    }
}

/// An embedded Lua interpreter
///
/// Args:
///     load_std_libs (bool): open the standard libraries and cjson
///     memory_limit (int | None): VM allocation ceiling in bytes
///     encoding (str): "bytes" returns Lua strings as bytes, "utf8" as str
///
/// Example:
///     >>> lua = LuaRuntime()
///     >>> lua.execute("return 1 + 1")
///     2
#[pyclass(name = "LuaRuntime")]
struct PyLuaRuntime {
    inner: Arc<Interpreter>,
}

#[pymethods]
impl PyLuaRuntime {
    #[new]
    #[pyo3(signature = (load_std_libs=true, memory_limit=None, encoding="bytes"))]
    fn new(load_std_libs: bool, memory_limit: Option<usize>, encoding: &str) -> PyResult<Self> {
        let encoding = match encoding {
            "bytes" => Encoding::Bytes,
            "utf8" | "utf-8" => Encoding::Utf8,
            other => {
                return Err(PyValueError::new_err(format!("unknown encoding '{}'", other)));
            }
        };
        let config = InterpreterConfig {
            load_std_libs,
            memory_limit,
            encoding,
            ..InterpreterConfig::default()
        };
        Interpreter::with_config(config)
            .map(|interpreter| PyLuaRuntime {
                inner: Arc::new(interpreter),
            })
            .map_err(to_py_err)
    }

    /// Execute a script and return its result
    ///
    /// Args:
    ///     script (str | bytes): Lua source
    ///     keys (list | None): exposed to the script as KEYS
    ///     args (list | None): exposed to the script as ARGV
    ///
    /// Raises:
    ///     LuaSyntaxError: the script does not compile
    ///     LuaRuntimeError: the script raised
    ///     MemoryError: the VM ran out of memory
    ///     TypeError: a value could not cross the bridge
    #[pyo3(signature = (script, keys=None, args=None))]
    fn execute<'py>(
        &self,
        py: Python<'py>,
        script: &Bound<'py, PyAny>,
        keys: Option<&Bound<'py, PyAny>>,
        args: Option<&Bound<'py, PyAny>>,
    ) -> PyResult<Bound<'py, PyAny>> {
        let script = script_bytes(script)?;
        let keys = sequence_arg(keys)?;
        let args = sequence_arg(args)?;

        let inner = Arc::clone(&self.inner);
        let result = py
            .detach(move || inner.execute_with_args(&script, &keys, &args))
            .map_err(to_py_err)?;
        host_to_py(py, &result)
    }

    /// Expose `methods` of `obj` to scripts as a global table `name`
    ///
    /// Raises:
    ///     ValueError: `name` is taken or a method is not callable
    fn register(&self, py: Python<'_>, name: &str, obj: Py<PyAny>, methods: Vec<String>) -> PyResult<()> {
        let methods: Vec<&str> = methods.iter().map(String::as_str).collect();
        let object = Arc::new(PyHostObject::new(obj));
        py.detach(|| self.inner.register_library(name, object, &methods))
            .map_err(to_py_err)
    }

    /// Register a command engine over a fresh in-memory store as `name`
    ///
    /// Scripts then call `name.invoke(command, keys, args)`.
    #[pyo3(signature = (name="ts"))]
    fn register_engine(&self, py: Python<'_>, name: &str) -> PyResult<()> {
        let engine = Engine::new(MemoryStore::new()).map_err(to_py_err)?;
        py.detach(|| engine::register(&self.inner, name, Arc::new(engine)))
            .map_err(to_py_err)
    }

    /// Open a standard library by name. Returns False for unknown names.
    fn load_library(&self, py: Python<'_>, name: &str) -> PyResult<bool> {
        py.detach(|| self.inner.load_library(name)).map_err(to_py_err)
    }

    fn set_global(&self, py: Python<'_>, name: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        let value = py_to_host(value);
        py.detach(|| self.inner.set_global(name, &value))
            .map_err(to_py_err)
    }

    /// Names of the registered libraries
    fn libraries(&self, py: Python<'_>) -> Vec<String> {
        py.detach(|| self.inner.libraries())
    }

    /// Names accepted by `load_library`
    #[staticmethod]
    fn standard_libraries() -> Vec<&'static str> {
        Interpreter::standard_libraries()
    }

    fn __repr__(&self, py: Python<'_>) -> String {
        let libraries = py.detach(|| self.inner.libraries());
        format!("<LuaRuntime libraries={:?}>", libraries)
    }
}

/// Python module definition
#[pymodule]
fn luaseries(m: &Bound<'_, pyo3::types::PyModule>) -> PyResult<()> {
    m.add_class::<PyLuaRuntime>()?;

    m.add("LuaError", m.py().get_type::<LuaError>())?;
    m.add("LuaSyntaxError", m.py().get_type::<LuaSyntaxError>())?;
    m.add("LuaRuntimeError", m.py().get_type::<LuaRuntimeError>())?;

    Ok(())
}
