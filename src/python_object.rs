use std::sync::Arc;

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple};

use crate::dispatcher::HostObject;
use crate::error::{Error, Result};
use crate::value::HostValue;

/// Python object registered as a script library
///
/// Every call re-acquires the GIL, converts the arguments to Python objects,
/// calls the attribute named by the method and converts the result back.
/// Python exceptions raised by the callee surface as runtime errors.
pub struct PyHostObject {
    object: Py<PyAny>,
}

impl PyHostObject {
    pub fn new(object: Py<PyAny>) -> Self {
        PyHostObject { object }
    }
}

impl HostObject for PyHostObject {
    fn is_callable(&self, method: &str) -> bool {
        Python::attach(|py| {
            self.object
                .bind(py)
                .getattr(method)
                .map(|attr| attr.is_callable())
                .unwrap_or(false)
        })
    }

    fn call(&self, method: &str, args: Vec<HostValue>) -> Result<HostValue> {
        Python::attach(|py| {
            let callable = self
                .object
                .bind(py)
                .getattr(method)
                .map_err(|e| Error::Runtime(e.to_string()))?;
            let args = args
                .iter()
                .map(|arg| host_to_py(py, arg))
                .collect::<PyResult<Vec<_>>>()
                .map_err(|e| Error::type_error(e.to_string()))?;
            let args = PyTuple::new(py, args).map_err(|e| Error::type_error(e.to_string()))?;
            let result = callable
                .call1(args)
                .map_err(|e| Error::Runtime(e.to_string()))?;
            Ok(py_to_host(&result))
        })
    }
}

/// Convert a Python object to a host value.
///
/// Anything without a direct counterpart is kept as an opaque object.
pub fn py_to_host(obj: &Bound<'_, PyAny>) -> HostValue {
    if obj.is_none() {
        return HostValue::None;
    }
    if obj.is_instance_of::<PyBool>() {
        if let Ok(b) = obj.extract::<bool>() {
            return HostValue::Bool(b);
        }
    }
    if obj.is_instance_of::<PyInt>() {
        if let Ok(i) = obj.extract::<i64>() {
            return HostValue::Int(i);
        }
    }
    if obj.is_instance_of::<PyFloat>() {
        if let Ok(f) = obj.extract::<f64>() {
            return HostValue::Float(f);
        }
    }
    if let Ok(s) = obj.downcast::<PyString>() {
        if let Ok(text) = s.to_str() {
            return HostValue::Text(text.to_string());
        }
    }
    if let Ok(b) = obj.downcast::<PyBytes>() {
        return HostValue::Bytes(b.as_bytes().to_vec());
    }
    if let Ok(dict) = obj.downcast::<PyDict>() {
        return HostValue::Map(
            dict.iter()
                .map(|(k, v)| (py_to_host(&k), py_to_host(&v)))
                .collect(),
        );
    }
    if let Ok(list) = obj.downcast::<PyList>() {
        return HostValue::List(list.iter().map(|item| py_to_host(&item)).collect());
    }
    if let Ok(tuple) = obj.downcast::<PyTuple>() {
        return HostValue::List(tuple.iter().map(|item| py_to_host(&item)).collect());
    }

    HostValue::Object(Arc::new(obj.clone().unbind()))
}

/// Convert a host value to a Python object
pub fn host_to_py<'py>(py: Python<'py>, value: &HostValue) -> PyResult<Bound<'py, PyAny>> {
    Ok(match value {
        HostValue::None => py.None().into_bound(py),
        HostValue::Bool(b) => PyBool::new(py, *b).as_any().clone(),
        HostValue::Int(i) => PyInt::new(py, *i).into_any(),
        HostValue::Float(f) => PyFloat::new(py, *f).into_any(),
        HostValue::Bytes(b) => PyBytes::new(py, b).into_any(),
        HostValue::Text(s) => PyString::new(py, s).into_any(),
        HostValue::List(items) => {
            let items = items
                .iter()
                .map(|item| host_to_py(py, item))
                .collect::<PyResult<Vec<_>>>()?;
            PyList::new(py, items)?.into_any()
        }
        HostValue::Map(entries) => {
            let dict = PyDict::new(py);
            for (k, v) in entries {
                dict.set_item(host_to_py(py, k)?, host_to_py(py, v)?)?;
            }
            dict.into_any()
        }
        HostValue::Object(obj) => obj
            .downcast_ref::<Py<PyAny>>()
            .map(|py_obj| py_obj.bind(py).clone())
            .ok_or_else(|| {
                pyo3::exceptions::PyTypeError::new_err("object was not created by Python")
            })?,
    })
}
