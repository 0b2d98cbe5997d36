use std::collections::HashMap;
use std::fmt;

use crate::error::Result;
use crate::value::HostValue;

/// Host object exposed to scripts as a library table
///
/// This trait abstracts the host side of a registered library. The
/// interpreter resolves every requested method name once at registration time
/// (through `is_callable`) and afterwards routes each script call to `call`,
/// with the script's arguments already converted to host values in order.
///
/// Implementations must not call back into the interpreter that invoked them
/// while holding their own locks: the interpreter lock is already held for the
/// whole script run.
pub trait HostObject: Send + Sync {
    /// Whether `method` resolves to something callable on this object
    fn is_callable(&self, method: &str) -> bool;

    /// Call `method` with positional arguments `[arg0, arg1, ...]`
    ///
    /// The single returned value is marshaled back into the VM. Returning an
    /// error raises a script-level error.
    fn call(&self, method: &str, args: Vec<HostValue>) -> Result<HostValue>;
}

type HostFn = Box<dyn Fn(Vec<HostValue>) -> Result<HostValue> + Send + Sync>;

/// Host object assembled from plain closures
///
/// ```ignore
/// let math = FnObject::new()
///     .with("double", |args| Ok(HostValue::Int(args[0].as_int().unwrap_or(0) * 2)));
/// interpreter.register_library("hostmath", Arc::new(math), &["double"])?;
/// ```
#[derive(Default)]
pub struct FnObject {
    methods: HashMap<String, HostFn>,
}

impl FnObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method (builder style)
    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<HostValue>) -> Result<HostValue> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(f));
        self
    }

    /// Names of all methods, sorted
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl HostObject for FnObject {
    fn is_callable(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn call(&self, method: &str, args: Vec<HostValue>) -> Result<HostValue> {
        match self.methods.get(method) {
            Some(f) => f(args),
            None => Err(crate::error::Error::Runtime(format!(
                "method {} not found",
                method
            ))),
        }
    }
}

impl fmt::Debug for FnObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnObject")
            .field("methods", &self.method_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_object_calls_by_name() {
        let object = FnObject::new()
            .with("len", |args| Ok(HostValue::from(args.len())))
            .with("first", |mut args| Ok(if args.is_empty() { HostValue::None } else { args.remove(0) }));

        assert!(object.is_callable("len"));
        assert!(!object.is_callable("missing"));
        assert_eq!(object.method_names(), vec!["first", "len"]);

        let result = object
            .call("len", vec![HostValue::Int(1), HostValue::Int(2)])
            .unwrap();
        assert_eq!(result, HostValue::Int(2));
        assert!(object.call("missing", vec![]).is_err());
    }
}
