//! Conversion between host values and VM values
//!
//! This is the only module that builds or inspects VM values on behalf of the
//! rest of the crate. Strings cross the boundary as raw bytes; decoding them to
//! text is left to the caller (see `InterpreterConfig::encoding`).

use std::ffi::c_void;

use mlua::{Lua, Table, Value};

use crate::error::{Error, Result};
use crate::value::HostValue;

/// Convert a VM value into a host value.
///
/// Numbers equal to their own truncation come back as integers. A table whose
/// keys form a dense `1..=N` run comes back as a sequence; any other table
/// comes back as a mapping. A table that contains itself, or nesting deeper
/// than `MAX_DEPTH`, is a type error.
pub fn to_host(value: Value) -> Result<HostValue> {
    to_host_within(value, &mut Vec::new())
}

/// Deepest table nesting accepted by `to_host`
pub const MAX_DEPTH: usize = 200;

/// `path` holds the tables currently being converted, outermost first
fn to_host_within(value: Value, path: &mut Vec<*const c_void>) -> Result<HostValue> {
    match value {
        Value::Nil => Ok(HostValue::None),
        Value::Boolean(b) => Ok(HostValue::Bool(b)),
        Value::Integer(i) => Ok(HostValue::Int(i)),
        Value::Number(n) => Ok(HostValue::number(n)),
        Value::String(s) => Ok(HostValue::Bytes(s.as_bytes().to_vec())),
        Value::Table(table) => {
            let pointer = table.to_pointer();
            if path.contains(&pointer) {
                return Err(Error::type_error("cannot convert a recursive table"));
            }
            if path.len() >= MAX_DEPTH {
                return Err(Error::type_error(format!(
                    "cannot convert tables nested deeper than {}",
                    MAX_DEPTH
                )));
            }
            path.push(pointer);
            let converted = table_to_host(table, path);
            path.pop();
            converted
        }
        other => Err(Error::type_error(format!(
            "cannot convert VM value of type '{}' to a host value",
            other.type_name()
        ))),
    }
}

fn table_to_host(table: Table, path: &mut Vec<*const c_void>) -> Result<HostValue> {
    let mut entries = Vec::new();
    for pair in table.pairs::<Value, Value>() {
        let (key, value) = pair.map_err(Error::from_lua)?;
        entries.push((key, value));
    }

    if let Some(positions) = dense_positions(&entries) {
        let mut items: Vec<Option<HostValue>> = vec![None; entries.len()];
        for ((_, value), position) in entries.into_iter().zip(positions) {
            items[position] = Some(to_host_within(value, path)?);
        }
        return Ok(HostValue::List(items.into_iter().flatten().collect()));
    }

    let mut map = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        map.push((to_host_within(key, path)?, to_host_within(value, path)?));
    }
    Ok(HostValue::Map(map))
}

/// Zero-based slot of every key when the keys are exactly `1..=entries.len()`
fn dense_positions(entries: &[(Value, Value)]) -> Option<Vec<usize>> {
    let len = entries.len();
    let mut seen = vec![false; len];
    let mut positions = Vec::with_capacity(len);
    for (key, _) in entries {
        let index = match key {
            Value::Integer(i) => *i,
            Value::Number(n) if *n == n.trunc() => *n as i64,
            _ => return None,
        };
        if index < 1 || index as usize > len {
            return None;
        }
        let slot = index as usize - 1;
        if seen[slot] {
            return None;
        }
        seen[slot] = true;
        positions.push(slot);
    }
    Some(positions)
}

/// Convert a host value into a VM value.
///
/// Fails with a type error for host values that have no VM representation.
/// Partially built tables are simply dropped, so a failure never leaves
/// anything behind in the VM.
pub fn to_vm(lua: &Lua, value: &HostValue) -> Result<Value> {
    match value {
        HostValue::None => Ok(Value::Nil),
        HostValue::Bool(b) => Ok(Value::Boolean(*b)),
        HostValue::Int(i) => Ok(Value::Integer(*i)),
        HostValue::Float(f) => Ok(Value::Number(*f)),
        HostValue::Bytes(b) => Ok(Value::String(lua.create_string(b)?)),
        HostValue::Text(s) => Ok(Value::String(lua.create_string(s)?)),
        HostValue::List(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, to_vm(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        HostValue::Map(entries) => {
            let table = lua.create_table()?;
            for (key, item) in entries {
                let key = to_vm(lua, key)?;
                if key.is_nil() {
                    return Err(Error::type_error("mapping keys cannot be None"));
                }
                table.set(key, to_vm(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        HostValue::Object(_) => Err(Error::type_error(format!(
            "host value of type '{}' has no VM representation",
            value.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn round_trip(lua: &Lua, value: HostValue) -> HostValue {
        let vm = to_vm(lua, &value).unwrap();
        to_host(vm).unwrap()
    }

    #[test]
    fn test_scalars_round_trip() {
        let lua = Lua::new();
        assert_eq!(round_trip(&lua, HostValue::None), HostValue::None);
        assert_eq!(round_trip(&lua, HostValue::Bool(true)), HostValue::Bool(true));
        assert_eq!(round_trip(&lua, HostValue::Int(-7)), HostValue::Int(-7));
        assert_eq!(round_trip(&lua, HostValue::Float(2.5)), HostValue::Float(2.5));
        assert_eq!(
            round_trip(&lua, HostValue::Bytes(b"abc".to_vec())),
            HostValue::Bytes(b"abc".to_vec())
        );
    }

    #[test]
    fn test_integral_float_becomes_int() {
        let lua = Lua::new();
        assert_eq!(round_trip(&lua, HostValue::Float(2.0)), HostValue::Int(2));
    }

    #[test]
    fn test_text_comes_back_as_bytes() {
        let lua = Lua::new();
        assert_eq!(
            round_trip(&lua, HostValue::from("hi")),
            HostValue::Bytes(b"hi".to_vec())
        );
    }

    #[test]
    fn test_sequence_and_mapping() {
        let lua = Lua::new();
        let list = HostValue::List(vec![HostValue::Int(1), HostValue::Int(2), HostValue::Int(3)]);
        assert_eq!(round_trip(&lua, list.clone()), list);

        let map = HostValue::Map(vec![
            (HostValue::Bytes(b"a".to_vec()), HostValue::Int(1)),
            (HostValue::Int(10), HostValue::Bool(false)),
        ]);
        assert_eq!(round_trip(&lua, map.clone()), map);
    }

    #[test]
    fn test_sparse_table_is_mapping() {
        let lua = Lua::new();
        let value: Value = lua.load("return {[1] = 'a', [3] = 'c'}").eval().unwrap();
        match to_host(value).unwrap() {
            HostValue::Map(entries) => assert_eq!(entries.len(), 2),
            other => panic!("Expected Map, got {:?}", other),
        }
    }

    #[test]
    fn test_dense_table_from_script() {
        let lua = Lua::new();
        let value: Value = lua.load("return {10, 20.0, 'x'}").eval().unwrap();
        assert_eq!(
            to_host(value).unwrap(),
            HostValue::List(vec![
                HostValue::Int(10),
                HostValue::Int(20),
                HostValue::Bytes(b"x".to_vec()),
            ])
        );
    }

    #[test]
    fn test_object_is_rejected() {
        let lua = Lua::new();
        let object = HostValue::Object(Arc::new(5u32));
        assert!(matches!(to_vm(&lua, &object), Err(Error::Type(_))));

        let nested = HostValue::List(vec![HostValue::Int(1), object]);
        assert!(matches!(to_vm(&lua, &nested), Err(Error::Type(_))));
    }

    #[test]
    fn test_function_is_rejected() {
        let lua = Lua::new();
        let value: Value = lua.load("return function() end").eval().unwrap();
        assert!(matches!(to_host(value), Err(Error::Type(_))));
    }

    #[test]
    fn test_recursive_table_is_rejected() {
        let lua = Lua::new();
        let value: Value = lua.load("local t = {} t.me = t return t").eval().unwrap();
        match to_host(value) {
            Err(Error::Type(message)) => assert!(message.contains("recursive")),
            other => panic!("Expected Type, got {:?}", other),
        }

        let value: Value = lua
            .load("local a = {} local b = {a} a[1] = b return {1, a}")
            .eval()
            .unwrap();
        assert!(matches!(to_host(value), Err(Error::Type(_))));
    }

    #[test]
    fn test_shared_table_is_not_recursive() {
        let lua = Lua::new();
        let value: Value = lua.load("local s = {1} return {s, s}").eval().unwrap();
        let inner = HostValue::List(vec![HostValue::Int(1)]);
        assert_eq!(to_host(value).unwrap(), HostValue::List(vec![inner.clone(), inner]));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let lua = Lua::new();
        let value: Value = lua
            .load("local t = {} for _ = 1, 100000 do t = {t} end return t")
            .eval()
            .unwrap();
        assert!(matches!(to_host(value), Err(Error::Type(_))));
    }
}
