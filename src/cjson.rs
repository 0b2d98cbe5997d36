//! JSON codec shared by the `cjson` script library and the command engine

use mlua::Lua;
use serde_json::{Map, Number, Value as Json};

use crate::error::{Error, Result};
use crate::marshal;
use crate::value::HostValue;

/// Global name of the script library
pub const MODULE_NAME: &str = "cjson";

/// Install `cjson.encode` and `cjson.decode` as a global table
pub fn install(lua: &Lua) -> Result<()> {
    let table = lua.create_table()?;

    let encode_fn = lua.create_function(|_, value: mlua::Value| {
        let host = marshal::to_host(value).map_err(mlua::Error::external)?;
        encode(&host).map_err(mlua::Error::external)
    })?;
    let decode_fn = lua.create_function(|lua, text: mlua::String| {
        let host = decode(&text.as_bytes()).map_err(mlua::Error::external)?;
        marshal::to_vm(lua, &host).map_err(mlua::Error::external)
    })?;

    table.set("encode", encode_fn)?;
    table.set("decode", decode_fn)?;
    lua.globals().set(MODULE_NAME, table)?;
    Ok(())
}

/// Encode a host value as a JSON string
pub fn encode(value: &HostValue) -> Result<String> {
    let json = to_json(value)?;
    serde_json::to_string(&json).map_err(|e| Error::type_error(e.to_string()))
}

/// Decode a JSON document into a host value
pub fn decode(bytes: &[u8]) -> Result<HostValue> {
    let json: Json = serde_json::from_slice(bytes)
        .map_err(|e| Error::Runtime(format!("invalid JSON: {}", e)))?;
    Ok(from_json(json))
}

pub fn to_json(value: &HostValue) -> Result<Json> {
    Ok(match value {
        HostValue::None => Json::Null,
        HostValue::Bool(b) => Json::Bool(*b),
        HostValue::Int(i) => Json::Number((*i).into()),
        HostValue::Float(f) => Number::from_f64(*f)
            .map(Json::Number)
            .ok_or_else(|| Error::type_error(format!("cannot encode {} as JSON", f)))?,
        HostValue::Bytes(_) | HostValue::Text(_) => {
            Json::String(value.as_str().map_err(Error::type_error)?.to_string())
        }
        HostValue::List(items) => Json::Array(items.iter().map(to_json).collect::<Result<_>>()?),
        HostValue::Map(entries) => {
            let mut object = Map::with_capacity(entries.len());
            for (key, item) in entries {
                object.insert(json_key(key)?, to_json(item)?);
            }
            Json::Object(object)
        }
        HostValue::Object(_) => {
            return Err(Error::type_error("cannot encode a host object as JSON"));
        }
    })
}

fn json_key(key: &HostValue) -> Result<String> {
    match key {
        HostValue::Bytes(_) | HostValue::Text(_) => {
            key.as_str().map(str::to_string).map_err(Error::type_error)
        }
        HostValue::Int(i) => Ok(i.to_string()),
        HostValue::Float(f) => Ok(f.to_string()),
        HostValue::Bool(b) => Ok(b.to_string()),
        other => Err(Error::type_error(format!(
            "cannot use {} as a JSON object key",
            other.type_name()
        ))),
    }
}

pub fn from_json(json: Json) -> HostValue {
    match json {
        Json::Null => HostValue::None,
        Json::Bool(b) => HostValue::Bool(b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => HostValue::Int(i),
            None => HostValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => HostValue::Text(s),
        Json::Array(items) => HostValue::List(items.into_iter().map(from_json).collect()),
        Json::Object(object) => HostValue::Map(
            object
                .into_iter()
                .map(|(k, v)| (HostValue::Text(k), from_json(v)))
                .collect(),
        ),
    }
}
