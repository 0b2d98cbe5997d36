//! Interpreter configuration

use serde::Deserialize;

use crate::error::{Error, Result};

/// Character set used to decode VM strings returned by `execute`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Leave strings as raw bytes
    #[default]
    Bytes,
    /// Decode valid UTF-8 strings into text
    Utf8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Install the standard libraries and `cjson` when the VM is opened
    pub load_std_libs: bool,

    /// Allocation ceiling for the VM in bytes
    pub memory_limit: Option<usize>,

    pub encoding: Encoding,

    /// Chunk name reported in VM diagnostics
    pub chunk_name: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            load_std_libs: true,
            memory_limit: None,
            encoding: Encoding::Bytes,
            chunk_name: "=script".to_string(),
        }
    }
}

impl InterpreterConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(source: &str) -> Result<Self> {
        serde_json::from_str(source).map_err(|e| Error::type_error(format!("invalid config: {}", e)))
    }

    /// Bare VM: no standard libraries
    pub fn bare() -> Self {
        InterpreterConfig {
            load_std_libs: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = InterpreterConfig::from_json(r#"{"encoding": "utf8"}"#).unwrap();
        assert!(config.load_std_libs);
        assert_eq!(config.encoding, Encoding::Utf8);
        assert_eq!(config.memory_limit, None);
        assert_eq!(config.chunk_name, "=script");
    }

    #[test]
    fn test_invalid_config() {
        assert!(InterpreterConfig::from_json(r#"{"encoding": "latin1"}"#).is_err());
    }
}
