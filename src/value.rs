use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Host-side value exchanged with the embedded VM
///
/// Values are primitives (bool, int, float, none), byte or text strings,
/// ordered sequences, key→value mappings, or opaque host objects. Opaque
/// objects have no VM representation: marshaling one into the VM fails.
#[derive(Clone)]
pub enum HostValue {
    /// No value / null
    None,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit floating point number
    Float(f64),

    /// Raw byte string (what the VM hands back for its strings)
    Bytes(Vec<u8>),

    /// UTF-8 text
    Text(String),

    /// Ordered sequence
    List(Vec<HostValue>),

    /// Key→value mapping. Order carries no meaning: equality ignores it.
    Map(Vec<(HostValue, HostValue)>),

    /// Language-specific object (e.g. a Python object held by a binding layer).
    /// The binding layer that created it is responsible for downcasting it.
    Object(Arc<dyn Any + Send + Sync>),
}

impl HostValue {
    /// Truthiness as the script language sees it: only `None` and `false` are false
    pub fn is_truthy(&self) -> bool {
        !matches!(self, HostValue::None | HostValue::Bool(false))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, HostValue::None)
    }

    /// Build a mapping from string keys
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        HostValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (HostValue::Text(k.into()), v))
                .collect(),
        )
    }

    /// Build a number following the integer classification rule: a float equal
    /// to its own truncation becomes an integer.
    pub fn number(n: f64) -> Self {
        if n.is_finite() && n == n.trunc() && n.abs() < i64::MAX as f64 {
            HostValue::Int(n as i64)
        } else {
            HostValue::Float(n)
        }
    }

    /// Try to extract an integer from this value.
    ///
    /// Numeric strings are accepted, since script callers routinely pass
    /// arguments as strings.
    pub fn as_int(&self) -> Result<i64, String> {
        match self {
            HostValue::Int(i) => Ok(*i),
            HostValue::Float(f) if f.is_finite() && *f == f.trunc() && f.abs() < i64::MAX as f64 => {
                Ok(*f as i64)
            }
            HostValue::Bytes(_) | HostValue::Text(_) => {
                let s = self.as_str()?;
                s.trim()
                    .parse::<i64>()
                    .map_err(|_| format!("Cannot convert {:?} to int", s))
            }
            _ => Err(format!("Cannot convert {:?} to int", self)),
        }
    }

    /// Try to extract a float from this value (numeric strings accepted)
    pub fn as_float(&self) -> Result<f64, String> {
        match self {
            HostValue::Float(f) => Ok(*f),
            HostValue::Int(i) => Ok(*i as f64),
            HostValue::Bytes(_) | HostValue::Text(_) => {
                let s = self.as_str()?;
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| format!("Cannot convert {:?} to float", s))
            }
            _ => Err(format!("Cannot convert {:?} to float", self)),
        }
    }

    /// Try to view this value as text. Byte strings must be valid UTF-8.
    pub fn as_str(&self) -> Result<&str, String> {
        match self {
            HostValue::Text(s) => Ok(s),
            HostValue::Bytes(b) => {
                std::str::from_utf8(b).map_err(|_| "Byte string is not valid UTF-8".to_string())
            }
            _ => Err(format!("Cannot convert {:?} to string", self)),
        }
    }

    /// Try to extract a boolean. Numbers and strings follow the usual
    /// command-argument conventions ("1", "true", 1).
    pub fn as_bool(&self) -> Result<bool, String> {
        match self {
            HostValue::Bool(b) => Ok(*b),
            HostValue::None => Ok(false),
            HostValue::Int(i) => Ok(*i != 0),
            HostValue::Bytes(_) | HostValue::Text(_) => match self.as_str()? {
                "1" | "true" | "True" | "yes" => Ok(true),
                "" | "0" | "false" | "False" | "no" => Ok(false),
                other => Err(format!("Cannot convert {:?} to bool", other)),
            },
            _ => Err(format!("Cannot convert {:?} to bool", self)),
        }
    }

    /// Try to view this value as a sequence
    pub fn as_list(&self) -> Result<&[HostValue], String> {
        match self {
            HostValue::List(items) => Ok(items),
            // An empty VM table is indistinguishable from an empty mapping
            HostValue::Map(entries) if entries.is_empty() => Ok(&[]),
            _ => Err(format!("Cannot convert {:?} to list", self)),
        }
    }

    /// Look up a string key in a mapping
    pub fn get(&self, key: &str) -> Option<&HostValue> {
        match self {
            HostValue::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str().map(|s| s == key).unwrap_or(false))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Recursively decode valid UTF-8 byte strings into text
    pub fn decode_utf8(self) -> Self {
        match self {
            HostValue::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => HostValue::Text(text),
                Err(err) => HostValue::Bytes(err.into_bytes()),
            },
            HostValue::List(items) => {
                HostValue::List(items.into_iter().map(HostValue::decode_utf8).collect())
            }
            HostValue::Map(entries) => HostValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.decode_utf8(), v.decode_utf8()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Get the type name of this value for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::None => "none",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "float",
            HostValue::Bytes(_) => "bytes",
            HostValue::Text(_) => "text",
            HostValue::List(_) => "list",
            HostValue::Map(_) => "map",
            HostValue::Object(_) => "object",
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::None, HostValue::None) => true,
            (HostValue::Bool(a), HostValue::Bool(b)) => a == b,
            (HostValue::Int(a), HostValue::Int(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Bytes(a), HostValue::Bytes(b)) => a == b,
            (HostValue::Text(a), HostValue::Text(b)) => a == b,
            (HostValue::List(a), HostValue::List(b)) => a == b,
            (HostValue::Map(a), HostValue::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            (HostValue::Object(a), HostValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::None => write!(f, "None"),
            HostValue::Bool(b) => write!(f, "Bool({})", b),
            HostValue::Int(i) => write!(f, "Int({})", i),
            HostValue::Float(fl) => write!(f, "Float({})", fl),
            HostValue::Bytes(b) => write!(f, "Bytes({:?})", String::from_utf8_lossy(b)),
            HostValue::Text(s) => write!(f, "Text({:?})", s),
            HostValue::List(items) => f.debug_list().entries(items).finish(),
            HostValue::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            HostValue::Object(_) => write!(f, "Object(<opaque>)"),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::None => write!(f, "None"),
            HostValue::Bool(b) => write!(f, "{}", b),
            HostValue::Int(i) => write!(f, "{}", i),
            HostValue::Float(fl) => write!(f, "{}", fl),
            HostValue::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            HostValue::Text(s) => write!(f, "{}", s),
            HostValue::List(_) | HostValue::Map(_) => write!(f, "{:?}", self),
            HostValue::Object(_) => write!(f, "<object>"),
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i64> for HostValue {
    fn from(i: i64) -> Self {
        HostValue::Int(i)
    }
}

impl From<i32> for HostValue {
    fn from(i: i32) -> Self {
        HostValue::Int(i as i64)
    }
}

impl From<usize> for HostValue {
    fn from(i: usize) -> Self {
        HostValue::Int(i as i64)
    }
}

impl From<f64> for HostValue {
    fn from(f: f64) -> Self {
        HostValue::Float(f)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::Text(s)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::Text(s.to_string())
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(b: Vec<u8>) -> Self {
        HostValue::Bytes(b)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(HostValue::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        assert!(HostValue::Bool(true).is_truthy());
        assert!(!HostValue::Bool(false).is_truthy());
        assert!(!HostValue::None.is_truthy());
        // zero and empty strings are truthy in scripts
        assert!(HostValue::Int(0).is_truthy());
        assert!(HostValue::Text(String::new()).is_truthy());
    }

    #[test]
    fn test_number_classification() {
        assert_eq!(HostValue::number(2.0), HostValue::Int(2));
        assert_eq!(HostValue::number(2.5), HostValue::Float(2.5));
        assert!(matches!(HostValue::number(f64::INFINITY), HostValue::Float(_)));
    }

    #[test]
    fn test_conversions() {
        let v = HostValue::Int(42);
        assert_eq!(v.as_int().unwrap(), 42);
        assert_eq!(v.as_float().unwrap(), 42.0);

        let v = HostValue::Bytes(b"1500".to_vec());
        assert_eq!(v.as_int().unwrap(), 1500);
        assert_eq!(HostValue::from("-inf").as_float().unwrap(), f64::NEG_INFINITY);

        let v = HostValue::Text("hello".to_string());
        assert_eq!(v.as_str().unwrap(), "hello");
        assert!(HostValue::Bytes(vec![0xff, 0xfe]).as_str().is_err());
    }

    #[test]
    fn test_as_int_rejects_out_of_range_floats() {
        assert_eq!(HostValue::Float(-3.0).as_int().unwrap(), -3);
        assert!(HostValue::Float(1e300).as_int().is_err());
        assert!(HostValue::Float(f64::INFINITY).as_int().is_err());
        assert!(HostValue::Float(f64::NAN).as_int().is_err());
        assert!(HostValue::Float(2.5).as_int().is_err());
    }

    #[test]
    fn test_map_equality_ignores_order() {
        let a = HostValue::map([("a", HostValue::Int(1)), ("b", HostValue::Int(2))]);
        let b = HostValue::map([("b", HostValue::Int(2)), ("a", HostValue::Int(1))]);
        assert_eq!(a, b);
        assert_eq!(a.get("b"), Some(&HostValue::Int(2)));
    }

    #[test]
    fn test_decode_utf8_is_recursive() {
        let v = HostValue::List(vec![
            HostValue::Bytes(b"x".to_vec()),
            HostValue::Bytes(vec![0xff]),
        ]);
        assert_eq!(
            v.decode_utf8(),
            HostValue::List(vec![
                HostValue::Text("x".to_string()),
                HostValue::Bytes(vec![0xff]),
            ])
        );
    }
}
