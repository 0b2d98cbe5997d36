//! Error types shared by the bridge and the command engine

use thiserror::Error;

use crate::store::StoreError;

/// Result type for bridge and engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the interpreter and the engine
///
/// Nothing in this crate retries on error. Every variant is returned after the
/// interpreter lock has been released and any script globals have been cleared.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The script failed to compile
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The script compiled but raised while running
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The VM could not allocate memory for the current call
    #[error("not enough memory: {0}")]
    NoMemory(String),

    /// A value has no representation on the other side of the bridge
    #[error("type error: {0}")]
    Type(String),

    /// A library with this name is already registered
    #[error("library '{0}' is already registered")]
    DuplicateLibrary(String),

    /// A requested method does not resolve to a callable on the host object
    #[error("'{method}' is not callable on library '{library}'")]
    NotCallable { library: String, method: String },

    /// A command was invoked with the wrong keys or arguments
    #[error("{0}")]
    Command(String),

    /// More than one entry was removed for a timestamp that must be unique
    #[error("critical error while removing timestamp {timestamp} from {key}: {removed} entries removed")]
    Critical {
        key: String,
        timestamp: String,
        removed: usize,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Shorthand for a command contract violation
    pub fn command(message: impl Into<String>) -> Self {
        Error::Command(message.into())
    }

    /// Shorthand for a marshaling failure
    pub fn type_error(message: impl Into<String>) -> Self {
        Error::Type(message.into())
    }

    /// Classify an error raised by the VM.
    ///
    /// Host errors travel through the VM wrapped in callback errors. The chain
    /// is unwrapped so marshaling failures keep their `Type` classification;
    /// any other host failure is reported as a runtime error carrying the
    /// original message.
    pub fn from_lua(err: mlua::Error) -> Self {
        match err {
            mlua::Error::SyntaxError { message, .. } => Error::Syntax(message),
            mlua::Error::MemoryError(message) => Error::NoMemory(message),
            mlua::Error::RuntimeError(message) => Error::Runtime(message),
            mlua::Error::CallbackError { cause, .. } => Self::from_lua((*cause).clone()),
            mlua::Error::ExternalError(inner) => match inner.downcast_ref::<Error>() {
                Some(Error::Type(message)) => Error::Type(message.clone()),
                Some(Error::NoMemory(message)) => Error::NoMemory(message.clone()),
                Some(other) => Error::Runtime(other.to_string()),
                None => Error::Runtime(inner.to_string()),
            },
            mlua::Error::FromLuaConversionError { .. } | mlua::Error::ToLuaConversionError { .. } => {
                Error::Type(err.to_string())
            }
            other => Error::Runtime(other.to_string()),
        }
    }
}

impl From<mlua::Error> for Error {
    fn from(err: mlua::Error) -> Self {
        Error::from_lua(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_callback_chain_keeps_type_errors() {
        let inner = mlua::Error::external(Error::type_error("cannot marshal object"));
        let wrapped = mlua::Error::CallbackError {
            traceback: String::new(),
            cause: Arc::new(inner),
        };

        match Error::from_lua(wrapped) {
            Error::Type(message) => assert_eq!(message, "cannot marshal object"),
            other => panic!("Expected Type, got {:?}", other),
        }
    }

    #[test]
    fn test_host_command_errors_become_runtime() {
        let inner = mlua::Error::external(Error::command("only one timeseries permitted for command size"));
        match Error::from_lua(inner) {
            Error::Runtime(message) => {
                assert!(message.contains("only one timeseries permitted"))
            }
            other => panic!("Expected Runtime, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_error_is_distinct() {
        let err = Error::from_lua(mlua::Error::MemoryError("out of memory".to_string()));
        assert!(matches!(err, Error::NoMemory(_)));
    }
}
