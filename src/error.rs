//! Custom error types for Sigil
//!
//! Provides structured error handling with context propagation
//! and user-friendly error messages.

use thiserror::Error;

/// Main error type for Sigil operations
#[derive(Error, Debug)]
pub enum SigilError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Signature loading errors
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    /// Expression evaluation errors
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Output persistence errors
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError { path: String, source: std::io::Error },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },
}

/// HTTP transport errors
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("Malformed raw message: {0}")]
    MalformedRaw(String),
}

/// Signature catalog errors
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("Signature directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Failed to read signature {path}: {source}")]
    ReadError { path: String, source: std::io::Error },

    #[error("Failed to parse signature {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("Signature has no id: {0}")]
    MissingId(String),

    #[error("No signatures selected")]
    NoneSelected,
}

/// Expression evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Script syntax error at offset {offset}: {message}")]
    SyntaxError { offset: usize, message: String },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function}: {message}")]
    BadArguments { function: String, message: String },

    #[error("Invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("External commands are disabled: {0}")]
    CommandsDisabled(String),

    #[error("Script execution failed: {0}")]
    ExecutionError(String),
}

/// Output sink errors
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    WriteError { path: String, source: std::io::Error },

    #[error("Failed to serialize record: {0}")]
    SerializeError(String),
}

impl SigilError {
    /// Create an error with additional context
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SigilError::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SigilError::Config(e) => format!("Configuration problem: {}", e.user_hint()),
            SigilError::Http(e) => format!("Network issue: {}", e.user_hint()),
            SigilError::Signature(e) => format!("Signature issue: {}", e.user_hint()),
            SigilError::Script(e) => format!("Script issue: {}", e.user_hint()),
            SigilError::Output(e) => format!("Output issue: {}", e),
            SigilError::Io(e) => format!("File system issue: {}", e),
            SigilError::WithContext { context, source } => {
                format!("{}: {}", context, source)
            }
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl UserHint for HttpError {
    fn user_hint(&self) -> String {
        match self {
            HttpError::ConnectionError(_) => {
                "Could not connect to the server. Check if it's running and accessible.".into()
            }
            HttpError::Timeout(secs) => {
                format!("Request timed out after {}s. The server may be slow or unresponsive.", secs)
            }
            HttpError::InvalidUrl(url) => {
                format!("'{}' is not a valid URL. Check the format.", url)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for SignatureError {
    fn user_hint(&self) -> String {
        match self {
            SignatureError::DirectoryNotFound(path) => {
                format!("Signature path '{}' does not exist. Pass a file or directory with -s.", path)
            }
            SignatureError::NoneSelected => {
                "No signatures matched the selection. Check the -s arguments and the --level filter.".into()
            }
            SignatureError::ParseError { path, reason } => {
                format!("'{}' is not a valid signature: {}", path, reason)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for ScriptError {
    fn user_hint(&self) -> String {
        match self {
            ScriptError::SyntaxError { offset, message } => {
                format!("Syntax error at offset {}: {}", offset, message)
            }
            ScriptError::CommandsDisabled(name) => {
                format!("'{}' runs external commands. Enable scripting.allow_external_commands to use it.", name)
            }
            _ => self.to_string(),
        }
    }
}

/// Extension trait for adding context to Result types
pub trait ResultExt<T, E> {
    fn with_context<C>(self, context: C) -> Result<T, SigilError>
    where
        C: Into<String>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<C>(self, context: C) -> Result<T, SigilError>
    where
        C: Into<String>,
    {
        self.map_err(|e| SigilError::with_context(context, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_for_missing_catalog() {
        let err: SigilError = SignatureError::DirectoryNotFound("/nope".into()).into();
        assert!(err.user_message().contains("/nope"));
    }

    #[test]
    fn test_with_context() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let result: Result<(), _> = Err(io);
        let err = result.with_context("loading payloads").unwrap_err();
        assert_eq!(err.to_string(), "loading payloads: gone");
    }
}
