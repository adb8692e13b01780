//! Typed, matchable error kinds for the core plus the JSON-RPC
//! error code each maps to.
//!
//! `anyhow` is used at the CLI/bootstrap boundary (config loading,
//! `main`); inside the core, components return `CoreError` or
//! `EmbedError` so callers can match on the failure kind instead of
//! string-sniffing a message.

use thiserror::Error;

/// Core error kinds shared by the search-facing parts of the server.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid params: {message}")]
    InvalidParams { message: String },

    /// Unknown tool name or unregistered resource URI.
    #[error("not found: {message}")]
    MethodNotFound { message: String },

    /// The search index isn't ready yet (still building, or never built).
    #[error("index not found: {message}")]
    IndexNotFound { message: String },

    #[error("embedding failed: {message}")]
    EmbeddingFailed {
        message: String,
        #[source]
        cause: Option<EmbedError>,
    },

    #[error("timeout or cancelled: {message}")]
    Timeout { message: String },

    /// A `file://` resource names a path that isn't on disk or isn't
    /// indexed.
    #[error("file not found: {message}")]
    FileNotFound { message: String },

    #[error("resource too large: {message}")]
    TooLarge { message: String },

    #[error("internal error")]
    Internal {
        #[source]
        cause: anyhow::Error,
    },
}

impl CoreError {
    /// JSON-RPC `error.code` this kind maps to.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            CoreError::InvalidParams { .. } => -32602,
            CoreError::MethodNotFound { .. } => -32601,
            CoreError::IndexNotFound { .. } => -32001,
            CoreError::EmbeddingFailed { .. } => -32002,
            CoreError::Timeout { .. } => -32003,
            CoreError::FileNotFound { .. } => -32004,
            CoreError::TooLarge { .. } => -32005,
            CoreError::Internal { .. } => -32603,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        CoreError::InvalidParams {
            message: message.into(),
        }
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        CoreError::MethodNotFound {
            message: message.into(),
        }
    }

    pub fn index_not_found(message: impl Into<String>) -> Self {
        CoreError::IndexNotFound {
            message: message.into(),
        }
    }

    pub fn file_not_found(message: impl Into<String>) -> Self {
        CoreError::FileNotFound {
            message: message.into(),
        }
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        CoreError::TooLarge {
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        CoreError::Timeout {
            message: message.into(),
        }
    }

    pub fn internal(cause: anyhow::Error) -> Self {
        CoreError::Internal { cause }
    }
}

impl From<EmbedError> for CoreError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::Cancelled { message } => CoreError::Timeout { message },
            other => CoreError::EmbeddingFailed {
                message: other.to_string(),
                cause: Some(other),
            },
        }
    }
}

/// Error kinds specific to the embedding subsystem.
#[derive(Debug, Error, Clone)]
pub enum EmbedError {
    /// HTTP 5xx, connect errors, read interruptions. Retried internally;
    /// surfaced only once retries are exhausted.
    #[error("transient backend failure: {message}")]
    Transient { message: String },

    /// Parent cancellation token fired or the deadline expired. Never
    /// retried.
    #[error("cancelled or timed out: {message}")]
    Cancelled { message: String },

    /// Operation attempted on a closed embedder. Never retried.
    #[error("embedder is closed")]
    Closed,

    /// Construction or configuration failure with a concrete remedy.
    #[error("{message}")]
    Config {
        message: String,
        remedy: Option<String>,
    },

    /// Anything uncategorized.
    #[error("internal embedding error: {message}")]
    Internal { message: String },
}

impl EmbedError {
    pub fn config(message: impl Into<String>, remedy: Option<String>) -> Self {
        EmbedError::Config {
            message: message.into(),
            remedy,
        }
    }

    /// Render a user-facing message that includes the remedy, if any.
    pub fn user_message(&self) -> String {
        match self {
            EmbedError::Config {
                message,
                remedy: Some(r),
            } => format!("{message} ({r})"),
            other => other.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EmbedError::Cancelled { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, EmbedError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonrpc_codes_match_spec_table() {
        assert_eq!(CoreError::invalid_params("x").jsonrpc_code(), -32602);
        assert_eq!(CoreError::method_not_found("x").jsonrpc_code(), -32601);
        assert_eq!(CoreError::index_not_found("x").jsonrpc_code(), -32001);
        assert_eq!(CoreError::file_not_found("x").jsonrpc_code(), -32004);
        assert_eq!(CoreError::too_large("x").jsonrpc_code(), -32005);
        assert_eq!(CoreError::timeout("x").jsonrpc_code(), -32003);
        assert_eq!(
            CoreError::from(EmbedError::Closed).jsonrpc_code(),
            -32002
        );
        assert_eq!(
            CoreError::from(EmbedError::Cancelled {
                message: "deadline exceeded".to_string()
            })
            .jsonrpc_code(),
            -32003
        );
    }

    #[test]
    fn cancelled_embed_error_maps_to_timeout_not_embedding_failed() {
        let core: CoreError = EmbedError::Cancelled {
            message: "cancelled".to_string(),
        }
        .into();
        assert!(matches!(core, CoreError::Timeout { .. }));
    }

    #[test]
    fn embed_error_user_message_includes_remedy() {
        let e = EmbedError::config("server unreachable", Some("start the server".to_string()));
        assert_eq!(e.user_message(), "server unreachable (start the server)");
    }
}
