//! Error types for the host proxy.
//!
//! A single error enum covers wiring-time failures (bad version strings,
//! duplicate registrations), startup failures (listener binding), per-request
//! failures (conversion, version gating, implementation errors) and lifecycle
//! misuse. Every variant maps onto a JSON-RPC error code so the server can
//! report it on the wire.

use serde_json::{json, Value};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the host proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    // Wiring errors
    #[error("Invalid version string {input:?}: {message}")]
    Parse { input: String, message: String },

    #[error("Duplicate registration for {group} {version}")]
    DuplicateRegistration { group: String, version: String },

    // Listener errors
    #[error("Address already in use: {address}")]
    AddressInUse { address: String },

    #[error("Failed to bind {address}: {message}")]
    Bind {
        address: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Per-request errors
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("{operation} requires API version {minimum} or later, called at {version}")]
    UnsupportedVersion {
        operation: String,
        version: String,
        minimum: String,
    },

    #[error("Response field {field} cannot be represented: {message}")]
    Unrepresentable { field: String, message: String },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    // Lifecycle errors
    #[error("Server set already started")]
    AlreadyStarted,

    #[error("Server set not started")]
    NotStarted,

    #[error("Startup failed: {}", join_errors(.errors))]
    StartupFailed { errors: Vec<ProxyError> },

    #[error("Transport error on {address}: {message}")]
    Transport {
        address: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Path {0} is outside the permitted roots")]
    PathOutsideRoots(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Host command errors
    #[error("Command {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Error reported by a remote endpoint, as seen by [`crate::ipc::IpcClient`].
    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for host proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

fn strip_prefix(message: String, prefix: &str) -> String {
    match message.strip_prefix(prefix) {
        Some(rest) => rest.to_string(),
        None => message,
    }
}

fn join_errors(errors: &[ProxyError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ProxyError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ProxyError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ProxyError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application-defined codes:
    /// - -32001: Not found
    /// - -32002: Path outside permitted roots
    /// - -32003: Host command failed
    /// - -32010: Operation not available at the negotiated version
    /// - -32011: Response not representable in the negotiated wire schema
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            ProxyError::MethodNotFound(_) => -32601,
            ProxyError::InvalidArgument { .. } | ProxyError::Parse { .. } => -32602,
            ProxyError::NotFound(_) => -32001,
            ProxyError::PathOutsideRoots(_) => -32002,
            ProxyError::CommandFailed { .. } => -32003,
            ProxyError::UnsupportedVersion { .. } => -32010,
            ProxyError::Unrepresentable { .. } => -32011,
            ProxyError::Remote { code, .. } => *code,
            _ => -32603,
        }
    }

    /// Structured fields sent in the `data` member of a JSON-RPC error.
    ///
    /// Carries the variant's own fields so [`from_rpc_error`](Self::from_rpc_error)
    /// can rebuild it without re-parsing the display message.
    pub fn to_rpc_error_data(&self) -> Option<Value> {
        match self {
            ProxyError::InvalidArgument { message } => Some(json!({ "message": message })),
            ProxyError::MethodNotFound(method) => Some(json!({ "method": method })),
            ProxyError::NotFound(what) => Some(json!({ "what": what })),
            ProxyError::UnsupportedVersion {
                operation,
                version,
                minimum,
            } => Some(json!({
                "operation": operation,
                "version": version,
                "minimum": minimum,
            })),
            ProxyError::Unrepresentable { field, message } => Some(json!({
                "field": field,
                "message": message,
            })),
            _ => None,
        }
    }

    /// Rebuild a typed error from a JSON-RPC error object.
    ///
    /// Variants are restored from `data` when the peer sent it. Without it,
    /// the standard codes are rebuilt from the message and anything else
    /// falls back to [`ProxyError::Remote`].
    pub fn from_rpc_error(code: i32, message: String, data: Option<&Value>) -> Self {
        let text = |key: &str| {
            data.and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        match code {
            -32601 => ProxyError::MethodNotFound(
                text("method").unwrap_or_else(|| strip_prefix(message, "Method not found: ")),
            ),
            -32602 => ProxyError::InvalidArgument {
                message: text("message")
                    .unwrap_or_else(|| strip_prefix(message, "Invalid argument: ")),
            },
            -32001 => ProxyError::NotFound(
                text("what").unwrap_or_else(|| strip_prefix(message, "Not found: ")),
            ),
            -32010 => match (text("operation"), text("version"), text("minimum")) {
                (Some(operation), Some(version), Some(minimum)) => {
                    ProxyError::UnsupportedVersion {
                        operation,
                        version,
                        minimum,
                    }
                }
                _ => ProxyError::Remote { code, message },
            },
            -32011 => match (text("field"), text("message")) {
                (Some(field), Some(message)) => ProxyError::Unrepresentable { field, message },
                _ => ProxyError::Remote { code, message },
            },
            _ => ProxyError::Remote { code, message },
        }
    }

    /// True for errors raised before the implementation ran.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ProxyError::InvalidArgument { .. }
                | ProxyError::UnsupportedVersion { .. }
                | ProxyError::MethodNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ProxyError::invalid_argument("x").to_rpc_error_code(), -32602);
        assert_eq!(
            ProxyError::MethodNotFound("Foo".into()).to_rpc_error_code(),
            -32601
        );
        assert_eq!(
            ProxyError::UnsupportedVersion {
                operation: "Op".into(),
                version: "v1".into(),
                minimum: "v2".into(),
            }
            .to_rpc_error_code(),
            -32010
        );
        assert_eq!(
            ProxyError::Unrepresentable {
                field: "port".into(),
                message: "too large".into(),
            }
            .to_rpc_error_code(),
            -32011
        );
        assert_eq!(ProxyError::AlreadyStarted.to_rpc_error_code(), -32603);
    }

    #[test]
    fn test_rejection_classification() {
        assert!(ProxyError::invalid_argument("bad").is_rejection());
        assert!(!ProxyError::Unrepresentable {
            field: "f".into(),
            message: "m".into(),
        }
        .is_rejection());
        assert!(!ProxyError::Other("boom".into()).is_rejection());
    }

    #[test]
    fn test_startup_failed_message_lists_all_errors() {
        let err = ProxyError::StartupFailed {
            errors: vec![
                ProxyError::AddressInUse {
                    address: "/tmp/a".into(),
                },
                ProxyError::Other("second".into()),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("/tmp/a"));
        assert!(message.contains("second"));
    }

    fn over_the_wire(err: &ProxyError) -> ProxyError {
        let data = err.to_rpc_error_data();
        ProxyError::from_rpc_error(err.to_rpc_error_code(), err.to_string(), data.as_ref())
    }

    #[test]
    fn test_remote_roundtrip_keeps_code() {
        let err = ProxyError::from_rpc_error(-32003, "Command Get-Disk failed".into(), None);
        assert_eq!(err.to_rpc_error_code(), -32003);
        assert!(matches!(err, ProxyError::Remote { code: -32003, .. }));

        let err = ProxyError::from_rpc_error(-32010, "too old".into(), None);
        assert!(matches!(err, ProxyError::Remote { code: -32010, .. }));
    }

    #[test]
    fn test_invalid_argument_message_is_not_prefixed_twice() {
        let rebuilt = over_the_wire(&ProxyError::invalid_argument("disk_id is empty"));
        assert_eq!(rebuilt.to_string(), "Invalid argument: disk_id is empty");

        // Peers that send no data still lose the display prefix.
        let bare = ProxyError::from_rpc_error(-32602, "Invalid argument: size".into(), None);
        assert_eq!(bare.to_string(), "Invalid argument: size");
    }

    #[test]
    fn test_version_and_representation_errors_rebuilt_from_data() {
        let rebuilt = over_the_wire(&ProxyError::UnsupportedVersion {
            operation: "SetMutualChapSecret".into(),
            version: "v1alpha1".into(),
            minimum: "v1alpha2".into(),
        });
        match rebuilt {
            ProxyError::UnsupportedVersion {
                operation,
                version,
                minimum,
            } => {
                assert_eq!(operation, "SetMutualChapSecret");
                assert_eq!(version, "v1alpha1");
                assert_eq!(minimum, "v1alpha2");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let rebuilt = over_the_wire(&ProxyError::Unrepresentable {
            field: "target_port".into(),
            message: "70000 is out of range".into(),
        });
        match rebuilt {
            ProxyError::Unrepresentable { field, message } => {
                assert_eq!(field, "target_port");
                assert_eq!(message, "70000 is out of range");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(matches!(
            over_the_wire(&ProxyError::NotFound("disk 4".into())),
            ProxyError::NotFound(what) if what == "disk 4"
        ));
        assert!(matches!(
            over_the_wire(&ProxyError::MethodNotFound("Format".into())),
            ProxyError::MethodNotFound(method) if method == "Format"
        ));
    }
}
