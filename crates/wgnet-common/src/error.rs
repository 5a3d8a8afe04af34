//! Common error types for wgnet.

use std::fmt::Display;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`WgNetError`].
pub type WgNetResult<T> = Result<T, WgNetError>;

/// Errors raised by the network engine and the plugin daemon.
#[derive(Error, Diagnostic, Debug)]
pub enum WgNetError {
    /// A required network option was not supplied.
    #[error("Missing required option: {key}")]
    #[diagnostic(
        code(wgnet::config::missing),
        help("Pass it with `docker network create -o <key>=<value>`")
    )]
    ConfigMissing {
        /// The option key.
        key: String,
    },

    /// The tunnel configuration file could not be parsed.
    #[error("Failed to parse tunnel config {path}: {message}")]
    #[diagnostic(code(wgnet::config::parse))]
    ConfigParse {
        /// Path of the configuration file.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A network option was present but malformed.
    #[error("Invalid value for option {key}: {message}")]
    #[diagnostic(code(wgnet::config::invalid_option))]
    InvalidOption {
        /// The option key.
        key: String,
        /// What went wrong.
        message: String,
    },

    /// A protocol request was malformed or asked for something unsupported.
    #[error("Invalid request: {message}")]
    #[diagnostic(code(wgnet::request::invalid))]
    InvalidRequest {
        /// What went wrong.
        message: String,
    },

    /// Network not found.
    #[error("Network not found: {id}")]
    #[diagnostic(code(wgnet::network::not_found))]
    NetworkNotFound {
        /// The network ID that was not found.
        id: String,
    },

    /// A live network already uses this ID.
    #[error("Network already exists: {id}")]
    #[diagnostic(
        code(wgnet::network::exists),
        help("Delete the existing network before creating it again")
    )]
    NetworkExists {
        /// The duplicate network ID.
        id: String,
    },

    /// Endpoint not found.
    #[error("Endpoint not found: {id}")]
    #[diagnostic(code(wgnet::endpoint::not_found))]
    EndpointNotFound {
        /// The endpoint ID that was not found.
        id: String,
    },

    /// An endpoint with this ID already exists in the network.
    #[error("Endpoint already exists: {id}")]
    #[diagnostic(code(wgnet::endpoint::exists))]
    EndpointExists {
        /// The duplicate endpoint ID.
        id: String,
    },

    /// Every address of the subnet has been handed out.
    #[error("No unused addresses remaining in {subnet}")]
    #[diagnostic(code(wgnet::ipam::exhausted))]
    AddressesExhausted {
        /// The exhausted subnet.
        subnet: String,
    },

    /// No free uplink address pair is left in the reserved range.
    #[error("No unused address pair remaining in {range}")]
    #[diagnostic(
        code(wgnet::uplink::exhausted),
        help("Remove unused links holding addresses from this range on the host")
    )]
    AddressSpaceExhausted {
        /// The scanned range.
        range: String,
    },

    /// Creating, entering or deleting a network namespace failed.
    #[error("Namespace operation {operation} failed: {message}")]
    #[diagnostic(
        code(wgnet::namespace),
        help("Namespace operations require CAP_SYS_ADMIN")
    )]
    Namespace {
        /// The operation that failed.
        operation: String,
        /// The underlying error.
        message: String,
    },

    /// A link, address or route operation failed.
    #[error("Link operation {operation} failed: {message}")]
    #[diagnostic(code(wgnet::link))]
    Link {
        /// The operation that failed.
        operation: String,
        /// The underlying error.
        message: String,
    },

    /// An iptables rule or chain operation failed.
    #[error("Rule operation {operation} failed: {message}")]
    #[diagnostic(code(wgnet::rule))]
    Rule {
        /// The operation that failed.
        operation: String,
        /// The underlying error.
        message: String,
    },

    /// The driver does not implement this protocol method.
    #[error("[{operation}] not supported")]
    #[diagnostic(code(wgnet::unsupported))]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(wgnet::serialization))]
    Serialization(String),
}

impl WgNetError {
    /// Wrap a namespace failure with the name of the operation.
    pub fn namespace(operation: impl Into<String>, err: impl Display) -> Self {
        Self::Namespace {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Wrap a link failure with the name of the operation.
    pub fn link(operation: impl Into<String>, err: impl Display) -> Self {
        Self::Link {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Wrap a rule failure with the name of the operation.
    pub fn rule(operation: impl Into<String>, err: impl Display) -> Self {
        Self::Rule {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Build a [`WgNetError::NotSupported`] for a protocol method.
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }
}

impl From<serde_json::Error> for WgNetError {
    fn from(err: serde_json::Error) -> Self {
        WgNetError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WgNetError::NetworkNotFound {
            id: "abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Network not found: abc123");
    }

    #[test]
    fn not_supported_names_operation() {
        let err = WgNetError::not_supported("Leave");
        assert_eq!(err.to_string(), "[Leave] not supported");
    }

    #[test]
    fn wrapped_errors_keep_operation() {
        let err = WgNetError::link("add bridge", "File exists (os error 17)");
        assert_eq!(
            err.to_string(),
            "Link operation add bridge failed: File exists (os error 17)"
        );
    }
}
