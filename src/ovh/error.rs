//! Error types for the OVH gateway.

use thiserror::Error;

/// Errors raised by the OVH gateway.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OvhGatewayError {
    /// Raised when the gateway cannot be constructed from its settings.
    #[error("invalid OVH configuration: {0}")]
    Config(String),
    /// Raised when the HTTP request cannot be sent or the response read.
    #[error("OVH request {method} {path} failed: {message}")]
    Transport {
        /// HTTP method of the failed request.
        method: String,
        /// API path of the failed request.
        path: String,
        /// Transport error message.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("OVH API returned {status} for {path}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// API path of the failed request.
        path: String,
        /// Provider message, or the raw body when none was supplied.
        message: String,
    },
    /// Raised when a request body cannot be encoded.
    #[error("failed to encode request for {path}: {message}")]
    Encode {
        /// API path of the request.
        path: String,
        /// Serialisation error message.
        message: String,
    },
    /// Raised when a successful response cannot be decoded.
    #[error("failed to decode response from {path}: {message}")]
    Decode {
        /// API path of the request.
        path: String,
        /// Deserialisation error message.
        message: String,
    },
}
