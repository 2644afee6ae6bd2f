//! Error types for the IQAir command and state APIs.

use thiserror::Error;

/// Errors raised by the codec, the interpreter and the HTTP transports.
#[derive(Debug, Error)]
pub enum IqairError {
    /// No serial number is known for the device, so no command can be built.
    #[error("serial number is not set")]
    MissingSerialNumber,

    /// A command argument cannot be encoded.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A response frame was not valid base64.
    #[error("frame decode error: {0}")]
    Decode(String),

    /// The account listing does not contain the configured device.
    #[error("device {0} not found in account")]
    DeviceNotFound(String),

    /// The state API rejected the login token (HTTP 401).
    #[error("unauthorized: login token rejected")]
    Unauthorized,

    /// Any other non-2xx response.
    #[error("unexpected HTTP status {status} from {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    /// Network failure or malformed response body.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using IqairError.
pub type Result<T> = std::result::Result<T, IqairError>;
