//! Definition of custom error type.
//!

use std::path::PathBuf;

use reqwest::header::InvalidHeaderValue;
use thiserror::Error;
use url::ParseError;

/// Custom Error type
#[derive(Error, Debug)]
pub enum Error {
    /// Xbox Live / Microsoft endpoint answered with a non-success status
    #[error("Error fetching {url}: HTTP {status}, body={body}")]
    HttpError {
        /// HTTP status code
        status: http::StatusCode,
        /// Target HTTP url
        url: String,
        /// HTTP response headers
        headers: http::HeaderMap,
        /// HTTP response body
        body: String,
    },
    /// Any failure inside the token refresh chain
    #[error("Failed to refresh tokens: {0}")]
    TokenRefreshError(#[source] Box<Error>),
    /// A token required by the operation is not present in the token store
    #[error("{0} is missing. Please authenticate first")]
    MissingToken(&'static str),
    /// Persisted JWK could not be imported as P-256 key
    #[error("Failed to import proof key")]
    KeyImportError(#[source] p256::elliptic_curve::Error),
    /// Signing failed or no key is available to sign with
    #[error("Signing error: {0}")]
    SigningError(String),
    /// Invalid HTTP Signature
    #[error("Signature error")]
    SignatureError(#[from] p256::ecdsa::Error),
    /// Token payload (or its expiry timestamp) failed to parse
    #[error("Malformed {kind}: {inner}")]
    MalformedToken {
        /// Token kind
        kind: &'static str,
        /// [`serde_json`] error
        inner: serde_json::Error,
    },
    /// Token store file does not exist
    #[error("TokenStore: File not found: {0:?}")]
    TokenStoreNotFound(PathBuf),
    /// URL failed parsing
    #[error("Url parsing failed")]
    UrlParseError(#[from] ParseError),
    /// Generic Reqwest HTTP client error
    #[error("Reqwest error: {0}")]
    ReqwestError(#[from] reqwest::Error),
    /// Failed assembling HTTP request / response
    #[error("HTTP builder error")]
    HttpBuilderError(#[from] http::Error),
    /// Invalid HTTP header
    #[error("Invalid header")]
    InvalidHeader(#[from] InvalidHeaderValue),
    /// General error
    #[error("General error: {0}")]
    GeneralError(String),
    /// JSON De/Serialization error
    #[error("JSON De/Serialization error")]
    JsonError(#[from] serde_json::Error),
    /// HTTP response failed to parse into JSON model
    #[error("HTTP JSON Deserialization")]
    JsonHttpResponseError {
        /// HTTP status code
        status: http::StatusCode,
        /// Target HTTP url
        url: String,
        /// HTTP headers
        headers: http::HeaderMap,
        /// HTTP message body
        body: String,
        /// [`serde_json`] error
        inner: serde_json::Error,
    },
    /// Base64 decoding error
    #[error("Base64 Decode error")]
    DecodeError(#[from] base64ct::Error),
    /// I/O error
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
    /// Failed processing HTTP request
    #[error("Failed processing HTTP request: {0}")]
    InvalidRequest(String),
}
