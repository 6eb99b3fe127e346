#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! XAL - Xbox Live Authentication Library for Xbox Cloud Gaming
//!
//! Authenticates a Microsoft account through the SISU flow of the Xbox app
//! and derives the tokens needed for Xbox Live web APIs and game streaming.
//!
//! Features:
//! - (Lower level) Single SISU / OAuth2 / XSTS round trips - see [`crate::XalClient`]
//! - (Higher level) Bundled flows with session caching - see [`crate::flows`]
//! - (Standalone) HTTP Request Signing - see [`crate::RequestSigner`]
//! - Persisted tokens and proof key - see [`crate::TokenStore`]
//! - Pluggable HTTP transport - see [`crate::HttpTransport`]
//! - Extensions for [`http`] messages - see [`crate::extensions`]
//!   - Verbose errors for JSON deserialization - see [`crate::extensions::JsonExDeserializeMiddleware`]
//!   - Debug logging of requests and responses - see [`crate::extensions::LoggingHttpMessage`]
//!   - Signing HTTP requests - see [`crate::extensions::SigningRequest`]
//!   - Adding `MS-CV` header to requests - see [`crate::extensions::CorrelationVectorRequestBuilder`]
//!
//! # Quick Start
//!
//! Authenticate on the commandline and save tokens to `tokens.json`
//!
//! ```no_run
//! use xal_xcloud::{CliCallbackHandler, TokenStore, XalClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = XalClient::with_defaults()?;
//!     let mut store = TokenStore::new("tokens.json");
//!
//!     // User will be prompted on commandline to proceed with authentication
//!     if !client.authenticate_interactive(&mut store, &CliCallbackHandler).await? {
//!         eprintln!("Authentication was aborted");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! Load tokens from file, refresh them and fetch streaming tokens
//!
//! ```no_run
//! use xal_xcloud::{TokenStore, XalClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut store = TokenStore::load_from_file("tokens.json")?;
//!     let mut client = XalClient::with_defaults()?;
//!
//!     if !store.has_valid_auth_tokens() {
//!         client.refresh_tokens(&mut store).await?;
//!     }
//!
//!     let tokens = client.get_streaming_token(&store).await?;
//!     println!("xHome market: {}", tokens.xhome.market());
//!     println!("xCloud token: {}", tokens.xcloud.gs_token);
//!     Ok(())
//! }
//! ```
//!
//! Sending a signed request with a persisted proof key
//!
//! ```no_run
//! use xal_xcloud::{
//!     extensions::{CorrelationVectorRequestBuilder, SigningRequest},
//!     cvlib::CorrelationVector,
//!     HttpTransport, KeyManager, ReqwestTransport, RequestSigner, TokenStore, Error,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = TokenStore::load_from_file("tokens.json")?;
//!     let keys = KeyManager::from_jwt_keys(
//!         store.jwt_keys().ok_or(Error::GeneralError("No proof key".into()))?,
//!     )?;
//!
//!     let mut cv = CorrelationVector::new();
//!     let request = http::Request::post("https://xsts.auth.xboxlive.com/xsts/authorize")
//!         .header("x-xbl-contract-version", "1")
//!         .add_cv(&mut cv)?
//!         .body(b"{}".to_vec())?
//!         .sign(&RequestSigner::new(), &keys, None)?;
//!
//!     let response = ReqwestTransport::new()?.send(request).await?;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! # Examples
//!
//! Check out the binaries in `demos/`.

pub use cvlib;
pub use oauth2;
pub use url;

mod client;
mod error;
mod keys;
mod models;
mod request_signer;
mod tokenstore;
mod transport;

#[cfg(test)]
mod testutil;

pub mod extensions;
pub mod flows;
pub mod tokens;

pub use client::*;
pub use error::Error;
pub use flows::{
    AuthPromptCallback, AuthPromptData, CliCallbackHandler, RedirectData, RefreshedTokens,
    StreamingTokens,
};
pub use keys::*;
pub use models::*;
pub use request_signer::*;
pub use tokens::{Token, Validity};
pub use tokenstore::*;
pub use transport::*;
