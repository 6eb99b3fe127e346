//! Extensions to the [`http`] request/response types exchanged with a [`crate::HttpTransport`].
//!
use cvlib::CorrelationVector;
use log::{debug, trace};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::{
    error::Error,
    keys::KeyManager,
    request_signer::{RequestSigner, RequestSigning},
};

/// Final URL of a response, stored in its [`http::Extensions`]
///
/// Transports insert it so errors can name the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseUrl(pub Url);

fn response_url<T>(response: &http::Response<T>) -> String {
    response
        .extensions()
        .get::<ResponseUrl>()
        .map(|u| u.0.to_string())
        .unwrap_or_default()
}

/// Extension to [`http::request::Builder`] for attaching request bodies
pub trait BodyRequestBuilder {
    /// Serialize `body` as JSON and set `Content-Type: application/json`
    fn json_body<T: Serialize + ?Sized>(self, body: &T) -> Result<http::Request<Vec<u8>>, Error>;

    /// Encode `params` as `application/x-www-form-urlencoded`
    fn form_body(self, params: &[(&str, &str)]) -> Result<http::Request<Vec<u8>>, Error>;
}

impl BodyRequestBuilder for http::request::Builder {
    fn json_body<T: Serialize + ?Sized>(self, body: &T) -> Result<http::Request<Vec<u8>>, Error> {
        let body = serde_json::to_vec(body)?;
        self.header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .map_err(std::convert::Into::into)
    }

    fn form_body(self, params: &[(&str, &str)]) -> Result<http::Request<Vec<u8>>, Error> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        self.header(
            http::header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        )
        .body(body.into_bytes())
        .map_err(std::convert::Into::into)
    }
}

/// Extension to [`http::request::Builder`] for adding [`cvlib::CorrelationVector`] to request headers
pub trait CorrelationVectorRequestBuilder {
    /// Add HTTP header `MS-CV` into headers
    fn add_cv(self, cv: &mut CorrelationVector) -> Result<http::request::Builder, Error>;
}

impl CorrelationVectorRequestBuilder for http::request::Builder {
    fn add_cv(self, cv: &mut CorrelationVector) -> Result<http::request::Builder, Error> {
        cv.increment();
        trace!("Injecting MS-CV: {}", cv);
        Ok(self.header("MS-CV", cv.to_string()))
    }
}

/// Extension to [`http::Request`] for signing HTTP requests according to Xbox Live specs
pub trait SigningRequest: Sized {
    /// Sign HTTP request for Xbox Live
    ///
    /// Falls back to the current time if no `timestamp` is given.
    fn sign(
        self,
        signer: &RequestSigner,
        keys: &KeyManager,
        timestamp: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Self, Error>;
}

impl SigningRequest for http::Request<Vec<u8>> {
    fn sign(
        self,
        signer: &RequestSigner,
        keys: &KeyManager,
        timestamp: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Self, Error> {
        signer.sign_request(self, keys, timestamp)
    }
}

/// Debug logging of requests and responses
pub trait LoggingHttpMessage {
    /// Log message (debug-loglevel)
    fn log(self) -> Self;
}

impl LoggingHttpMessage for http::Request<Vec<u8>> {
    fn log(self) -> Self {
        debug!(
            "[*] Request: {} {} headers={:?}, Body: {:?}",
            self.method(),
            self.uri(),
            self.headers(),
            String::from_utf8_lossy(self.body())
        );
        self
    }
}

impl LoggingHttpMessage for http::Response<Vec<u8>> {
    fn log(self) -> Self {
        debug!(
            "[*] Response: {} from {:?} headers={:?}, Body: {:?}",
            self.status(),
            response_url(&self),
            self.headers(),
            String::from_utf8_lossy(self.body())
        );
        self
    }
}

/// Turn non-success responses into [`Error::HttpError`]
pub trait ErrorForStatus: Sized {
    /// Pass 2xx responses through, fail for everything else
    fn error_for_status(self) -> Result<Self, Error>;
}

impl ErrorForStatus for http::Response<Vec<u8>> {
    fn error_for_status(self) -> Result<Self, Error> {
        if self.status().is_success() {
            return Ok(self);
        }

        Err(Error::HttpError {
            status: self.status(),
            url: response_url(&self),
            headers: self.headers().clone(),
            body: String::from_utf8_lossy(self.body()).to_string(),
        })
    }
}

/// Extension to [`http::Response`] allowing for returning more-verbose error
/// on deserialization failure
pub trait JsonExDeserializeMiddleware {
    /// Deserialize JSON response into struct implementing [`serde::de::DeserializeOwned`]
    ///
    /// If response body fails to deserialize, return verbose [`crate::Error`]
    fn json_ex<T: DeserializeOwned>(&self) -> Result<T, Error>;
}

impl JsonExDeserializeMiddleware for http::Response<Vec<u8>> {
    fn json_ex<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice::<T>(self.body()).map_err(|e| Error::JsonHttpResponseError {
            status: self.status(),
            url: response_url(self),
            headers: self.headers().clone(),
            body: String::from_utf8_lossy(self.body()).to_string(),
            inner: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &str) -> http::Response<Vec<u8>> {
        let mut resp = http::Response::builder()
            .status(status)
            .header("x-test", "1")
            .body(body.as_bytes().to_vec())
            .unwrap();
        resp.extensions_mut().insert(ResponseUrl(
            Url::parse("https://xsts.auth.xboxlive.com/xsts/authorize").unwrap(),
        ));
        resp
    }

    #[test]
    fn error_for_status_carries_details() {
        let err = response(401, "{\"XErr\":2148916233}")
            .error_for_status()
            .unwrap_err();

        match err {
            Error::HttpError {
                status,
                url,
                headers,
                body,
            } => {
                assert_eq!(status, 401);
                assert_eq!(url, "https://xsts.auth.xboxlive.com/xsts/authorize");
                assert_eq!(headers["x-test"], "1");
                assert!(body.contains("2148916233"));
            }
            other => panic!("Unexpected error: {other:?}"),
        }

        assert!(response(202, "").error_for_status().is_ok());
    }

    #[test]
    fn json_ex_verbose_error() {
        let err = response(200, "not json")
            .json_ex::<serde_json::Value>()
            .unwrap_err();

        assert!(matches!(
            err,
            Error::JsonHttpResponseError { ref body, .. } if body == "not json"
        ));
    }

    #[test]
    fn form_body_encoding() {
        let req = http::Request::post("https://login.live.com/oauth20_token.srf")
            .form_body(&[("scope", "service::user.auth.xboxlive.com::MBI_SSL"), ("code", "")])
            .unwrap();

        assert_eq!(
            req.headers()[http::header::CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(
            String::from_utf8(req.body().clone()).unwrap(),
            "scope=service%3A%3Auser.auth.xboxlive.com%3A%3AMBI_SSL&code="
        );
    }

    #[test]
    fn cv_increments() {
        let mut cv = CorrelationVector::new();
        let first = http::Request::post("https://sisu.xboxlive.com/authorize")
            .add_cv(&mut cv)
            .unwrap()
            .body(Vec::<u8>::new())
            .unwrap();
        let second = http::Request::post("https://sisu.xboxlive.com/authorize")
            .add_cv(&mut cv)
            .unwrap()
            .body(Vec::<u8>::new())
            .unwrap();

        assert_ne!(first.headers()["MS-CV"], second.headers()["MS-CV"]);
    }
}
