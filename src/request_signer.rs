//! Xbox-specific HTTP Request signing.
//!
//! The `Signature` header is `base64(version || filetime || signature)`, where
//! the signature is calculated over the canonical message:
//!
//! ```text
//! i32 version || 0x00 || u64 filetime || 0x00 || method 0x00 || path-and-query 0x00 || authorization 0x00 || body 0x00
//! ```
//!
//! All integers are big-endian, `filetime` counts 100ns intervals since 1601-01-01.

use crate::{error::Error, keys::KeyManager};
use base64ct::{Base64, Encoding};
use chrono::{prelude::*, SubsecRound};
use log::trace;
use nt_time::FileTime;
use p256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};
use sha2::{Digest, Sha256};
use std::{convert::TryFrom, str::FromStr};

/// Signing policy version used by all Xbox Live authentication endpoints
pub const SIGNING_POLICY_VERSION: i32 = 1;

/// Request signing trait
pub trait RequestSigning<Rhs = Self> {
    /// Sign a request, inserting the `Signature` header
    fn sign_request(
        &self,
        rhs: Rhs,
        keys: &KeyManager,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Rhs, Error>;
}

/// Helper structure which describes the components of a Xbox Live HTTP Signature
/// aka. the base64 value of `Signature` HTTP header
#[derive(Debug, Clone, PartialEq)]
pub struct XboxWebSignatureBytes {
    signing_policy_version: [u8; 4],
    timestamp: [u8; 8],
    signature: Signature,
}

impl XboxWebSignatureBytes {
    /// Windows FILETIME the signature was created for
    pub fn filetime(&self) -> u64 {
        u64::from_be_bytes(self.timestamp)
    }

    /// Raw ECDSA signature
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Header bytes: `4-byte version || 8-byte timestamp || 64-byte signature`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = Vec::with_capacity(76);
        bytes.extend_from_slice(&self.signing_policy_version);
        bytes.extend_from_slice(&self.timestamp);
        bytes.extend_from_slice(&self.signature.to_bytes());

        bytes
    }
}

impl TryFrom<&[u8]> for XboxWebSignatureBytes {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < 12 {
            return Err(Error::InvalidRequest(format!(
                "Signature header too short ({} bytes)",
                bytes.len()
            )));
        }

        let mut signing_policy_version = [0u8; 4];
        signing_policy_version.copy_from_slice(&bytes[..4]);
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[4..12]);

        Ok(Self {
            signing_policy_version,
            timestamp,
            signature: Signature::from_slice(&bytes[12..])?,
        })
    }
}

impl FromStr for XboxWebSignatureBytes {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bytes = Base64::decode_vec(s)?;
        Self::try_from(bytes.as_slice())
    }
}

impl std::fmt::Display for XboxWebSignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&Base64::encode_string(&self.to_bytes()))
    }
}

/// Wrapper around the parts of a HTTP request which are used to calculate
/// the signature
#[derive(Debug, Clone)]
pub struct HttpMessageToSign {
    method: String,
    path_and_query: String,
    authorization: String,
    body: Vec<u8>,
}

impl HttpMessageToSign {
    /// Assemble message parts for a POST request to `url`
    pub fn post(url: &str, authorization: &str, body: &[u8]) -> Result<Self, Error> {
        let url = url::Url::parse(url)?;
        let path_and_query = match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        };

        Ok(Self {
            method: "POST".to_owned(),
            path_and_query,
            authorization: authorization.to_owned(),
            body: body.to_vec(),
        })
    }
}

impl TryFrom<&http::Request<Vec<u8>>> for HttpMessageToSign {
    type Error = Error;

    fn try_from(request: &http::Request<Vec<u8>>) -> Result<Self, Self::Error> {
        let method = request.method().to_string().to_uppercase();
        let authorization = match request.headers().get(http::header::AUTHORIZATION) {
            Some(val) => val.to_str().map_err(|_| {
                Error::InvalidRequest(
                    "Failed serializing Authentication header to string".to_string(),
                )
            })?,
            None => "",
        }
        .to_string();

        let path_and_query = request
            .uri()
            .path_and_query()
            .ok_or(Error::InvalidRequest(
                "Failed getting path and query".to_string(),
            ))?
            .to_string();

        Ok(HttpMessageToSign {
            method,
            path_and_query,
            authorization,
            body: request.body().clone(),
        })
    }
}

/// Length-checked writer for the canonical signing message
struct MessageWriter {
    buf: Vec<u8>,
    expected_len: usize,
}

impl MessageWriter {
    fn with_len(expected_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(expected_len),
            expected_len,
        }
    }

    fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    fn nul(&mut self) -> &mut Self {
        self.buf.push(0x00);
        self
    }

    fn nul_terminated(&mut self, data: &[u8]) -> &mut Self {
        self.bytes(data).nul()
    }

    fn finish(self) -> Result<Vec<u8>, Error> {
        if self.buf.len() != self.expected_len {
            return Err(Error::SigningError(format!(
                "Canonical message has {} bytes, expected {}",
                self.buf.len(),
                self.expected_len
            )));
        }
        Ok(self.buf)
    }
}

/// Request signer
///
/// Calculates the `Signature` header for Xbox Live HTTP requests.
/// The signing key itself is owned by [`KeyManager`].
#[derive(Debug, Clone, Default)]
pub struct RequestSigner;

impl RequestSigning<http::Request<Vec<u8>>> for RequestSigner {
    fn sign_request(
        &self,
        rhs: http::Request<Vec<u8>>,
        keys: &KeyManager,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<http::Request<Vec<u8>>, Error> {
        let to_sign = HttpMessageToSign::try_from(&rhs)?;
        let signature = self.sign_message(
            SIGNING_POLICY_VERSION,
            timestamp.unwrap_or_else(Utc::now),
            &to_sign,
            keys,
        )?;

        let (mut parts, body) = rhs.into_parts();
        parts
            .headers
            .insert("Signature", signature.to_string().parse()?);

        Ok(http::Request::from_parts(parts, body))
    }
}

impl RequestSigner {
    /// Creates a new instance of [`RequestSigner`]
    pub fn new() -> Self {
        Self
    }

    /// Sign a POST request to `url`, sampling the timestamp from the system clock
    ///
    /// Returns the header bytes; base64 encode them via `to_string()` for the `Signature` header.
    pub fn sign(
        &self,
        url: &str,
        authorization: &str,
        body: &[u8],
        keys: &KeyManager,
    ) -> Result<XboxWebSignatureBytes, Error> {
        self.sign_at(url, authorization, body, keys, Utc::now())
    }

    /// Sign a POST request to `url` for the given timestamp
    pub fn sign_at(
        &self,
        url: &str,
        authorization: &str,
        body: &[u8],
        keys: &KeyManager,
        timestamp: DateTime<Utc>,
    ) -> Result<XboxWebSignatureBytes, Error> {
        let message = HttpMessageToSign::post(url, authorization, body)?;
        self.sign_message(SIGNING_POLICY_VERSION, timestamp, &message, keys)
    }

    /// Create signature from parts
    fn sign_message(
        &self,
        signing_policy_version: i32,
        timestamp: DateTime<Utc>,
        request: &HttpMessageToSign,
        keys: &KeyManager,
    ) -> Result<XboxWebSignatureBytes, Error> {
        let filetime_bytes = windows_timestamp(timestamp)?.to_be_bytes();
        let signing_policy_version_bytes = signing_policy_version.to_be_bytes();
        trace!(
            "Signing {} {} filetime={}",
            request.method,
            request.path_and_query,
            u64::from_be_bytes(filetime_bytes)
        );

        let message = RequestSigner::canonical_message(
            &signing_policy_version_bytes,
            &filetime_bytes,
            &request.method,
            &request.path_and_query,
            &request.authorization,
            &request.body,
        )?;

        Ok(XboxWebSignatureBytes {
            signing_policy_version: signing_policy_version_bytes,
            timestamp: filetime_bytes,
            signature: keys.sign_buffer(&message)?,
        })
    }

    /// Verify the signature of a HTTP request (lower level)
    pub fn verify_message(
        &self,
        signature: &XboxWebSignatureBytes,
        request: &HttpMessageToSign,
        verifier: &VerifyingKey,
    ) -> Result<(), Error> {
        let message = RequestSigner::canonical_message(
            &signature.signing_policy_version,
            &signature.timestamp,
            &request.method,
            &request.path_and_query,
            &request.authorization,
            &request.body,
        )?;

        verifier
            .verify_prehash(&Sha256::digest(&message), &signature.signature)
            .map_err(std::convert::Into::into)
    }

    /// Assemble the to-be-signed data
    ///
    /// Length is `5 + 9 + (method + 1) + (path + 1) + (authorization + 1) + (body + 1)`.
    pub fn canonical_message(
        signing_policy_version: &[u8],
        timestamp: &[u8],
        method: &str,
        path_and_query: &str,
        authorization: &str,
        body: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let method = method.to_uppercase();
        let expected_len = (signing_policy_version.len() + 1)
            + (timestamp.len() + 1)
            + (method.len() + 1)
            + (path_and_query.len() + 1)
            + (authorization.len() + 1)
            + (body.len() + 1);

        let mut writer = MessageWriter::with_len(expected_len);
        writer
            .nul_terminated(signing_policy_version)
            .nul_terminated(timestamp)
            .nul_terminated(method.as_bytes())
            .nul_terminated(path_and_query.as_bytes())
            // Authorization is terminated even if it is an empty string
            .nul_terminated(authorization.as_bytes())
            .nul_terminated(body);

        writer.finish()
    }
}

/// Convert a timestamp into Windows FILETIME (100ns ticks since 1601-01-01)
///
/// Sub-second precision is truncated before conversion.
pub fn windows_timestamp(timestamp: DateTime<Utc>) -> Result<u64, Error> {
    let filetime = FileTime::try_from(timestamp.trunc_subsecs(0))
        .map_err(|e| Error::SigningError(format!("{e}")))?;
    Ok(u64::from_be_bytes(filetime.to_be_bytes()))
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;
    use hex_literal::hex;
    use p256::SecretKey;

    const PRIVATE_KEY_PEM: &str = "MHcCAQEEIObr5IVtB+DQcn25+R9n4K/EyUUSbVvxIJY7WhVeELUuoAoGCCqGSM49AwEHoUQDQgAEOKyCQ9qH5U4lZcS0c5/LxIyKvOpKe0l3x4Eg5OgDbzezKNLRgT28fd4Fq3rU/1OQKmx6jSq0vTB5Ao/48m0iGg==";

    fn key_manager_from_der(b64: &str) -> KeyManager {
        let private_key = Base64::decode_vec(b64).expect("Failed deserializing EC private key");
        KeyManager::from_secret_key(
            SecretKey::from_sec1_der(&private_key).expect("Failed deserializing private key"),
        )
    }

    fn test_message() -> HttpMessageToSign {
        HttpMessageToSign {
            method: "POST".to_owned(),
            path_and_query: "/path?query=1".to_owned(),
            authorization: "XBL3.0 x=userid;jsonwebtoken".to_owned(),
            body: b"thebodygoeshere".to_vec(),
        }
    }

    #[test]
    fn windows_epoch_conversion() {
        let dt = Utc.timestamp_opt(1586999965, 0).unwrap();
        assert_eq!(
            windows_timestamp(dt).unwrap(),
            (1586999965u64 + 11644473600) * 10_000_000
        );

        // Sub-second part does not leak into the filetime
        let dt_fraction = Utc.timestamp_opt(1586999965, 999_000_000).unwrap();
        assert_eq!(
            windows_timestamp(dt_fraction).unwrap(),
            windows_timestamp(dt).unwrap()
        );
    }

    #[test]
    fn sign() {
        let keys = key_manager_from_der(PRIVATE_KEY_PEM);
        let signer = RequestSigner::new();
        let dt = Utc.timestamp_opt(1586999965, 0).unwrap();
        let request = test_message();

        let signature = signer
            .sign_message(1, dt, &request, &keys)
            .expect("Signing failed!");

        signer
            .verify_message(&signature, &request, &keys.verifying_key().unwrap())
            .expect("Verification failed")
    }

    #[test]
    fn prehashed_data() {
        let signing_policy_version: i32 = 1;
        let ts_bytes = windows_timestamp(Utc.timestamp_opt(1586999965, 0).unwrap())
            .unwrap()
            .to_be_bytes();

        let message_data = RequestSigner::canonical_message(
            &signing_policy_version.to_be_bytes(),
            &ts_bytes,
            "POST",
            "/path?query=1",
            "XBL3.0 x=userid;jsonwebtoken",
            "thebodygoeshere".as_bytes(),
        )
        .unwrap();

        assert_eq!(
            Sha256::digest(&message_data).as_slice(),
            &hex!("f7d61b6f8d4dcd86da1aa8553f0ee7c15450811e7cd2759364e22f67d853ff50")
        );
    }

    #[test]
    fn canonical_message_layout() {
        let ts: u64 = 0x0102030405060708;
        let message = RequestSigner::canonical_message(
            &1i32.to_be_bytes(),
            &ts.to_be_bytes(),
            "post",
            "/device/authenticate",
            "",
            b"{}",
        )
        .unwrap();

        let path = "/device/authenticate";
        assert_eq!(message.len(), 5 + 9 + 5 + path.len() + 1 + 1 + 2 + 1);
        assert_eq!(&message[..5], &[0, 0, 0, 1, 0]);
        assert_eq!(&message[5..14], &[1, 2, 3, 4, 5, 6, 7, 8, 0]);
        assert_eq!(&message[14..19], b"POST\0");
        assert_eq!(&message[19..19 + path.len()], path.as_bytes());
        // Path NUL, empty authorization NUL, body, body NUL
        assert_eq!(&message[19 + path.len()..], b"\0\0{}\0");
    }

    #[test]
    fn signature_header_layout() {
        let keys = key_manager_from_der(PRIVATE_KEY_PEM);
        let dt = Utc.timestamp_opt(1586999965, 0).unwrap();
        let signature = RequestSigner::new()
            .sign_at(
                "https://device.auth.xboxlive.com/device/authenticate",
                "",
                b"{}",
                &keys,
                dt,
            )
            .unwrap();

        let bytes = signature.to_bytes();
        assert_eq!(bytes.len(), 4 + 8 + 64);
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(signature.filetime(), windows_timestamp(dt).unwrap());

        let parsed = XboxWebSignatureBytes::from_str(&signature.to_string()).unwrap();
        assert_eq!(parsed, signature);
    }

    #[test]
    fn fixed_timestamp_is_verifiable() {
        let keys = key_manager_from_der(PRIVATE_KEY_PEM);
        let signer = RequestSigner::new();
        let dt = Utc.timestamp_opt(1586999965, 0).unwrap();
        let url = "https://sisu.xboxlive.com/authorize";

        let first = signer.sign_at(url, "", b"{\"a\":1}", &keys, dt).unwrap();
        let second = signer.sign_at(url, "", b"{\"a\":1}", &keys, dt).unwrap();
        assert_eq!(first.filetime(), second.filetime());

        let message = HttpMessageToSign::post(url, "", b"{\"a\":1}").unwrap();
        let verifier = keys.verifying_key().unwrap();
        assert!(signer.verify_message(&first, &message, &verifier).is_ok());
        assert!(signer.verify_message(&second, &message, &verifier).is_ok());

        let tampered = HttpMessageToSign::post(url, "", b"{\"a\":2}").unwrap();
        assert!(signer.verify_message(&first, &tampered, &verifier).is_err());
    }

    #[test]
    fn verify_real_request() {
        let keys = key_manager_from_der(
            "MHcCAQEEIGIVtz0AIm4o6el+9VLmuGuOSqBx6UGWlCHn/oD3ljrtoAoGCCqGSM49AwEHoUQDQgAEGJS1AAhiPYw0ZSQJDCF8kcZkKAc2tRWXAN6Yw+o/hMRQBAkdRz/JUiFRCAi+gQPeS3QkPP8byOBfKz9dHaz5dw==",
        );

        let request = HttpMessageToSign {
            method: "POST".to_owned(),
            path_and_query: "/device/authenticate".to_owned(),
            authorization: "".to_owned(),
            body: br#"{"RelyingParty":"http://auth.xboxlive.com","TokenType":"JWT","Properties":{"AuthMethod":"ProofOfPossession","Id":"{e51d4344-196a-4550-9e27-f6c5006a9949}","DeviceType":"Android","Version":"8.0.0","ProofKey":{"kty":"EC","alg":"ES256","crv":"P-256","x":"GJS1AAhiPYw0ZSQJDCF8kcZkKAc2tRWXAN6Yw-o_hMQ","y":"UAQJHUc_yVIhUQgIvoED3kt0JDz_G8jgXys_XR2s-Xc","use":"sig"}}}"#.to_vec(),
        };
        let signature = XboxWebSignatureBytes::from_str("AAAAAQHY4xgs5DyIujFG5E5MZ4D1xjd9Up+H4AKLoyBHd95MAUZcabUN//Y/gijed4vvKtlfp4Cd4dJzVhpK0m+sYZcYRqQjBEKAZw==")
            .expect("Failed to deserialize into XboxWebSignatureBytes");

        assert!(RequestSigner::new()
            .verify_message(&signature, &request, &keys.verifying_key().unwrap())
            .is_ok());
    }

    #[test]
    fn sign_http_request() {
        let keys = key_manager_from_der(PRIVATE_KEY_PEM);
        let signer = RequestSigner::new();
        let request = http::Request::builder()
            .method("POST")
            .uri("https://xsts.auth.xboxlive.com/xsts/authorize")
            .body(b"somedata".to_vec())
            .unwrap();

        let signed = signer
            .sign_request(request, &keys, None)
            .expect("Failed to sign HTTP POST request");

        let header = signed
            .headers()
            .get("Signature")
            .expect("Signature header missing")
            .to_str()
            .unwrap();
        let signature = XboxWebSignatureBytes::from_str(header).unwrap();
        let message = HttpMessageToSign::try_from(&signed).unwrap();

        assert!(signer
            .verify_message(&signature, &message, &keys.verifying_key().unwrap())
            .is_ok());
    }

    #[test]
    fn sign_with_persisted_key() {
        let original = key_manager_from_der(PRIVATE_KEY_PEM);
        let persisted = original.export_jwt_keys().unwrap();
        let keys = KeyManager::from_jwt_keys(&persisted).unwrap();
        let signer = RequestSigner::new();
        let request = http::Request::builder()
            .method("GET")
            .uri("https://userpresence.xboxlive.com/users/me?level=all")
            .body(Vec::new())
            .unwrap();

        let signed = signer
            .sign_request(request, &keys, None)
            .expect("Signing with restored key failed");

        let header = signed.headers().get("Signature").unwrap().to_str().unwrap();
        let signature = XboxWebSignatureBytes::from_str(header).unwrap();
        let message = HttpMessageToSign::try_from(&signed).unwrap();

        assert!(signer
            .verify_message(&signature, &message, &original.verifying_key().unwrap())
            .is_ok());
    }

    #[test]
    fn sign_without_key_fails() {
        let keys = KeyManager::new();
        let res = RequestSigner::new().sign("https://sisu.xboxlive.com/authorize", "", b"{}", &keys);

        assert!(matches!(res, Err(Error::SigningError(_))));
    }
}
