//! HTTP Request and Response models and XAL related parameters.
use std::str::FromStr;

use base64ct::Encoding;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::SecretKey;

use serde::{Deserialize, Serialize};

/// ProofKey model
///
/// Public part of the proof-of-possession key, as embedded into
/// device token and SISU authorization requests.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub struct ProofKey {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    u: String,
    x: String,
    y: String,
}

impl ProofKey {
    /// Create new instance of proof key
    ///
    /// # Examples
    ///
    /// ```
    /// use xal_xcloud::ProofKey;
    /// use p256::SecretKey;
    ///
    /// let secret_key = SecretKey::random(&mut rand::thread_rng());
    /// let proof_key = ProofKey::new(&secret_key);
    ///
    /// let serialized = serde_json::to_string(&proof_key).unwrap();
    /// assert!(serialized.contains("\"alg\":\"ES256\""));
    /// ```
    pub fn new(key: &SecretKey) -> Self {
        let point = key.public_key().to_encoded_point(false);
        // Uncompressed points always carry both coordinates
        let x = point.x().map(|x| x.as_slice()).unwrap_or_default();
        let y = point.y().map(|y| y.as_slice()).unwrap_or_default();
        Self {
            crv: "P-256".into(),
            alg: "ES256".into(),
            u: "sig".into(),
            kty: "EC".into(),
            x: base64ct::Base64UrlUnpadded::encode_string(x),
            y: base64ct::Base64UrlUnpadded::encode_string(y),
        }
    }

    /// Base64url encoded x-coordinate
    pub fn x(&self) -> &str {
        &self.x
    }

    /// Base64url encoded y-coordinate
    pub fn y(&self) -> &str {
        &self.y
    }
}

/// Device type
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
pub enum DeviceType {
    /// iOS (iPhone or iPad)
    IOS,
    /// Google Android
    ANDROID,
    /// Microsoft Windows
    WIN32,
    /// Nintendo Switch
    NINTENDO,
    /// Custom type (user-defined)
    Custom(String),
}

impl FromStr for DeviceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let enm = match s.to_lowercase().as_ref() {
            "android" => DeviceType::ANDROID,
            "ios" => DeviceType::IOS,
            "win32" => DeviceType::WIN32,
            "nintendo" => DeviceType::NINTENDO,
            val => DeviceType::Custom(val.to_owned()),
        };
        Ok(enm)
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            DeviceType::ANDROID => "Android",
            DeviceType::IOS => "iOS",
            DeviceType::WIN32 => "Win32",
            DeviceType::NINTENDO => "Nintendo",
            DeviceType::Custom(val) => val,
        };
        f.write_str(str)
    }
}

/// Streaming backend a [`crate::StreamingToken`] is issued for
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Offering {
    /// Remote play of the user's own console
    Xhome,
    /// Xbox Cloud Gaming (Game Pass)
    Xgpuweb,
    /// Xbox Cloud Gaming, free-to-play titles
    Xgpuwebf2p,
}

impl Offering {
    /// Offering id as used in hostnames and request bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            Offering::Xhome => "xhome",
            Offering::Xgpuweb => "xgpuweb",
            Offering::Xgpuwebf2p => "xgpuwebf2p",
        }
    }

    /// Streaming login endpoint of this offering
    pub fn login_url(&self) -> String {
        format!(
            "https://{}.gssv-play-prod.xboxlive.com/v2/login/user",
            self.as_str()
        )
    }
}

impl std::fmt::Display for Offering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// XAL App parameters
///
/// Identify the registered Xbox Live application used for authentication
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct XalAppParameters {
    /// OAuth2 Client Id / MSA App Id
    pub app_id: String,
    /// App Title-Id, required for the TitleToken of the SISU flow
    pub title_id: String,
    /// Redirect Uri, `ms-xal-{AppId}://auth`
    pub redirect_uri: String,
}

/// Application parameter constants
///
/// Used for instantiating [`crate::XalClient`]
///
/// # Examples
///
/// ```
/// use xal_xcloud::{XalAppParameters, app_params};
///
/// assert_eq!(XalAppParameters::default(), app_params::APP_XCLOUD());
/// assert_ne!(app_params::APP_XCLOUD(), app_params::APP_XBOX_BETA());
/// ```
#[allow(non_snake_case)]
pub mod app_params {
    use super::XalAppParameters;

    /// Xbox Cloud Gaming web app, used by default
    pub fn APP_XCLOUD() -> XalAppParameters {
        XalAppParameters {
            app_id: "000000004c20a908".into(),
            title_id: "328178078".into(),
            redirect_uri: "ms-xal-000000004c20a908://auth".into(),
        }
    }

    /// Gamepass App
    pub fn APP_GAMEPASS() -> XalAppParameters {
        XalAppParameters {
            app_id: "000000004c20a908".into(),
            title_id: "1016898439".into(),
            redirect_uri: "ms-xal-000000004c20a908://auth".into(),
        }
    }

    /// Xbox App
    pub fn APP_XBOX() -> XalAppParameters {
        XalAppParameters {
            app_id: "000000004c12ae6f".into(),
            title_id: "328178078".into(),
            redirect_uri: "ms-xal-000000004c12ae6f://auth".into(),
        }
    }

    /// Xbox Beta App
    pub fn APP_XBOX_BETA() -> XalAppParameters {
        XalAppParameters {
            app_id: "000000004415494b".into(),
            title_id: "177887386".into(),
            redirect_uri: "ms-xal-000000004415494b://auth".into(),
        }
    }
}

impl Default for XalAppParameters {
    fn default() -> Self {
        app_params::APP_XCLOUD()
    }
}

/// XAL Client parameters
///
/// Metadata from the client which attempts authentication
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct XalClientParameters {
    /// HTTP User Agent
    pub user_agent: String,
    /// Device type
    pub device_type: DeviceType,
    /// Software version (aka. OS version)
    pub client_version: String,
    /// Query display parameter (for webinterface rendering of OAuth page)
    pub query_display: String,
}

/// Client parameter constants
///
/// Used for instantiating [`crate::XalClient`]
#[allow(non_snake_case)]
pub mod client_params {
    use super::{DeviceType, XalClientParameters};

    /// iOS Client (iPhone or iPad)
    pub fn CLIENT_IOS() -> XalClientParameters {
        XalClientParameters {
            user_agent: "XAL iOS 2021.11.20211021.000".into(),
            device_type: DeviceType::IOS,
            client_version: "15.6.1".into(),
            query_display: "ios_phone".into(),
        }
    }

    /// Android Client
    pub fn CLIENT_ANDROID() -> XalClientParameters {
        XalClientParameters {
            user_agent: "XAL Android 2020.07.20200714.000".into(),
            device_type: DeviceType::ANDROID,
            client_version: "15.0".into(),
            query_display: "android_phone".into(),
        }
    }
}

impl Default for XalClientParameters {
    fn default() -> Self {
        client_params::CLIENT_ANDROID()
    }
}

/// HTTP Request models
pub mod request {
    use super::{Deserialize, ProofKey, Serialize};

    /// SISU query node
    ///
    /// Subnode of [`SisuAuthenticationRequest`] request body.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct SisuQuery<'a> {
        /// Display parameter
        pub display: &'a str,
        /// OAuth2 code challenge
        pub code_challenge: &'a str,
        /// OAuth2 code challenge method
        pub code_challenge_method: &'a str,
        /// OAuth2 state
        pub state: &'a str,
    }

    /// SISU Authentication request body
    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct SisuAuthenticationRequest<'a> {
        /// Application Id
        pub app_id: &'a str,
        /// Title Id
        pub title_id: &'a str,
        /// Redirect Uri
        pub redirect_uri: &'a str,
        /// Device token
        pub device_token: &'a str,
        /// Target Xbox Live sandbox
        pub sandbox: &'a str,
        /// Token type
        pub token_type: &'a str,
        /// Offers - Defines desired authorization scopes
        pub offers: Vec<&'a str>,
        /// Query
        pub query: SisuQuery<'a>,
    }

    /// SISU Authorization request body
    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct SisuAuthorizationRequest<'a> {
        /// Access token, `t=` prefixed
        pub access_token: &'a str,
        /// App Id
        pub app_id: &'a str,
        /// Device token
        pub device_token: &'a str,
        /// Target Xbox Live sandbox
        pub sandbox: &'a str,
        /// Site name
        pub site_name: &'a str,
        /// Request modern gamertags in the claims
        pub use_modern_gamertag: bool,
        /// JWK proof key, related to HTTP request signing
        pub proof_key: ProofKey,
        /// Session Id
        ///
        /// Received by previous call on SISU authenticate
        #[serde(skip_serializing_if = "Option::is_none")]
        pub session_id: Option<&'a str>,
    }

    /// Xbox Authentication Device Properties
    ///
    /// Subtype of [`XTokenRequest`] request body.
    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct XADProperties<'a> {
        /// Authentication method, "ProofOfPossession"
        pub auth_method: &'a str,
        /// Client UUID
        pub id: &'a str,
        /// Device type - String representation of [`crate::DeviceType`]
        pub device_type: &'a str,
        /// Serial number of the device
        pub serial_number: &'a str,
        /// Version of client OS
        pub version: &'a str,
        /// JWK proof key, related to HTTP request signing
        pub proof_key: ProofKey,
    }

    /// XSTS Token request properties
    ///
    /// Subtype of [`XTokenRequest`] request body.
    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct XSTSProperties<'a> {
        /// Target Xbox Live sandbox
        pub sandbox_id: &'a str,
        /// Device Token
        pub device_token: &'a str,
        /// Title Token
        pub title_token: &'a str,
        /// List of User tokens
        pub user_tokens: Vec<&'a str>,
    }

    /// XToken request body
    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct XTokenRequest<'a, T> {
        /// Relying party
        pub relying_party: &'a str,
        /// Token type
        pub token_type: &'a str,
        /// Token specific properties
        pub properties: T,
    }

    /// Streaming (gssv) login request body
    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct StreamingLoginRequest<'a> {
        /// XSTS token for the gssv relying party
        pub token: &'a str,
        /// Offering id
        pub offering_id: &'a str,
    }
}

/// HTTP Response models
pub mod response {
    use std::collections::HashMap;

    use url::Url;

    use super::{Deserialize, Serialize};

    /// Sisu authentication response
    ///
    /// `SessionId` is not part of the response body, it is filled in from
    /// the `x-sessionid` response header.
    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
    #[serde(rename_all = "PascalCase")]
    pub struct SisuAuthenticationResponse {
        /// OAuth2 redirection URL to display in a browser
        pub msa_oauth_redirect: Url,
        /// Request parameters
        #[serde(default)]
        pub msa_request_parameters: HashMap<String, String>,
        /// Sisu session id
        #[serde(default)]
        pub session_id: Option<String>,
    }
}
