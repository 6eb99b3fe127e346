//! Token family.
//!
//! Value types for every token obtained during authentication, each
//! knowing its own expiry via [`Validity`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Error;

/// Remaining lifetime of a token
pub trait Validity {
    /// Point in time the token expires
    fn expires_at(&self) -> DateTime<Utc>;

    /// Whole seconds until expiry, relative to `now`
    ///
    /// Rounds towards negative infinity, expired tokens yield negative values.
    fn seconds_valid_at(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at() - now).num_milliseconds().div_euclid(1000)
    }

    /// Whole seconds until expiry
    fn seconds_valid(&self) -> i64 {
        self.seconds_valid_at(Utc::now())
    }

    /// Token is valid at `now`
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.seconds_valid_at(now) > 0
    }

    /// Token is currently valid
    fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

/// `at + secs`, `None` if the result is not representable
fn checked_expiry(at: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(secs).and_then(|lifetime| at.checked_add_signed(lifetime))
}

fn lifetime_out_of_range(secs: i64) -> serde_json::Error {
    serde::de::Error::custom(format!("lifetime of {secs}s is out of range"))
}

/// Accepts lifetimes that can be added to the current time
fn lifetime_secs<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = i64::deserialize(deserializer)?;
    match checked_expiry(Utc::now(), secs) {
        Some(_) => Ok(secs),
        None => Err(serde::de::Error::custom(format!(
            "lifetime of {secs}s is out of range"
        ))),
    }
}

/// Construction of tokens from raw provider JSON
///
/// Parse failures, including unparsable expiry timestamps, are reported as
/// [`Error::MalformedToken`].
pub trait Token: DeserializeOwned {
    /// Human readable token kind
    const KIND: &'static str;

    /// Parse token from raw bytes
    fn from_slice(data: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(data).map_err(|inner| Error::MalformedToken {
            kind: Self::KIND,
            inner,
        })
    }

    /// Parse token from an already decoded JSON value
    fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        serde_json::from_value(value).map_err(|inner| Error::MalformedToken {
            kind: Self::KIND,
            inner,
        })
    }
}

/// Display claims of a device token
///
/// e.g. `{"xdi": {"did": "F.....", "dcs": "0"}}`
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DeviceClaims {
    /// Device identity
    #[serde(default)]
    pub xdi: HashMap<String, String>,
}

/// Display claims of a title token
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TitleClaims {
    /// Title identity
    #[serde(default)]
    pub xti: HashMap<String, String>,
}

/// Display claims of user scoped tokens (user, authorization, XSTS)
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserClaims {
    /// Xbox user identity, `uhs` is the userhash, `gtg` the gamertag
    #[serde(default)]
    pub xui: Vec<HashMap<String, String>>,
}

impl UserClaims {
    fn first(&self, claim: &str) -> Option<&str> {
        self.xui
            .first()
            .and_then(|identity| identity.get(claim))
            .map(String::as_str)
    }
}

/// Xbox Live token as issued by the `*.auth.xboxlive.com` services
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct XToken<T> {
    /// Issue datetime of token
    pub issue_instant: DateTime<Utc>,
    /// Expiry datetime of token
    pub not_after: DateTime<Utc>,
    /// Token value
    pub token: String,
    /// Display claims
    #[serde(default)]
    pub display_claims: Option<T>,
}

impl<T> Validity for XToken<T> {
    fn expires_at(&self) -> DateTime<Utc> {
        self.not_after
    }
}

/// Device token, identifies the client device
pub type DeviceToken = XToken<DeviceClaims>;
/// Title token, part of [`SisuToken`]
pub type TitleToken = XToken<TitleClaims>;
/// Xbox user token, part of [`SisuToken`]
pub type XboxUserToken = XToken<UserClaims>;
/// Relying-party scoped token from the Xbox security token service
pub type XstsToken = XToken<UserClaims>;

impl Token for DeviceToken {
    const KIND: &'static str = "DeviceToken";
}

impl Token for XToken<UserClaims> {
    const KIND: &'static str = "XstsToken";
}

impl XToken<UserClaims> {
    /// Xbox userhash
    pub fn userhash(&self) -> Option<&str> {
        self.display_claims.as_ref().and_then(|c| c.first("uhs"))
    }

    /// Value for the `Authorization` header of Xbox Live web API calls
    ///
    /// `XBL3.0 x={userhash};{token}`
    pub fn authorization_header_value(&self) -> Result<String, Error> {
        let uhs = self
            .userhash()
            .ok_or(Error::GeneralError("Token carries no userhash claim".into()))?;
        Ok(format!("XBL3.0 x={uhs};{}", self.token))
    }
}

/// Raw OAuth2 token response of `login.live.com`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LiveTokenResponse {
    /// Token type, usually `bearer`
    pub token_type: String,
    /// Lifetime in seconds
    pub expires_in: i64,
    /// Granted scope
    pub scope: String,
    /// Access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
    /// Microsoft account user id
    #[serde(default)]
    pub user_id: String,
}

impl Token for LiveTokenResponse {
    const KIND: &'static str = "UserToken";
}

/// Windows Live user token (access + refresh token)
///
/// `expires_on` is not part of the server response, it is computed when the
/// token is received.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserToken {
    /// Token type, usually `bearer`
    pub token_type: String,
    /// Lifetime in seconds, relative to `expires_on - expires_in`
    pub expires_in: i64,
    /// Granted scope
    pub scope: String,
    /// Access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: String,
    /// Microsoft account user id
    #[serde(default)]
    pub user_id: String,
    /// Absolute expiry
    pub expires_on: DateTime<Utc>,
}

impl UserToken {
    /// Anchor a token response at its receipt time
    ///
    /// # Errors
    ///
    /// [`Error::MalformedToken`] if `expires_in` does not yield a representable expiry.
    pub fn from_response(raw: LiveTokenResponse, received: DateTime<Utc>) -> Result<Self, Error> {
        let expires_on =
            checked_expiry(received, raw.expires_in).ok_or_else(|| Error::MalformedToken {
                kind: Self::KIND,
                inner: lifetime_out_of_range(raw.expires_in),
            })?;

        Ok(Self {
            expires_on,
            token_type: raw.token_type,
            expires_in: raw.expires_in,
            scope: raw.scope,
            access_token: raw.access_token,
            refresh_token: raw.refresh_token,
            user_id: raw.user_id,
        })
    }
}

impl Token for UserToken {
    const KIND: &'static str = "UserToken";
}

impl Validity for UserToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_on
    }
}

/// SISU authorization result
///
/// Composite of device, title, user and authorization token. Valid as long
/// as title, user and authorization token are all valid.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SisuToken {
    /// Device token (raw JWT)
    pub device_token: String,
    /// Title token
    pub title_token: TitleToken,
    /// Xbox user token
    pub user_token: XboxUserToken,
    /// Authorization token (XSTS for `http://xboxlive.com`)
    pub authorization_token: XstsToken,
    /// Web page
    #[serde(default)]
    pub web_page: String,
    /// Xbox Live sandbox
    #[serde(default)]
    pub sandbox: String,
    /// Modern gamertag indication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_modern_gamertag: Option<bool>,
    /// Flow name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

impl SisuToken {
    /// Userhash from the user token claims
    pub fn uhs(&self) -> Option<&str> {
        self.user_token.userhash()
    }

    /// Gamertag from the authorization token claims
    pub fn gamertag(&self) -> Option<&str> {
        self.authorization_token
            .display_claims
            .as_ref()
            .and_then(|c| c.first("gtg"))
    }
}

impl Token for SisuToken {
    const KIND: &'static str = "SisuToken";
}

impl Validity for SisuToken {
    fn expires_at(&self) -> DateTime<Utc> {
        self.title_token
            .not_after
            .min(self.user_token.not_after)
            .min(self.authorization_token.not_after)
    }
}

/// Console transfer token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MsalToken {
    /// Long-lived transfer token
    pub lpt: String,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: String,
    /// Microsoft account user id
    #[serde(default)]
    pub user_id: String,
}

impl Token for MsalToken {
    const KIND: &'static str = "MsalToken";
}

/// Streaming region
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    /// Region name, e.g. `WestEurope`
    pub name: String,
    /// Base URI of the region's streaming service
    pub base_uri: String,
    /// Hostname for network quality tests
    #[serde(default)]
    pub network_test_hostname: Option<String>,
    /// Region is the server-selected default
    #[serde(default)]
    pub is_default: bool,
    /// System update groups (opaque)
    #[serde(default)]
    pub system_update_groups: serde_json::Value,
    /// Fallback priority, lower is preferred
    #[serde(default)]
    pub fallback_priority: i64,
}

/// Cloud environment
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Environment {
    /// Environment name
    pub name: String,
    /// Authentication base URI
    #[serde(default)]
    pub auth_base_uri: Option<String>,
}

/// Client cloud settings
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientCloudSettings {
    /// Available environments
    #[serde(rename = "Environments", default)]
    pub environments: Vec<Environment>,
}

/// Offering settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferingSettings {
    /// User may select a region
    #[serde(default)]
    pub allow_region_selection: bool,
    /// Available regions
    #[serde(default)]
    pub regions: Vec<Region>,
    /// Selectable server types (opaque)
    #[serde(default)]
    pub selectable_server_types: serde_json::Value,
    /// Client cloud settings
    #[serde(default)]
    pub client_cloud_settings: ClientCloudSettings,
}

/// Streaming token for a single offering
///
/// The server only hands out a lifetime (`durationInSeconds`), so expiry is
/// anchored at the moment the token is constructed locally.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamingToken {
    /// Offering settings
    pub offering_settings: OfferingSettings,
    /// Market, e.g. `US`
    #[serde(default)]
    pub market: String,
    /// Game streaming token
    pub gs_token: String,
    /// Token type
    #[serde(default)]
    pub token_type: String,
    /// Lifetime in seconds
    #[serde(deserialize_with = "lifetime_secs")]
    pub duration_in_seconds: i64,
    #[serde(skip, default = "Utc::now")]
    created_at: DateTime<Utc>,
}

impl StreamingToken {
    /// Re-anchor the token at `created_at`
    pub fn with_creation_time(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Local construction time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Market
    pub fn market(&self) -> &str {
        &self.market
    }

    /// All regions
    pub fn regions(&self) -> &[Region] {
        &self.offering_settings.regions
    }

    /// First region flagged as default
    pub fn default_region(&self) -> Option<&Region> {
        self.regions().iter().find(|region| region.is_default)
    }

    /// Cloud environments
    pub fn environments(&self) -> &[Environment] {
        &self.offering_settings.client_cloud_settings.environments
    }

    /// Mark region `name` as default, clearing the flag on all others
    ///
    /// Returns `false` and leaves the regions untouched if no region is called `name`.
    pub fn set_default_region(&mut self, name: &str) -> bool {
        if !self.regions().iter().any(|region| region.name == name) {
            return false;
        }

        for region in self.offering_settings.regions.iter_mut() {
            region.is_default = region.name == name;
        }
        true
    }
}

impl Token for StreamingToken {
    const KIND: &'static str = "StreamingToken";
}

impl Validity for StreamingToken {
    fn expires_at(&self) -> DateTime<Utc> {
        // Saturates for lifetimes assigned after construction
        checked_expiry(self.created_at, self.duration_in_seconds).unwrap_or(
            if self.duration_in_seconds < 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn xtoken_json(not_after: &str, claims: serde_json::Value) -> serde_json::Value {
        json!({
            "IssueInstant": "2020-04-16T07:59:25.0466373Z",
            "NotAfter": not_after,
            "Token": "eyJ0eXAi",
            "DisplayClaims": claims,
        })
    }

    fn sisu_json(title: &str, user: &str, authorization: &str) -> serde_json::Value {
        json!({
            "DeviceToken": "devicetoken",
            "TitleToken": xtoken_json(title, json!({"xti": {"tid": "328178078"}})),
            "UserToken": xtoken_json(user, json!({"xui": [{"uhs": "1234567890"}]})),
            "AuthorizationToken": xtoken_json(
                authorization,
                json!({"xui": [{"uhs": "1234567890", "gtg": "Some Gamer"}]})
            ),
            "WebPage": "https://sisu.xboxlive.com/client/v33/default/view/index.html",
            "Sandbox": "RETAIL",
            "UseModernGamertag": true,
            "Flow": ""
        })
    }

    fn streaming_json() -> serde_json::Value {
        json!({
            "offeringSettings": {
                "allowRegionSelection": true,
                "regions": [
                    {"name": "WestEurope", "baseUri": "https://weu.gssv-play-prod.xboxlive.com", "networkTestHostname": "weu.example", "isDefault": true, "systemUpdateGroups": null, "fallbackPriority": -1},
                    {"name": "NorthEurope", "baseUri": "https://neu.gssv-play-prod.xboxlive.com", "networkTestHostname": "neu.example", "isDefault": false, "systemUpdateGroups": null, "fallbackPriority": -1}
                ],
                "selectableServerTypes": null,
                "clientCloudSettings": {"Environments": [{"Name": "Production", "AuthBaseUri": null}]}
            },
            "market": "DE",
            "gsToken": "gstoken",
            "tokenType": "bearer",
            "durationInSeconds": 14400
        })
    }

    #[test]
    fn seconds_valid_floors() {
        let token = XstsToken::from_value(xtoken_json(
            "2020-04-16T08:00:00Z",
            json!({"xui": [{"uhs": "1"}]}),
        ))
        .unwrap();

        let expiry = token.not_after;
        assert_eq!(token.seconds_valid_at(expiry - Duration::milliseconds(1500)), 1);
        assert_eq!(token.seconds_valid_at(expiry), 0);
        assert!(!token.is_valid_at(expiry));
        assert_eq!(token.seconds_valid_at(expiry + Duration::milliseconds(500)), -1);
    }

    #[test]
    fn seconds_valid_decreases() {
        let token = UserToken {
            token_type: "bearer".into(),
            expires_in: 3600,
            scope: "service::user.auth.xboxlive.com::MBI_SSL".into(),
            access_token: "access".into(),
            refresh_token: "refresh".into(),
            user_id: "uid".into(),
            expires_on: at(1_000_000),
        };

        let mut last = i64::MAX;
        for now in (990_000..1_002_000).step_by(250) {
            let secs = token.seconds_valid_at(at(now));
            assert!(secs < last);
            assert_eq!(token.is_valid_at(at(now)), secs > 0);
            last = secs;
        }
    }

    #[test]
    fn user_token_anchored_at_receipt() {
        let raw = LiveTokenResponse::from_slice(
            br#"{"token_type":"bearer","expires_in":3600,"scope":"service::user.auth.xboxlive.com::MBI_SSL","access_token":"EwA","refresh_token":"M.R3","user_id":"abc"}"#,
        )
        .unwrap();
        let token = UserToken::from_response(raw, at(1_000)).unwrap();

        assert_eq!(token.expires_on, at(4_600));
        assert_eq!(token.seconds_valid_at(at(1_000)), 3600);
    }

    #[test]
    fn user_token_lifetime_out_of_range() {
        for expires_in in [i64::MAX, i64::MIN, 9_223_372_036_854_775] {
            let raw = LiveTokenResponse {
                token_type: "bearer".into(),
                expires_in,
                scope: "service::user.auth.xboxlive.com::MBI_SSL".into(),
                access_token: "EwA".into(),
                refresh_token: "M.R3".into(),
                user_id: "abc".into(),
            };

            assert!(matches!(
                UserToken::from_response(raw, Utc::now()),
                Err(Error::MalformedToken { kind: "UserToken", .. })
            ));
        }
    }

    #[test]
    fn sisu_validity_is_minimum() {
        let token = SisuToken::from_value(sisu_json(
            "2999-01-01T00:00:00Z",
            "2999-01-01T00:00:00Z",
            "2999-01-01T00:00:00Z",
        ))
        .unwrap();
        assert!(token.is_valid());
        assert_eq!(token.uhs(), Some("1234567890"));
        assert_eq!(token.gamertag(), Some("Some Gamer"));

        // Title token expired, user and authorization token still valid
        let expired_title = SisuToken::from_value(sisu_json(
            "2000-01-01T00:00:00Z",
            "2999-01-01T00:00:00Z",
            "2999-01-01T00:00:00Z",
        ))
        .unwrap();
        assert!(expired_title.user_token.is_valid());
        assert!(expired_title.authorization_token.is_valid());
        assert!(!expired_title.is_valid());

        let expired_auth = SisuToken::from_value(sisu_json(
            "2999-01-01T00:00:00Z",
            "2999-01-01T00:00:00Z",
            "2000-01-01T00:00:00Z",
        ))
        .unwrap();
        assert!(!expired_auth.is_valid());
    }

    #[test]
    fn malformed_expiry_fails_construction() {
        let res = SisuToken::from_value(sisu_json(
            "not a date",
            "2999-01-01T00:00:00Z",
            "2999-01-01T00:00:00Z",
        ));

        match res {
            Err(Error::MalformedToken { kind, .. }) => assert_eq!(kind, "SisuToken"),
            other => panic!("Unexpected result: {other:?}"),
        }

        assert!(matches!(
            UserToken::from_value(json!({
                "token_type": "bearer", "expires_in": 1, "scope": "", "access_token": "",
                "refresh_token": "", "expires_on": "garbage"
            })),
            Err(Error::MalformedToken { .. })
        ));
    }

    #[test]
    fn streaming_token_anchored_at_construction() {
        let payload = serde_json::to_vec(&streaming_json()).unwrap();
        let first = StreamingToken::from_slice(&payload)
            .unwrap()
            .with_creation_time(at(10_000));
        let second = StreamingToken::from_slice(&payload)
            .unwrap()
            .with_creation_time(at(10_010));

        let now = at(12_000);
        assert_eq!(
            second.seconds_valid_at(now) - first.seconds_valid_at(now),
            10
        );
        assert_eq!(first.seconds_valid_at(at(10_000)), 14400);
    }

    #[test]
    fn streaming_token_lifetime_out_of_range() {
        for duration in [i64::MAX, 9_223_372_036_854_775] {
            let mut payload = streaming_json();
            payload["durationInSeconds"] = json!(duration);

            assert!(matches!(
                StreamingToken::from_value(payload),
                Err(Error::MalformedToken { kind: "StreamingToken", .. })
            ));
        }
    }

    #[test]
    fn streaming_token_expiry_saturates() {
        let mut token = StreamingToken::from_value(streaming_json()).unwrap();

        token.duration_in_seconds = i64::MAX;
        assert_eq!(token.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(token.is_valid());

        token.duration_in_seconds = i64::MIN;
        assert_eq!(token.expires_at(), DateTime::<Utc>::MIN_UTC);
        assert!(!token.is_valid());
    }

    #[test]
    fn streaming_token_accessors() {
        let mut token = StreamingToken::from_value(streaming_json()).unwrap();
        assert!(token.is_valid());
        assert_eq!(token.market(), "DE");
        assert_eq!(token.regions().len(), 2);
        assert_eq!(token.default_region().unwrap().name, "WestEurope");
        assert_eq!(token.environments()[0].name, "Production");

        assert!(token.set_default_region("NorthEurope"));
        assert_eq!(token.default_region().unwrap().name, "NorthEurope");
        assert_eq!(token.regions().iter().filter(|r| r.is_default).count(), 1);

        assert!(!token.set_default_region("Atlantis"));
        assert_eq!(token.default_region().unwrap().name, "NorthEurope");
    }

    #[test]
    fn xsts_authorization_header() {
        let token = XstsToken::from_value(xtoken_json(
            "2999-01-01T00:00:00Z",
            json!({"xui": [{"uhs": "1234"}]}),
        ))
        .unwrap();

        assert_eq!(token.userhash(), Some("1234"));
        assert_eq!(
            token.authorization_header_value().unwrap(),
            "XBL3.0 x=1234;eyJ0eXAi"
        );

        let no_claims = XstsToken::from_value(json!({
            "IssueInstant": "2020-04-16T07:59:25Z",
            "NotAfter": "2999-01-01T00:00:00Z",
            "Token": "abc"
        }))
        .unwrap();
        assert!(no_claims.authorization_header_value().is_err());
    }

    #[test]
    fn device_token_claims() {
        let token = DeviceToken::from_value(xtoken_json(
            "2999-01-01T00:00:00Z",
            json!({"xdi": {"did": "F9000", "dcs": "0"}}),
        ))
        .unwrap();

        assert_eq!(token.display_claims.unwrap().xdi["did"], "F9000");
    }
}
