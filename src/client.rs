//! Authentication functionality.
//!
//! Low-level calls of the SISU flow, one network round trip each. The
//! bundled flows built on top of them live in [`crate::flows`].
use chrono::Utc;
use cvlib::CorrelationVector;
use log::{debug, trace};
use oauth2::{CsrfToken, PkceCodeChallenge};

use crate::{
    error::Error,
    extensions::{
        BodyRequestBuilder, CorrelationVectorRequestBuilder, ErrorForStatus,
        JsonExDeserializeMiddleware, LoggingHttpMessage, SigningRequest,
    },
    keys::{JwtKeys, KeyManager},
    models::{
        request::{
            SisuAuthenticationRequest, SisuAuthorizationRequest, SisuQuery, StreamingLoginRequest,
            XADProperties, XSTSProperties, XTokenRequest,
        },
        response::SisuAuthenticationResponse,
        DeviceType, Offering, XalAppParameters, XalClientParameters,
    },
    request_signer::RequestSigner,
    tokens::{
        DeviceToken, LiveTokenResponse, MsalToken, SisuToken, StreamingToken, Token, UserToken,
        XstsToken,
    },
    tokenstore::TokenStore,
    transport::{HttpTransport, ReqwestTransport},
};

/// Authentication related constants
pub struct Constants;

impl Constants {
    /// live.com Token URL
    pub const OAUTH20_TOKEN_URL: &'static str = "https://login.live.com/oauth20_token.srf";

    /// Xbox Sisu authentication endpoint
    pub const XBOX_SISU_AUTHENTICATE_URL: &'static str = "https://sisu.xboxlive.com/authenticate";
    /// Xbox Sisu authorization endpoint
    pub const XBOX_SISU_AUTHORIZE_URL: &'static str = "https://sisu.xboxlive.com/authorize";
    /// Xbox Device Authentication endpoint (XASD token)
    pub const XBOX_DEVICE_AUTH_URL: &'static str =
        "https://device.auth.xboxlive.com/device/authenticate";
    /// Xbox Service Authorization endpoint (XSTS token)
    pub const XBOX_XSTS_AUTH_URL: &'static str = "https://xsts.auth.xboxlive.com/xsts/authorize";

    /// Default Xbox Live authorization scope
    pub const SCOPE_SERVICE_USER_AUTH: &'static str = "service::user.auth.xboxlive.com::MBI_SSL";
    /// Scope of the console transfer token
    pub const SCOPE_XCLOUD_TRANSFER_TOKEN: &'static str =
        "service::http://Passport.NET/purpose::PURPOSE_XBOX_CLOUD_CONSOLE_TRANSFER_TOKEN";
    /// Site name for SISU authorization
    pub const SISU_SITE_NAME: &'static str = "user.auth.xboxlive.com";

    /// Relying Party Auth Xbox Live
    pub const RELYING_PARTY_AUTH_XBOXLIVE: &'static str = "http://auth.xboxlive.com";
    /// Relying Party Xbox Live
    pub const RELYING_PARTY_XBOXLIVE: &'static str = "http://xboxlive.com";
    /// Relying Party Game Streaming (trailing slash is significant)
    pub const RELYING_PARTY_GSSV: &'static str = "http://gssv.xboxlive.com/";

    /// Client identifier sent to the game streaming service
    pub const GSSV_CLIENT: &'static str = "XboxComBrowser";
    /// `Cache-Control` of every authentication request
    pub const CACHE_CONTROL: &'static str = "no-store, must-revalidate, no-cache";
    /// Cached tokens with this many seconds (or less) left are refreshed
    pub const REFRESH_THRESHOLD_SECS: i64 = 60;
}

/// PKCE code challenge of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChallenge {
    /// base64url(SHA-256(verifier))
    pub value: String,
    /// Challenge method, always `S256`
    pub method: String,
    /// Code verifier, sent when exchanging the authorization code
    pub verifier: String,
}

/// Per-session state of a [`XalClient`]
///
/// Never persisted. Rebuilt from the [`TokenStore`] on demand.
#[derive(Debug, Default)]
pub struct Session {
    pub(crate) code_challenge: Option<CodeChallenge>,
    pub(crate) web_token: Option<XstsToken>,
    pub(crate) xhome_token: Option<StreamingToken>,
    pub(crate) xcloud_token: Option<StreamingToken>,
    pub(crate) xcloud_offering: Option<Offering>,
}

impl Session {
    /// Cached web token
    pub fn web_token(&self) -> Option<&XstsToken> {
        self.web_token.as_ref()
    }

    /// Cached streaming token for `offering`
    pub fn streaming_token(&self, offering: Offering) -> Option<&StreamingToken> {
        match offering {
            Offering::Xhome => self.xhome_token.as_ref(),
            Offering::Xgpuweb | Offering::Xgpuwebf2p => self.xcloud_token.as_ref(),
        }
    }

    /// Offering the cached cloud gaming token was issued for
    pub fn xcloud_offering(&self) -> Offering {
        self.xcloud_offering.unwrap_or(Offering::Xgpuweb)
    }
}

/// XAL client
///
/// Holds the proof key and session caches of one account. Methods take
/// `&mut self`, so concurrent use of one client requires external locking
/// (e.g. `tokio::sync::Mutex<XalClient>`).
#[derive(Debug)]
pub struct XalClient<T: HttpTransport = ReqwestTransport> {
    /// Random device id
    device_id: uuid::Uuid,
    /// Random device serial number
    serial_number: uuid::Uuid,
    /// Application parameters
    ///
    /// See constants in [`crate::models::app_params`]
    app_params: XalAppParameters,
    /// Client parameters
    ///
    /// See constants in [`crate::models::client_params`]
    client_params: XalClientParameters,
    /// Xbox Live Sandbox Id, "RETAIL" is commonly used
    sandbox_id: String,
    /// Correlation vector
    ms_cv: CorrelationVector,
    transport: T,
    request_signer: RequestSigner,
    pub(crate) keys: KeyManager,
    /// Sent as `x-forwarded-for` to the streaming service to pin a region
    force_region_ip: Option<String>,
    pub(crate) session: Session,
}

impl XalClient<ReqwestTransport> {
    /// Create a client using the default reqwest transport
    pub fn new(
        app_params: XalAppParameters,
        client_params: XalClientParameters,
        sandbox_id: String,
    ) -> Result<Self, Error> {
        Ok(Self::with_transport(
            ReqwestTransport::new()?,
            app_params,
            client_params,
            sandbox_id,
        ))
    }

    /// Create a client with default parameters (xCloud app, Android client, `RETAIL`)
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(
            XalAppParameters::default(),
            XalClientParameters::default(),
            "RETAIL".to_string(),
        )
    }
}

impl<T: HttpTransport> XalClient<T> {
    /// Create a client on top of a custom [`HttpTransport`]
    pub fn with_transport(
        transport: T,
        app_params: XalAppParameters,
        client_params: XalClientParameters,
        sandbox_id: String,
    ) -> Self {
        let device_id = uuid::Uuid::new_v4();
        debug!("Instantiating XalClient with device_id={}", device_id);

        Self {
            device_id,
            serial_number: uuid::Uuid::new_v4(),
            app_params,
            client_params,
            sandbox_id,
            ms_cv: CorrelationVector::new(),
            transport,
            request_signer: RequestSigner::new(),
            keys: KeyManager::new(),
            force_region_ip: None,
            session: Session::default(),
        }
    }

    /// Pin the streaming region by sending `ip` as `x-forwarded-for`
    pub fn with_force_region_ip(mut self, ip: Option<String>) -> Self {
        self.force_region_ip = ip.filter(|ip| !ip.is_empty());
        self
    }

    /// Use the proof key persisted in `store`, if any
    ///
    /// Has no effect once a key is in use, the key must not change mid-session.
    ///
    /// # Errors
    ///
    /// [`Error::KeyImportError`] if the persisted key is unusable.
    pub fn load_keys_from_store(&mut self, store: &TokenStore) -> Result<(), Error> {
        if self.keys.verifying_key().is_some() {
            return Ok(());
        }
        if let Some(jwt_keys) = store.jwt_keys() {
            trace!("Using proof key from token store");
            self.keys = KeyManager::from_jwt_keys(jwt_keys)?;
        }
        Ok(())
    }

    /// Device id
    pub fn device_id(&self) -> uuid::Uuid {
        self.device_id
    }

    /// Sandbox id
    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// App parameters
    pub fn app_params(&self) -> &XalAppParameters {
        &self.app_params
    }

    /// Client parameters
    pub fn client_params(&self) -> &XalClientParameters {
        &self.client_params
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Session caches
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drop all session caches (code challenge, web and streaming tokens)
    pub fn reset_session(&mut self) {
        self.session = Session::default();
    }

    /// Proof key for persisting, `None` before the first signed request
    pub fn export_jwt_keys(&self) -> Option<JwtKeys> {
        self.keys.export_jwt_keys()
    }

    fn format_device_id(&self, id: uuid::Uuid) -> String {
        let id = id.hyphenated().to_string();
        match self.client_params.device_type {
            // {decf45e4-945d-4379-b708-d4ee92c12d99}
            DeviceType::ANDROID | DeviceType::NINTENDO => ["{", &id, "}"].concat(),
            // DECF45E4-945D-4379-B708-D4EE92C12D99
            DeviceType::IOS => id.to_uppercase(),
            _ => id,
        }
    }

    /// Request builder for Xbox Live authentication services
    fn xbl_request(&mut self, url: &str) -> Result<http::request::Builder, Error> {
        http::Request::post(url)
            .header(http::header::USER_AGENT, &self.client_params.user_agent)
            .header("x-xbl-contract-version", "1")
            .header(http::header::CACHE_CONTROL, Constants::CACHE_CONTROL)
            .add_cv(&mut self.ms_cv)
    }

    /// Request builder for unsigned requests (live.com, streaming service)
    fn plain_request(&self, url: &str) -> http::request::Builder {
        http::Request::post(url)
            .header(http::header::USER_AGENT, &self.client_params.user_agent)
            .header(http::header::CACHE_CONTROL, Constants::CACHE_CONTROL)
    }

    async fn execute(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<http::Response<Vec<u8>>, Error> {
        self.transport
            .send(request.log())
            .await?
            .log()
            .error_for_status()
    }

    /// Generate a PKCE code challenge, once per session
    ///
    /// Repeated calls return the same challenge until [`XalClient::reset_session`].
    pub fn get_code_challenge(&mut self) -> CodeChallenge {
        self.session
            .code_challenge
            .get_or_insert_with(|| {
                let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
                CodeChallenge {
                    value: challenge.as_str().to_owned(),
                    method: challenge.method().as_str().to_owned(),
                    verifier: verifier.secret().to_owned(),
                }
            })
            .clone()
    }

    /// Random anti-CSRF state (64 random bytes, base64url)
    pub fn get_random_state() -> String {
        CsrfToken::new_random_len(64).secret().to_owned()
    }

    /// Requests a Xbox Live Device Token from the Xbox Live authentication service.
    ///
    /// Creates the session's proof key if it does not exist yet.
    ///
    /// # Errors
    ///
    /// [`Error::HttpError`] for a non-success status, [`Error::MalformedToken`]
    /// if the response is not a device token.
    pub async fn get_device_token(&mut self) -> Result<DeviceToken, Error> {
        let id = self.format_device_id(self.device_id);
        let serial_number = self.format_device_id(self.serial_number);
        let device_type = self.client_params.device_type.to_string();
        let builder = self.xbl_request(Constants::XBOX_DEVICE_AUTH_URL)?;

        let json_body = XTokenRequest::<XADProperties> {
            relying_party: Constants::RELYING_PARTY_AUTH_XBOXLIVE,
            token_type: "JWT",
            properties: XADProperties {
                auth_method: "ProofOfPossession",
                id: &id,
                device_type: &device_type,
                serial_number: &serial_number,
                version: &self.client_params.client_version,
                proof_key: self.keys.proof_key()?,
            },
        };

        let request = builder
            .json_body(&json_body)?
            .sign(&self.request_signer, &self.keys, None)?;

        let response = self.execute(request).await?;
        DeviceToken::from_slice(response.body())
    }

    /// Initiate SISU authentication
    ///
    /// The returned `MsaOauthRedirect` has to be opened in a browser. The
    /// `SessionId` is taken from the `x-sessionid` response header, it is
    /// `None` if the header is absent.
    pub async fn do_sisu_authentication(
        &mut self,
        device_token: &DeviceToken,
        code_challenge: &CodeChallenge,
        state: &str,
    ) -> Result<SisuAuthenticationResponse, Error> {
        self.keys.get_or_create_keys()?;
        let builder = self.xbl_request(Constants::XBOX_SISU_AUTHENTICATE_URL)?;

        let json_body = SisuAuthenticationRequest {
            app_id: &self.app_params.app_id,
            title_id: &self.app_params.title_id,
            redirect_uri: &self.app_params.redirect_uri,
            device_token: &device_token.token,
            sandbox: &self.sandbox_id,
            token_type: "code",
            offers: vec![Constants::SCOPE_SERVICE_USER_AUTH],
            query: SisuQuery {
                display: &self.client_params.query_display,
                code_challenge: &code_challenge.value,
                code_challenge_method: &code_challenge.method,
                state,
            },
        };

        let request = builder
            .json_body(&json_body)?
            .sign(&self.request_signer, &self.keys, None)?;

        let response = self.execute(request).await?;
        let session_id = response
            .headers()
            .get("x-sessionid")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        if session_id.is_none() {
            debug!("SISU authentication response without x-sessionid");
        }

        let mut sisu_auth = response.json_ex::<SisuAuthenticationResponse>()?;
        sisu_auth.session_id = session_id;
        Ok(sisu_auth)
    }

    /// Authorize via SISU after completing OAuth2 authentication
    ///
    /// The response bundles device, title, user and authorization token.
    pub async fn do_sisu_authorization(
        &mut self,
        user_token: &UserToken,
        device_token: &DeviceToken,
        session_id: Option<&str>,
    ) -> Result<SisuToken, Error> {
        let access_token = format!("t={}", user_token.access_token);
        let builder = self.xbl_request(Constants::XBOX_SISU_AUTHORIZE_URL)?;

        let json_body = SisuAuthorizationRequest {
            access_token: &access_token,
            app_id: &self.app_params.app_id,
            device_token: &device_token.token,
            sandbox: &self.sandbox_id,
            site_name: Constants::SISU_SITE_NAME,
            use_modern_gamertag: true,
            proof_key: self.keys.proof_key()?,
            session_id,
        };

        let request = builder
            .json_body(&json_body)?
            .sign(&self.request_signer, &self.keys, None)?;

        let response = self.execute(request).await?;
        SisuToken::from_slice(response.body())
    }

    async fn request_live_token(&self, params: &[(&str, &str)]) -> Result<UserToken, Error> {
        let request = self
            .plain_request(Constants::OAUTH20_TOKEN_URL)
            .form_body(params)?;

        let response = self.execute(request).await?;
        let raw = LiveTokenResponse::from_slice(response.body())?;
        UserToken::from_response(raw, Utc::now())
    }

    /// Exchange an OAuth2 authorization code for a user token
    pub async fn exchange_code_for_token(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<UserToken, Error> {
        self.request_live_token(&[
            ("client_id", &self.app_params.app_id),
            ("code", code),
            ("code_verifier", code_verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", &self.app_params.redirect_uri),
            ("scope", Constants::SCOPE_SERVICE_USER_AUTH),
        ])
        .await
    }

    /// Refresh a user token via its refresh token
    pub async fn refresh_user_token(&self, user_token: &UserToken) -> Result<UserToken, Error> {
        self.request_live_token(&[
            ("client_id", &self.app_params.app_id),
            ("grant_type", "refresh_token"),
            ("refresh_token", &user_token.refresh_token),
            ("scope", Constants::SCOPE_SERVICE_USER_AUTH),
        ])
        .await
    }

    /// Request a XSTS token for `relying_party`
    pub async fn do_xsts_authorization(
        &mut self,
        sisu_token: &SisuToken,
        relying_party: &str,
    ) -> Result<XstsToken, Error> {
        self.keys.get_or_create_keys()?;
        let builder = self.xbl_request(Constants::XBOX_XSTS_AUTH_URL)?;

        let json_body = XTokenRequest::<XSTSProperties> {
            relying_party,
            token_type: "JWT",
            properties: XSTSProperties {
                sandbox_id: &self.sandbox_id,
                device_token: &sisu_token.device_token,
                title_token: &sisu_token.title_token.token,
                user_tokens: vec![&sisu_token.user_token.token],
            },
        };

        let request = builder
            .json_body(&json_body)?
            .sign(&self.request_signer, &self.keys, None)?;

        let response = self.execute(request).await?;
        XstsToken::from_slice(response.body())
    }

    /// Exchange the user's refresh token for a console transfer token
    pub async fn exchange_refresh_token_for_xcloud_transfer_token(
        &self,
        user_token: &UserToken,
    ) -> Result<MsalToken, Error> {
        let request = self.plain_request(Constants::OAUTH20_TOKEN_URL).form_body(&[
            ("client_id", &self.app_params.app_id),
            ("grant_type", "refresh_token"),
            ("scope", Constants::SCOPE_XCLOUD_TRANSFER_TOKEN),
            ("refresh_token", &user_token.refresh_token),
            ("code", ""),
            ("code_verifier", ""),
            ("redirect_uri", ""),
        ])?;

        let response = self.execute(request).await?;
        MsalToken::from_slice(response.body())
    }

    /// Log in to the game streaming service of `offering`
    pub async fn get_stream_token(
        &self,
        xsts_token: &XstsToken,
        offering: Offering,
    ) -> Result<StreamingToken, Error> {
        let json_body = StreamingLoginRequest {
            token: &xsts_token.token,
            offering_id: offering.as_str(),
        };

        let mut builder = self
            .plain_request(&offering.login_url())
            .header("x-gssv-client", Constants::GSSV_CLIENT);
        if let Some(ip) = &self.force_region_ip {
            trace!("Forcing streaming region via x-forwarded-for={}", ip);
            builder = builder.header("x-forwarded-for", ip);
        }
        let request = builder.json_body(&json_body)?;

        let response = self.execute(request).await?;
        StreamingToken::from_slice(response.body())
    }
}
