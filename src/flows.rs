//! Higher-level, bundled functionality for common tasks
use async_trait::async_trait;
use log::{debug, info, trace, warn};
use url::Url;

use crate::{
    client::{CodeChallenge, Constants, XalClient},
    error::Error,
    models::{response::SisuAuthenticationResponse, Offering},
    tokens::{DeviceToken, MsalToken, SisuToken, StreamingToken, UserToken, Validity, XstsToken},
    tokenstore::TokenStore,
    transport::HttpTransport,
};

/// Everything needed to finish authentication once the browser redirects back
///
/// Returned by [`XalClient::get_redirect_uri`], passed to [`XalClient::authenticate_user`].
#[derive(Debug, Clone)]
pub struct RedirectData {
    /// SISU authentication response, `msa_oauth_redirect` is the URL to open
    pub sisu_auth: SisuAuthenticationResponse,
    /// Anti-CSRF state the redirect has to carry
    pub state: String,
    /// PKCE challenge of the session
    pub code_challenge: CodeChallenge,
    /// Device token used for SISU authentication
    pub device_token: DeviceToken,
}

/// Result of [`XalClient::refresh_tokens`]
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    /// Refreshed user token
    pub user_token: UserToken,
    /// Fresh device token
    pub device_token: DeviceToken,
    /// Fresh SISU token
    pub sisu_token: SisuToken,
}

/// Result of [`XalClient::get_streaming_token`]
#[derive(Debug, Clone)]
pub struct StreamingTokens {
    /// Token for remote play (`xhome`)
    pub xhome: StreamingToken,
    /// Token for cloud gaming (`xgpuweb` or `xgpuwebf2p`)
    pub xcloud: StreamingToken,
}

/// Argument passed into [`AuthPromptCallback`]
#[derive(Debug, Clone)]
pub struct AuthPromptData {
    /// Prompt message for the user
    pub prompt: String,
    /// URL to open in a browser
    pub url: Url,
}

impl From<&SisuAuthenticationResponse> for AuthPromptData {
    fn from(value: &SisuAuthenticationResponse) -> Self {
        Self {
            prompt: format!(
                "!!! ACTION REQUIRED !!!\nNavigate to this URL and authenticate: {0}\n\nThen enter the resulting redirected URL (ms-xal-...://auth?code=...)",
                value.msa_oauth_redirect,
            ),
            url: value.msa_oauth_redirect.clone(),
        }
    }
}

/// Sisu Auth callback trait
///
/// Used by [`XalClient::authenticate_interactive`] to let the user sign in
/// via a browser and hand back the final redirect URL.
#[async_trait]
pub trait AuthPromptCallback {
    /// Show `cb_data` to the user and return the redirect URL
    ///
    /// `None` aborts authentication.
    async fn call(
        &self,
        cb_data: AuthPromptData,
    ) -> Result<Option<Url>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Implementation of a cli callback handler
///
/// Prints the authentication URL and reads the redirect URL from stdin.
pub struct CliCallbackHandler;

#[async_trait]
impl AuthPromptCallback for CliCallbackHandler {
    async fn call(
        &self,
        cb_data: AuthPromptData,
    ) -> Result<Option<Url>, Box<dyn std::error::Error + Send + Sync>> {
        println!("{}\n", cb_data.prompt);
        println!("Redirect URL> ");

        let mut redirect_url = String::new();
        let _ = std::io::stdin().read_line(&mut redirect_url)?;
        let redirect_url = redirect_url.trim();
        if redirect_url.is_empty() {
            return Ok(None);
        }

        Ok(Some(Url::parse(redirect_url)?))
    }
}

impl<T: HttpTransport> XalClient<T> {
    /// Start authentication
    ///
    /// Fetches a device token, prepares PKCE challenge and state and performs
    /// SISU authentication. Open `sisu_auth.msa_oauth_redirect` in a browser.
    pub async fn get_redirect_uri(&mut self) -> Result<RedirectData, Error> {
        let device_token = self.get_device_token().await?;
        let code_challenge = self.get_code_challenge();
        let state = Self::get_random_state();
        let sisu_auth = self
            .do_sisu_authentication(&device_token, &code_challenge, &state)
            .await?;

        Ok(RedirectData {
            sisu_auth,
            state,
            code_challenge,
            device_token,
        })
    }

    /// Finish authentication with the redirect URI reported by the browser
    ///
    /// Returns `Ok(false)` if the redirect carries an `error`, lacks the
    /// authorization code or does not carry the expected `state`. No token
    /// exchange happens in these cases.
    pub async fn authenticate_user(
        &mut self,
        store: &mut TokenStore,
        redirect: &RedirectData,
        redirect_uri: &Url,
    ) -> Result<bool, Error> {
        let query = |key: &str| {
            redirect_uri
                .query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        };

        if let Some(error) = query("error") {
            warn!(
                "Authentication failed: {} ({})",
                error,
                query("error_description").unwrap_or_default()
            );
            return Ok(false);
        }

        let (Some(code), Some(state)) = (query("code"), query("state")) else {
            warn!("Redirect URI carries no authorization code");
            return Ok(false);
        };

        self.authenticate_user_using_code(store, redirect, &code, &state)
            .await
    }

    /// Finish authentication with an authorization code
    ///
    /// Rejects (`Ok(false)`) a `state` not matching the one of `redirect`.
    /// On success user token, SISU token and proof key are saved to `store`.
    pub async fn authenticate_user_using_code(
        &mut self,
        store: &mut TokenStore,
        redirect: &RedirectData,
        code: &str,
        state: &str,
    ) -> Result<bool, Error> {
        if state != redirect.state {
            warn!("State mismatch, rejecting authorization code");
            return Ok(false);
        }

        let user_token = self
            .exchange_code_for_token(code, &redirect.code_challenge.verifier)
            .await?;
        let sisu_token = self
            .do_sisu_authorization(
                &user_token,
                &redirect.device_token,
                redirect.sisu_auth.session_id.as_deref(),
            )
            .await?;

        store.set_user_token(user_token);
        store.set_sisu_token(sisu_token);
        if let Some(keys) = self.export_jwt_keys() {
            store.set_jwt_keys(keys);
        }
        store.save()?;

        info!("Authentication successful");
        Ok(true)
    }

    /// Sign in interactively via `callback`
    ///
    /// Returns `Ok(false)` if the callback aborted or the redirect was rejected.
    pub async fn authenticate_interactive(
        &mut self,
        store: &mut TokenStore,
        callback: &(impl AuthPromptCallback + Sync),
    ) -> Result<bool, Error> {
        self.load_keys_from_store(store)?;
        let redirect = self.get_redirect_uri().await?;

        let redirect_uri = callback
            .call(AuthPromptData::from(&redirect.sisu_auth))
            .await
            .map_err(|e| Error::GeneralError(format!("Auth prompt failed: {e}")))?;

        match redirect_uri {
            Some(uri) => self.authenticate_user(store, &redirect, &uri).await,
            None => {
                debug!("Auth prompt returned no redirect URL");
                Ok(false)
            }
        }
    }

    /// Refresh user and SISU token without user interaction
    ///
    /// Persists the refreshed tokens to `store`.
    ///
    /// # Errors
    ///
    /// [`Error::MissingToken`] if `store` holds no user token. Every other
    /// failure is wrapped into [`Error::TokenRefreshError`].
    pub async fn refresh_tokens(&mut self, store: &mut TokenStore) -> Result<RefreshedTokens, Error> {
        let current = store
            .user_token()
            .cloned()
            .ok_or(Error::MissingToken("User token"))?;

        self.refresh_chain(store, &current)
            .await
            .map_err(|e| Error::TokenRefreshError(Box::new(e)))
    }

    async fn refresh_chain(
        &mut self,
        store: &mut TokenStore,
        current: &UserToken,
    ) -> Result<RefreshedTokens, Error> {
        self.load_keys_from_store(store)?;

        trace!("Refreshing user token");
        let user_token = self.refresh_user_token(current).await?;
        let device_token = self.get_device_token().await?;
        let sisu_token = self
            .do_sisu_authorization(&user_token, &device_token, None)
            .await?;

        store.set_user_token(user_token.clone());
        store.set_sisu_token(sisu_token.clone());
        if let Some(keys) = self.export_jwt_keys() {
            store.set_jwt_keys(keys);
        }
        store.save()?;

        debug!("Tokens refreshed");
        Ok(RefreshedTokens {
            user_token,
            device_token,
            sisu_token,
        })
    }

    /// Transfer token for console pairing, not cached
    pub async fn get_msal_token(&mut self, store: &TokenStore) -> Result<MsalToken, Error> {
        let user_token = store.user_token().ok_or(Error::MissingToken("User token"))?;
        self.exchange_refresh_token_for_xcloud_transfer_token(user_token)
            .await
    }

    /// XSTS token for `http://xboxlive.com`
    ///
    /// Cached for the session, refreshed once it has 60 seconds or less left.
    pub async fn get_web_token(&mut self, store: &TokenStore) -> Result<XstsToken, Error> {
        let sisu_token = store.sisu_token().ok_or(Error::MissingToken("Sisu token"))?;

        if let Some(token) = self.session.web_token.as_ref().filter(|t| is_fresh(*t)) {
            return Ok(token.clone());
        }

        self.load_keys_from_store(store)?;
        let token = self
            .do_xsts_authorization(sisu_token, Constants::RELYING_PARTY_XBOXLIVE)
            .await?;
        self.session.web_token = Some(token.clone());
        Ok(token)
    }

    /// Streaming tokens for remote play and cloud gaming
    ///
    /// A XSTS token for the game streaming service is requested on every
    /// call. Both streaming tokens are cached and refreshed once they have
    /// 60 seconds or less left. If `xgpuweb` is refused, `xgpuwebf2p` is used
    /// instead for the rest of the session.
    pub async fn get_streaming_token(
        &mut self,
        store: &TokenStore,
    ) -> Result<StreamingTokens, Error> {
        let sisu_token = store.sisu_token().ok_or(Error::MissingToken("Sisu token"))?;

        self.load_keys_from_store(store)?;
        let xsts_token = self
            .do_xsts_authorization(sisu_token, Constants::RELYING_PARTY_GSSV)
            .await?;

        let xhome = match self.session.xhome_token.take().filter(is_fresh) {
            Some(token) => token,
            None => self.get_stream_token(&xsts_token, Offering::Xhome).await?,
        };
        self.session.xhome_token = Some(xhome.clone());

        let xcloud = match self.session.xcloud_token.take().filter(is_fresh) {
            Some(token) => token,
            None => self.get_xcloud_token(&xsts_token).await?,
        };
        self.session.xcloud_token = Some(xcloud.clone());

        Ok(StreamingTokens { xhome, xcloud })
    }

    async fn get_xcloud_token(&mut self, xsts_token: &XstsToken) -> Result<StreamingToken, Error> {
        if self.session.xcloud_offering() == Offering::Xgpuwebf2p {
            return self.get_stream_token(xsts_token, Offering::Xgpuwebf2p).await;
        }

        match self.get_stream_token(xsts_token, Offering::Xgpuweb).await {
            Ok(token) => {
                self.session.xcloud_offering = Some(Offering::Xgpuweb);
                Ok(token)
            }
            Err(err) => {
                info!("xgpuweb unavailable ({err}), falling back to xgpuwebf2p");
                let token = self
                    .get_stream_token(xsts_token, Offering::Xgpuwebf2p)
                    .await?;
                self.session.xcloud_offering = Some(Offering::Xgpuwebf2p);
                Ok(token)
            }
        }
    }
}

fn is_fresh(token: &impl Validity) -> bool {
    token.seconds_valid() > Constants::REFRESH_THRESHOLD_SECS
}
