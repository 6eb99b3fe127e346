//! Token store
//!
//! Persists the user token, SISU token and proof key of an authenticated
//! account to a JSON file:
//!
//! ```json
//! { "version": 1, "userToken": {..}, "sisuToken": {..}, "jwtKeys": {..} }
//! ```

use std::path::{Path, PathBuf};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    keys::JwtKeys,
    tokens::{SisuToken, Token, UserToken, Validity},
};

/// Current version of the token file format
///
/// Files written before versioning was introduced carry no `version` key and
/// load as version `0`.
pub const TOKENSTORE_VERSION: u32 = 1;

/// Strategy for [`TokenStore::has_valid_auth_tokens_with`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AuthTokenCheck {
    /// User token and SISU token must both be present and valid
    #[default]
    UserAndSisu,
    /// Both must be present, only the user token's validity is checked
    ///
    /// Reproduces the check of older clients which never looked at the SISU
    /// token's expiry.
    LegacyUserOnly,
}

/// Persisted authentication state
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenStore {
    #[serde(skip)]
    filepath: Option<PathBuf>,
    /// File format version
    #[serde(default)]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_token: Option<UserToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sisu_token: Option<SisuToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jwt_keys: Option<JwtKeys>,
}

impl TokenStore {
    /// Create an empty token store, persisted at `filepath` on [`TokenStore::save`]
    pub fn new(filepath: impl Into<PathBuf>) -> Self {
        Self {
            filepath: Some(filepath.into()),
            version: TOKENSTORE_VERSION,
            ..Default::default()
        }
    }

    /// Load a tokenstore from a file by providing the filename/path to the
    /// serialized JSON
    ///
    /// # Errors
    ///
    /// [`Error::TokenStoreNotFound`] if the file does not exist.
    pub fn load_from_file(filepath: impl AsRef<Path>) -> Result<Self, Error> {
        let mut store = Self::default();
        store.load(filepath, false)?;
        Ok(store)
    }

    /// Load tokens from `filepath` into this store
    ///
    /// The path is remembered for later calls to [`TokenStore::save`], even if
    /// the file does not exist yet.
    ///
    /// Returns `Ok(false)` for a missing file if `silent` is set, otherwise
    /// a missing file is an [`Error::TokenStoreNotFound`].
    pub fn load(&mut self, filepath: impl AsRef<Path>, silent: bool) -> Result<bool, Error> {
        let filepath = filepath.as_ref();
        self.filepath = Some(filepath.to_path_buf());

        trace!("Trying to load tokens from filepath={:?}", filepath);
        if !filepath.exists() {
            if silent {
                debug!("No token file at {:?}", filepath);
                return Ok(false);
            }
            return Err(Error::TokenStoreNotFound(filepath.to_path_buf()));
        }

        let json = std::fs::read_to_string(filepath)?;
        self.load_json(&json)
    }

    /// Merge tokens from a JSON document into this store
    ///
    /// Only nodes present in the document replace the stored values.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedToken`] if a token node fails to parse.
    pub fn load_json(&mut self, json: &str) -> Result<bool, Error> {
        trace!("Attempting to deserialize token data");
        let mut value: serde_json::Value = serde_json::from_str(json)?;

        self.version = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);

        if let Some(node) = take_node(&mut value, "userToken") {
            self.user_token = Some(UserToken::from_value(node)?);
        }
        if let Some(node) = take_node(&mut value, "sisuToken") {
            self.sisu_token = Some(SisuToken::from_value(node)?);
        }
        // Kept as is, the key is validated on import
        if let Some(node) = take_node(&mut value, "jwtKeys") {
            self.jwt_keys = Some(serde_json::from_value(node)?);
        }

        Ok(true)
    }

    /// Save tokens to writer
    pub fn save_to_writer(&self, writer: impl std::io::Write) -> Result<(), Error> {
        serde_json::to_writer_pretty(writer, self).map_err(std::convert::Into::into)
    }

    /// Save the tokens to the file they were loaded from
    ///
    /// The whole document is written in one go, an existing file is overwritten.
    pub fn save(&mut self) -> Result<(), Error> {
        let filepath = self.filepath()?.to_path_buf();
        self.version = TOKENSTORE_VERSION;

        trace!("Saving tokens path={:?}", filepath);
        std::fs::write(&filepath, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Sign out: overwrite the file with an empty document and forget all tokens
    pub fn remove_all(&mut self) -> Result<(), Error> {
        let filepath = self.filepath()?.to_path_buf();
        debug!("Removing all tokens from {:?}", filepath);

        std::fs::write(&filepath, "{}")?;
        self.user_token = None;
        self.sisu_token = None;
        self.jwt_keys = None;
        Ok(())
    }

    /// Path the store is persisted at
    pub fn filepath(&self) -> Result<&Path, Error> {
        self.filepath
            .as_deref()
            .ok_or(Error::GeneralError("TokenStore has no file path".into()))
    }

    /// Format version of the loaded document
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Set user token
    pub fn set_user_token(&mut self, token: UserToken) {
        self.user_token = Some(token);
    }

    /// Get user token
    pub fn user_token(&self) -> Option<&UserToken> {
        self.user_token.as_ref()
    }

    /// Set SISU token
    pub fn set_sisu_token(&mut self, token: SisuToken) {
        self.sisu_token = Some(token);
    }

    /// Get SISU token
    pub fn sisu_token(&self) -> Option<&SisuToken> {
        self.sisu_token.as_ref()
    }

    /// Set the persisted proof key
    pub fn set_jwt_keys(&mut self, keys: JwtKeys) {
        self.jwt_keys = Some(keys);
    }

    /// Get the persisted proof key
    pub fn jwt_keys(&self) -> Option<&JwtKeys> {
        self.jwt_keys.as_ref()
    }

    /// User token and SISU token are present and valid
    pub fn has_valid_auth_tokens(&self) -> bool {
        self.has_valid_auth_tokens_with(AuthTokenCheck::default())
    }

    /// Check for valid auth tokens using the given strategy
    pub fn has_valid_auth_tokens_with(&self, check: AuthTokenCheck) -> bool {
        let (Some(user_token), Some(sisu_token)) = (&self.user_token, &self.sisu_token) else {
            return false;
        };

        match check {
            AuthTokenCheck::UserAndSisu => user_token.is_valid() && sisu_token.is_valid(),
            AuthTokenCheck::LegacyUserOnly => user_token.is_valid(),
        }
    }
}

fn take_node(value: &mut serde_json::Value, key: &str) -> Option<serde_json::Value> {
    value
        .get_mut(key)
        .map(serde_json::Value::take)
        .filter(|node| !node.is_null())
}
