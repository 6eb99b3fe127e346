//! Proof-of-possession key management.
//!
//! The same P-256 keypair has to be used for the device token, SISU
//! authentication and SISU authorization calls of a session, as later
//! request signatures are verified against the key embedded in those tokens.

use log::{debug, trace};
use p256::{
    ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey, VerifyingKey},
    elliptic_curve::{self, JwkEcKey},
    SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::Error, models::ProofKey};

/// Persisted representation of the proof key
///
/// Serialized into the `jwtKeys` node of the token store. The private JWK
/// (incl. `d`) lives under `jwt`. The node is kept as written, other fields
/// of older clients survive a save. Its shape is only checked on import,
/// see [`KeyManager::from_jwt_keys`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JwtKeys(serde_json::Value);

impl JwtKeys {
    /// Wrap a private JWK
    pub fn from_jwk(jwk: &JwkEcKey) -> Result<Self, Error> {
        Ok(Self(serde_json::json!({ "jwt": serde_json::to_value(jwk)? })))
    }

    /// Private JWK stored under `jwt`
    ///
    /// # Errors
    ///
    /// [`Error::KeyImportError`] if the node is missing or not an EC JWK.
    pub fn jwk(&self) -> Result<JwkEcKey, Error> {
        let node = self
            .0
            .get("jwt")
            .ok_or(Error::KeyImportError(elliptic_curve::Error))?;

        JwkEcKey::deserialize(node).map_err(|e| {
            debug!("Persisted proof key is not a JWK: {e}");
            Error::KeyImportError(elliptic_curve::Error)
        })
    }
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the private scalar
        f.debug_struct("JwtKeys").finish_non_exhaustive()
    }
}

/// Owner of the session's proof-of-possession keypair
#[derive(Debug, Clone, Default)]
pub struct KeyManager {
    key: Option<SecretKey>,
}

impl KeyManager {
    /// Create an empty key manager, a key is generated on first use
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a key manager around a previously persisted key
    ///
    /// # Errors
    ///
    /// [`Error::KeyImportError`] if `keys` does not hold a valid P-256 private key.
    pub fn from_jwt_keys(keys: &JwtKeys) -> Result<Self, Error> {
        trace!("Importing persisted proof key");
        let key = SecretKey::from_jwk(&keys.jwk()?).map_err(Error::KeyImportError)?;
        Ok(Self::from_secret_key(key))
    }

    /// Create a key manager around an existing secret key
    pub fn from_secret_key(key: SecretKey) -> Self {
        Self { key: Some(key) }
    }

    /// Return the proof key, generating it if necessary
    ///
    /// Subsequent calls return the cached key.
    pub fn get_or_create_keys(&mut self) -> Result<&SecretKey, Error> {
        if self.key.is_none() {
            debug!("Generating new P-256 proof key");
            self.key = Some(SecretKey::random(&mut rand::thread_rng()));
        }

        self.key
            .as_ref()
            .ok_or(Error::SigningError("Proof key unavailable".into()))
    }

    /// Public proof key (JWK, `alg: ES256`, `use: sig`) for embedding into requests
    pub fn proof_key(&mut self) -> Result<ProofKey, Error> {
        Ok(ProofKey::new(self.get_or_create_keys()?))
    }

    /// Export the keypair for persisting in the token store
    ///
    /// Returns `None` if no key was established yet.
    pub fn export_jwt_keys(&self) -> Option<JwtKeys> {
        // A JWK consists of plain strings, serializing it does not fail
        self.key
            .as_ref()
            .and_then(|key| JwtKeys::from_jwk(&key.to_jwk()).ok())
    }

    /// Verifying key of the established keypair
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        self.key.as_ref().map(|key| key.public_key().into())
    }

    /// Sign a buffer with ECDSA over SHA-256
    ///
    /// Returns the signature in IEEE P1363 encoding (`r || s`, 64 bytes) via
    /// [`Signature::to_bytes`].
    ///
    /// # Errors
    ///
    /// [`Error::SigningError`] if no key was established, neither via
    /// [`KeyManager::get_or_create_keys`] nor by importing one.
    pub fn sign_buffer(&self, bytes: &[u8]) -> Result<Signature, Error> {
        let key = self
            .key
            .as_ref()
            .ok_or(Error::SigningError("No proof key available".into()))?;

        let signing_key: SigningKey = key.clone().into();
        let prehash = Sha256::digest(bytes);

        signing_key
            .sign_prehash(&prehash)
            .map_err(|e| Error::SigningError(e.to_string()))
    }
}
