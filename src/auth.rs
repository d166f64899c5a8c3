//! Key-pair authentication
//!
//! Loads a PKCS#8 PEM signing key (optionally password protected) and signs
//! short-lived RS256 JSON web tokens for the SQL and ingestion REST APIs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

use crate::error::{LoaderError, LoaderResult};

/// Token lifetime, the services accept at most one hour
pub const TOKEN_LIFETIME_SECS: i64 = 59 * 60;

/// Claims of a key-pair token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPairClaims {
    /// `<ACCOUNT>.<USER>.SHA256:<fingerprint>`
    pub iss: String,
    /// `<ACCOUNT>.<USER>`
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signing key plus the identity it authenticates
pub struct KeyPairAuth {
    account: String,
    user: String,
    fingerprint: String,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for KeyPairAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairAuth")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Account locator used in token claims
///
/// Region and cloud suffixes are dropped (`xy12345.eu-west-1` becomes
/// `XY12345`).
pub fn account_locator(account: &str) -> String {
    account
        .split('.')
        .next()
        .unwrap_or(account)
        .to_uppercase()
}

/// Public key fingerprint (`SHA256:<base64>`) of a private key
pub fn public_key_fingerprint(key: &RsaPrivateKey) -> LoaderResult<String> {
    let der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| LoaderError::Auth(format!("Failed to encode public key: {}", e)))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(format!("SHA256:{}", STANDARD.encode(digest)))
}

/// Parse a PKCS#8 PEM private key
pub fn parse_private_key(pem: &str, password: Option<&str>) -> LoaderResult<RsaPrivateKey> {
    let parsed = match password {
        Some(password) => RsaPrivateKey::from_pkcs8_encrypted_pem(pem, password.as_bytes()),
        None => RsaPrivateKey::from_pkcs8_pem(pem),
    };
    parsed.map_err(|e| LoaderError::Auth(format!("Failed to load private key: {}", e)))
}

impl KeyPairAuth {
    /// Build from an already parsed key
    pub fn from_key(account: &str, user: &str, key: &RsaPrivateKey) -> LoaderResult<Self> {
        let fingerprint = public_key_fingerprint(key)?;
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| LoaderError::Auth(format!("Failed to encode private key: {}", e)))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| LoaderError::Auth(format!("Invalid signing key: {}", e)))?;

        Ok(Self {
            account: account_locator(account),
            user: user.to_uppercase(),
            fingerprint,
            encoding_key,
        })
    }

    /// Load the signing key from `path`
    ///
    /// # Arguments
    ///
    /// * `account` - Account identifier, region suffix allowed
    /// * `user` - User the key is registered for
    /// * `path` - PKCS#8 PEM file
    /// * `password` - Password for an encrypted key
    pub fn load(
        account: &str,
        user: &str,
        path: &Path,
        password: Option<&str>,
    ) -> LoaderResult<Self> {
        debug!("Loading signing key from {}", path.display());
        let pem = std::fs::read_to_string(path).map_err(|e| LoaderError::io(path, e))?;
        let key = parse_private_key(&pem, password)?;
        Self::from_key(account, user, &key)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Claims for a token issued at `issued_at` (unix seconds)
    pub fn claims(&self, issued_at: i64) -> KeyPairClaims {
        let qualified_user = format!("{}.{}", self.account, self.user);
        KeyPairClaims {
            iss: format!("{}.{}", qualified_user, self.fingerprint),
            sub: qualified_user,
            iat: issued_at,
            exp: issued_at + TOKEN_LIFETIME_SECS,
        }
    }

    /// Sign a fresh token
    pub fn token(&self) -> LoaderResult<String> {
        let claims = self.claims(chrono::Utc::now().timestamp());
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| LoaderError::Auth(format!("Failed to sign token: {}", e)))
    }
}
