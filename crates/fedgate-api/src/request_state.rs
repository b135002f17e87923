//! Opaque request-state envelopes
//!
//! Everything the authorize endpoint needs to survive the round trip
//! through an upstream provider travels inside an encrypted, versioned
//! envelope: the state parameter sent upstream, the CSRF cookie value, and
//! the authorization code issued to the downstream client. Nothing is
//! stored server-side.
//!
//! Decoding fails closed: a version mismatch, purpose mismatch, decode
//! failure or decryption failure all yield the same opaque error.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use fedgate_core::{FedgateError, ProviderKind, Result};

/// Current envelope format version. Bump on any incompatible change; old
/// envelopes then fail closed and users simply restart their login.
pub const ENVELOPE_VERSION: u8 = 1;

const NONCE_LEN: usize = 12;

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

fn decode_error() -> FedgateError {
    FedgateError::Auth {
        message: "invalid state parameter".to_string(),
    }
}

/// Encrypts and decrypts envelopes with a shared symmetric key.
pub struct StateCodec {
    cipher: Aes256Gcm,
}

impl StateCodec {
    /// Builds a codec from a base64-encoded 256-bit key.
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(key_b64.trim())
            .map_err(|e| {
                FedgateError::invalid_config(format!("state encryption key is not base64: {e}"))
            })?;
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| {
            FedgateError::invalid_config("state encryption key must be 32 bytes")
        })?;
        Ok(Self { cipher })
    }

    fn seal<T: Serialize>(&self, value: &T) -> Result<String> {
        let plaintext = serde_json::to_vec(value).map_err(|e| FedgateError::Internal {
            message: format!("failed to serialize envelope: {e}"),
        })?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| FedgateError::Internal {
                message: "failed to encrypt envelope".to_string(),
            })?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(b64().encode(blob))
    }

    fn open<T: DeserializeOwned>(&self, encoded: &str) -> Result<T> {
        let blob = b64().decode(encoded).map_err(|_| decode_error())?;
        if blob.len() <= NONCE_LEN {
            return Err(decode_error());
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| decode_error())?;

        serde_json::from_slice(&plaintext).map_err(|_| decode_error())
    }
}

fn check(version: u8, purpose: &str, expected_purpose: &str) -> Result<()> {
    if version != ENVELOPE_VERSION || purpose != expected_purpose {
        return Err(decode_error());
    }
    Ok(())
}

/// The state parameter round-tripped through the upstream provider during
/// a browser flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizeRequestState {
    pub version: u8,
    purpose: String,
    /// The original downstream authorize parameters, form-encoded, with
    /// the provider hint parameters stripped
    pub auth_params: String,
    pub idp_name: String,
    pub idp_type: ProviderKind,
    pub nonce: String,
    pub csrf: String,
    pub pkce_verifier: String,
}

impl AuthorizeRequestState {
    pub fn new(
        auth_params: String,
        idp_name: String,
        idp_type: ProviderKind,
        nonce: String,
        csrf: String,
        pkce_verifier: String,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            purpose: "authorize_state".to_string(),
            auth_params,
            idp_name,
            idp_type,
            nonce,
            csrf,
            pkce_verifier,
        }
    }

    pub fn encode(&self, codec: &StateCodec) -> Result<String> {
        codec.seal(self)
    }

    pub fn decode(codec: &StateCodec, encoded: &str) -> Result<Self> {
        let state: Self = codec.open(encoded)?;
        check(state.version, &state.purpose, "authorize_state")?;
        Ok(state)
    }
}

/// The CSRF cookie payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrfCookie {
    pub version: u8,
    purpose: String,
    pub token: String,
}

impl CsrfCookie {
    pub fn new(token: String) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            purpose: "csrf".to_string(),
            token,
        }
    }

    pub fn encode(&self, codec: &StateCodec) -> Result<String> {
        codec.seal(self)
    }

    pub fn decode(codec: &StateCodec, encoded: &str) -> Result<Self> {
        let cookie: Self = codec.open(encoded)?;
        check(cookie.version, &cookie.purpose, "csrf")?;
        Ok(cookie)
    }
}

/// The authorization code issued to a downstream client. Self-contained;
/// redeeming it needs no server-side lookup. `decode` is the redemption
/// half, consumed by the token exchange that accepts these codes; only
/// issuance lives in this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCodeGrant {
    pub version: u8,
    purpose: String,
    pub username: String,
    pub groups: Vec<String>,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub nonce: Option<String>,
    pub code_challenge: String,
    pub issued_at: i64,
}

impl AuthorizationCodeGrant {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        username: String,
        groups: Vec<String>,
        client_id: String,
        redirect_uri: String,
        scopes: Vec<String>,
        nonce: Option<String>,
        code_challenge: String,
        issued_at: i64,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            purpose: "authorization_code".to_string(),
            username,
            groups,
            client_id,
            redirect_uri,
            scopes,
            nonce,
            code_challenge,
            issued_at,
        }
    }

    pub fn encode(&self, codec: &StateCodec) -> Result<String> {
        codec.seal(self)
    }

    pub fn decode(codec: &StateCodec, encoded: &str) -> Result<Self> {
        let grant: Self = codec.open(encoded)?;
        check(grant.version, &grant.purpose, "authorization_code")?;
        Ok(grant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> StateCodec {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        StateCodec::from_base64_key(&key).unwrap()
    }

    fn sample_state() -> AuthorizeRequestState {
        AuthorizeRequestState::new(
            "response_type=code&client_id=webapp".to_string(),
            "My Company".to_string(),
            ProviderKind::Oidc,
            "nonce-value".to_string(),
            "csrf-value".to_string(),
            "verifier-value".to_string(),
        )
    }

    #[test]
    fn test_codec_rejects_short_keys() {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 16]);
        assert!(StateCodec::from_base64_key(&key).is_err());
    }

    #[test]
    fn test_state_roundtrip() {
        let codec = codec();
        let encoded = sample_state().encode(&codec).unwrap();
        let decoded = AuthorizeRequestState::decode(&codec, &encoded).unwrap();
        assert_eq!(decoded, sample_state());
    }

    #[test]
    fn test_encoding_is_randomized() {
        let codec = codec();
        let a = sample_state().encode(&codec).unwrap();
        let b = sample_state().encode(&codec).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_envelope_fails_closed() {
        let codec = codec();
        let mut encoded = sample_state().encode(&codec).unwrap();
        // Flip a character near the end of the ciphertext.
        let flipped = if encoded.ends_with('A') { 'B' } else { 'A' };
        encoded.pop();
        encoded.push(flipped);
        assert!(AuthorizeRequestState::decode(&codec, &encoded).is_err());
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let encoded = sample_state().encode(&codec()).unwrap();
        let other_key = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
        let other = StateCodec::from_base64_key(&other_key).unwrap();
        assert!(AuthorizeRequestState::decode(&other, &encoded).is_err());
    }

    #[test]
    fn test_version_mismatch_fails_closed() {
        let codec = codec();
        let mut state = sample_state();
        state.version = ENVELOPE_VERSION + 1;
        let encoded = state.encode(&codec).unwrap();
        assert!(AuthorizeRequestState::decode(&codec, &encoded).is_err());
    }

    #[test]
    fn test_purpose_confusion_fails_closed() {
        let codec = codec();
        // A CSRF cookie blob must not decode as an authorize state.
        let cookie = CsrfCookie::new("token".to_string()).encode(&codec).unwrap();
        assert!(AuthorizeRequestState::decode(&codec, &cookie).is_err());
    }

    #[test]
    fn test_garbage_fails_closed() {
        let codec = codec();
        assert!(AuthorizeRequestState::decode(&codec, "not-an-envelope").is_err());
        assert!(AuthorizeRequestState::decode(&codec, "").is_err());
    }

    #[test]
    fn test_code_grant_roundtrip() {
        let codec = codec();
        let grant = AuthorizationCodeGrant::new(
            "corp:alice".to_string(),
            vec!["corp:admins".to_string()],
            "fedgate-cli".to_string(),
            "http://127.0.0.1:43121/callback".to_string(),
            vec!["openid".to_string()],
            None,
            "challenge".to_string(),
            1_700_000_000,
        );
        let encoded = grant.encode(&codec).unwrap();
        let decoded = AuthorizationCodeGrant::decode(&codec, &encoded).unwrap();
        assert_eq!(decoded, grant);
    }
}
