//! Downstream OAuth2 protocol layer
//!
//! Parses and validates the standard authorize parameters for the clients
//! this broker serves. The authorization-code grant with PKCE (S256) is the
//! only supported flow.

use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// The one built-in client allowed to use the headless credential flow.
pub const CLI_CLIENT_ID: &str = "fedgate-cli";

/// Form/query parameter names carrying the provider hint. Stripped before
/// parameters are preserved or encoded into upstream state.
pub const PARAM_IDP_NAME: &str = "fedgate_idp_name";
pub const PARAM_IDP_TYPE: &str = "fedgate_idp_type";

/// A downstream client registration
#[derive(Debug, Clone)]
pub struct DownstreamClient {
    pub client_id: String,
    pub redirect_uris: Vec<String>,
}

/// Static set of downstream clients, plus the built-in CLI client.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Vec<DownstreamClient>,
}

impl ClientRegistry {
    pub fn new(clients: Vec<DownstreamClient>) -> Self {
        Self { clients }
    }

    pub fn knows(&self, client_id: &str) -> bool {
        client_id == CLI_CLIENT_ID || self.clients.iter().any(|c| c.client_id == client_id)
    }

    /// Whether the redirect URI is registered for the client. The CLI
    /// client may use any loopback http URI, since its listener port is
    /// chosen at runtime.
    pub fn redirect_uri_allowed(&self, client_id: &str, redirect_uri: &str) -> bool {
        if client_id == CLI_CLIENT_ID {
            return redirect_uri.starts_with("http://127.0.0.1:")
                || redirect_uri.starts_with("http://[::1]:")
                || redirect_uri.starts_with("http://localhost:");
        }
        self.clients
            .iter()
            .filter(|c| c.client_id == client_id)
            .any(|c| c.redirect_uris.iter().any(|uri| uri == redirect_uri))
    }
}

/// OAuth2 error codes this endpoint emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OauthErrorCode {
    InvalidRequest,
    AccessDenied,
    UnsupportedResponseType,
    InvalidScope,
    LoginRequired,
    ServerError,
}

impl OauthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::LoginRequired => "login_required",
            Self::ServerError => "server_error",
        }
    }
}

/// A protocol-level failure. When `redirect_uri` is present the error goes
/// back to the client as a redirect; otherwise as a 400 response, since an
/// unvalidated redirect target must never receive an error redirect.
#[derive(Debug, Clone)]
pub struct ProtocolError {
    pub code: OauthErrorCode,
    pub description: String,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

impl ProtocolError {
    pub fn unredirectable(code: OauthErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            redirect_uri: None,
            state: None,
        }
    }

    /// The redirect URL carrying this error back to the client.
    pub fn redirect_location(&self) -> Option<String> {
        let redirect_uri = self.redirect_uri.as_ref()?;
        let separator = if redirect_uri.contains('?') { '&' } else { '?' };
        let mut location = format!(
            "{redirect_uri}{separator}error={}&error_description={}",
            self.code.as_str(),
            urlencoding::encode(&self.description),
        );
        if let Some(state) = &self.state {
            location.push_str(&format!("&state={}", urlencoding::encode(state)));
        }
        Some(location)
    }
}

/// The raw authorize parameters, order-preserving.
#[derive(Debug, Clone)]
pub struct AuthorizeParams {
    pairs: Vec<(String, String)>,
}

impl AuthorizeParams {
    /// Parses a form/query-encoded string. Duplicate keys keep their first
    /// value on lookup but survive re-encoding.
    pub fn parse(encoded: &str) -> Result<Self, ProtocolError> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(encoded).map_err(|e| {
                ProtocolError::unredirectable(
                    OauthErrorCode::InvalidRequest,
                    format!("malformed request parameters: {e}"),
                )
            })?;
        Ok(Self { pairs })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Re-encodes every parameter, preserving order.
    pub fn encode(&self) -> String {
        serde_urlencoded::to_string(&self.pairs).unwrap_or_default()
    }

    /// Re-encodes with the provider hint parameters stripped; this is what
    /// round-trips through the upstream state envelope.
    pub fn encode_without_idp_hints(&self) -> String {
        let stripped: Vec<&(String, String)> = self
            .pairs
            .iter()
            .filter(|(k, _)| k != PARAM_IDP_NAME && k != PARAM_IDP_TYPE)
            .collect();
        serde_urlencoded::to_string(&stripped).unwrap_or_default()
    }
}

/// An authorize request that passed protocol validation
#[derive(Debug, Clone)]
pub struct ValidatedAuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: String,
    pub login_hint: Option<String>,
}

impl ValidatedAuthorizeRequest {
    pub fn has_openid_scope(&self) -> bool {
        self.scopes.iter().any(|s| s == "openid")
    }

    /// A protocol error bound to this request's validated redirect target.
    pub fn error(&self, code: OauthErrorCode, description: impl Into<String>) -> ProtocolError {
        ProtocolError {
            code,
            description: description.into(),
            redirect_uri: Some(self.redirect_uri.clone()),
            state: self.state.clone(),
        }
    }
}

/// Validates the standard OAuth2 authorize parameters.
///
/// Client and redirect URI are checked first; until both pass, errors are
/// unredirectable. `prompt=none` combined with a requested `openid` scope
/// yields `login_required` since silent re-authentication is not supported.
pub fn validate_authorize_request(
    clients: &ClientRegistry,
    params: &AuthorizeParams,
) -> Result<ValidatedAuthorizeRequest, ProtocolError> {
    let client_id = params.get("client_id").unwrap_or_default();
    if client_id.is_empty() || !clients.knows(client_id) {
        return Err(ProtocolError::unredirectable(
            OauthErrorCode::InvalidRequest,
            format!("unknown client_id {client_id:?}"),
        ));
    }

    let redirect_uri = params.get("redirect_uri").unwrap_or_default();
    if redirect_uri.is_empty() || !clients.redirect_uri_allowed(client_id, redirect_uri) {
        return Err(ProtocolError::unredirectable(
            OauthErrorCode::InvalidRequest,
            "redirect_uri is missing or not registered for this client",
        ));
    }

    let request = ValidatedAuthorizeRequest {
        client_id: client_id.to_string(),
        redirect_uri: redirect_uri.to_string(),
        scopes: params
            .get("scope")
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect(),
        state: params.get("state").map(String::from),
        nonce: params.get("nonce").map(String::from),
        code_challenge: params.get("code_challenge").unwrap_or_default().to_string(),
        login_hint: params.get("login_hint").map(String::from),
    };

    if params.get("response_type") != Some("code") {
        return Err(request.error(
            OauthErrorCode::UnsupportedResponseType,
            "response_type must be 'code'",
        ));
    }

    if request.code_challenge.is_empty() {
        return Err(request.error(
            OauthErrorCode::InvalidRequest,
            "code_challenge is required",
        ));
    }
    match params.get("code_challenge_method") {
        Some("S256") => {}
        _ => {
            return Err(request.error(
                OauthErrorCode::InvalidRequest,
                "code_challenge_method must be 'S256'",
            ))
        }
    }

    if params.get("prompt") == Some("none") && request.has_openid_scope() {
        return Err(request.error(
            OauthErrorCode::LoginRequired,
            "prompt=none is not supported for openid requests",
        ));
    }

    Ok(request)
}

fn base64url(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// A fresh random token, 256 bits base64url-encoded.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64url(&bytes)
}

/// A fresh PKCE verifier and its S256 challenge.
pub fn generate_pkce() -> (String, String) {
    let verifier = random_token();
    let challenge = base64url(&Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(vec![DownstreamClient {
            client_id: "webapp".to_string(),
            redirect_uris: vec!["https://app.example.com/callback".to_string()],
        }])
    }

    fn valid_query() -> String {
        "response_type=code&client_id=webapp&redirect_uri=https%3A%2F%2Fapp.example.com%2Fcallback\
         &scope=openid+groups&state=xyz&code_challenge=abc&code_challenge_method=S256"
            .to_string()
    }

    #[test]
    fn test_valid_request_passes() {
        let params = AuthorizeParams::parse(&valid_query()).unwrap();
        let request = validate_authorize_request(&registry(), &params).unwrap();
        assert_eq!(request.client_id, "webapp");
        assert_eq!(request.scopes, vec!["openid", "groups"]);
        assert!(request.has_openid_scope());
    }

    #[test]
    fn test_unknown_client_is_unredirectable() {
        let query = valid_query().replace("client_id=webapp", "client_id=evil");
        let params = AuthorizeParams::parse(&query).unwrap();
        let err = validate_authorize_request(&registry(), &params).unwrap_err();
        assert_eq!(err.code, OauthErrorCode::InvalidRequest);
        assert!(err.redirect_uri.is_none());
    }

    #[test]
    fn test_unregistered_redirect_uri_is_unredirectable() {
        let query = valid_query().replace(
            "https%3A%2F%2Fapp.example.com%2Fcallback",
            "https%3A%2F%2Fevil.example.com%2Fcallback",
        );
        let params = AuthorizeParams::parse(&query).unwrap();
        let err = validate_authorize_request(&registry(), &params).unwrap_err();
        assert!(err.redirect_uri.is_none());
    }

    #[test]
    fn test_missing_pkce_is_a_redirected_error() {
        let query = valid_query().replace("&code_challenge=abc", "&code_challenge=");
        let params = AuthorizeParams::parse(&query).unwrap();
        let err = validate_authorize_request(&registry(), &params).unwrap_err();
        assert_eq!(err.code, OauthErrorCode::InvalidRequest);
        let location = err.redirect_location().unwrap();
        assert!(location.starts_with("https://app.example.com/callback?error=invalid_request"));
        assert!(location.contains("state=xyz"));
    }

    #[test]
    fn test_prompt_none_with_openid_is_login_required() {
        let query = format!("{}&prompt=none", valid_query());
        let params = AuthorizeParams::parse(&query).unwrap();
        let err = validate_authorize_request(&registry(), &params).unwrap_err();
        assert_eq!(err.code, OauthErrorCode::LoginRequired);
    }

    #[test]
    fn test_cli_client_allows_loopback_redirects_only() {
        let registry = registry();
        assert!(registry.redirect_uri_allowed(CLI_CLIENT_ID, "http://127.0.0.1:43121/callback"));
        assert!(!registry.redirect_uri_allowed(CLI_CLIENT_ID, "https://evil.example.com/callback"));
    }

    #[test]
    fn test_idp_hints_are_stripped_from_encoding() {
        let query = format!("{}&fedgate_idp_name=My+Company&fedgate_idp_type=oidc", valid_query());
        let params = AuthorizeParams::parse(&query).unwrap();
        let stripped = params.encode_without_idp_hints();
        assert!(!stripped.contains("fedgate_idp_name"));
        assert!(!stripped.contains("fedgate_idp_type"));
        assert!(stripped.contains("client_id=webapp"));
    }

    #[test]
    fn test_pkce_challenge_matches_verifier() {
        let (verifier, challenge) = generate_pkce();
        let expected = base64url(&Sha256::digest(verifier.as_bytes()));
        assert_eq!(challenge, expected);
        assert_ne!(verifier, challenge);
    }
}
