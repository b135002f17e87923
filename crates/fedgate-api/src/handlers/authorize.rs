//! The OAuth2 authorization endpoint
//!
//! Dispatches between the browser-redirect flow and the headless CLI
//! credential flow across the upstream provider kinds. No server-side
//! state is written before the terminal redirect; everything round-trips
//! through the encrypted state envelope and the CSRF cookie.

use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use chrono::Utc;
use cookie::{Cookie, SameSite};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, instrument};

use fedgate_core::{FedgateError, FederatedIdentity, ProviderKind};
use fedgate_identity::{ResolvedIdentityProvider, UpstreamProvider};

use crate::oauth::{
    validate_authorize_request, AuthorizeParams, OauthErrorCode, ProtocolError,
    ValidatedAuthorizeRequest, CLI_CLIENT_ID, PARAM_IDP_NAME, PARAM_IDP_TYPE,
};
use crate::request_state::{AuthorizationCodeGrant, AuthorizeRequestState, CsrfCookie};
use crate::state::AppState;

use super::{failure_response, found, AuthorizeFailure};

pub const CSRF_COOKIE_NAME: &str = "__Host-fedgate-csrf";
pub const HEADER_USERNAME: &str = "Fedgate-Username";
pub const HEADER_PASSWORD: &str = "Fedgate-Password";
pub const CHOOSER_PATH: &str = "/oauth2/choose_identity_provider";
pub const LOGIN_PATH: &str = "/oauth2/login";

#[instrument(skip_all, fields(method = %method))]
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    jar: CookieJar,
    body: String,
) -> Response {
    let encoded_params = if method == Method::POST {
        body
    } else {
        query.unwrap_or_default()
    };

    match handle_authorize(&state, &encoded_params, &headers, &jar).await {
        Ok(response) => response,
        Err(failure) => failure_response(failure),
    }
}

async fn handle_authorize(
    state: &AppState,
    encoded_params: &str,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<Response, AuthorizeFailure> {
    let params = AuthorizeParams::parse(encoded_params)?;
    let cli_credentials = cli_credentials(headers)?;
    let resolver = state.resolver().await?;

    // IDP-chooser special case: browser flow, no hint, no default, at
    // least one declared provider. Redirect with the original parameters
    // preserved verbatim; no state is created yet.
    if cli_credentials.is_none()
        && params.get(PARAM_IDP_NAME).is_none()
        && !resolver.has_default_idp()
        && resolver.configured_count() >= 1
    {
        return Ok((
            StatusCode::SEE_OTHER,
            [(
                axum::http::header::LOCATION,
                format!("{CHOOSER_PATH}?{encoded_params}"),
            )],
        )
            .into_response());
    }

    let resolved = match params.get(PARAM_IDP_NAME) {
        Some(name) => resolver
            .find_upstream_idp_by_display_name(name)
            .await
            .map_err(|err| {
                ProtocolError::unredirectable(
                    OauthErrorCode::InvalidRequest,
                    format!("unable to resolve {PARAM_IDP_NAME}: {err}"),
                )
            })?,
        None => resolver.find_default_idp().await.map_err(|err| {
            ProtocolError::unredirectable(
                OauthErrorCode::InvalidRequest,
                format!("no {PARAM_IDP_NAME} was given and the default could not be used: {err}"),
            )
        })?,
    };

    if let Some(hint) = params.get(PARAM_IDP_TYPE) {
        let hinted = ProviderKind::from_str(hint).map_err(|_| {
            ProtocolError::unredirectable(
                OauthErrorCode::InvalidRequest,
                format!("invalid {PARAM_IDP_TYPE} {hint:?}"),
            )
        })?;
        if hinted != resolved.session_kind {
            return Err(ProtocolError::unredirectable(
                OauthErrorCode::InvalidRequest,
                format!(
                    "{PARAM_IDP_TYPE} {hint:?} does not match identity provider {:?}",
                    resolved.display_name
                ),
            )
            .into());
        }
    }

    let validated = validate_authorize_request(&state.clients, &params)?;

    match cli_credentials {
        Some((username, password)) => {
            cli_flow(state, &resolved, &validated, &username, &password).await
        }
        None => browser_flow(state, &params, &resolved, &validated, jar),
    }
}

/// Extracts the CLI credential headers; present iff both headers decode.
fn cli_credentials(headers: &HeaderMap) -> Result<Option<(String, String)>, AuthorizeFailure> {
    let username = headers.get(HEADER_USERNAME);
    let password = headers.get(HEADER_PASSWORD);
    match (username, password) {
        (None, None) => Ok(None),
        (Some(u), Some(p)) => {
            let u = u.to_str().map_err(bad_credential_header)?;
            let p = p.to_str().map_err(bad_credential_header)?;
            Ok(Some((u.to_string(), p.to_string())))
        }
        _ => Err(ProtocolError::unredirectable(
            OauthErrorCode::InvalidRequest,
            format!("{HEADER_USERNAME} and {HEADER_PASSWORD} must be supplied together"),
        )
        .into()),
    }
}

fn bad_credential_header(_: axum::http::header::ToStrError) -> AuthorizeFailure {
    ProtocolError::unredirectable(
        OauthErrorCode::InvalidRequest,
        "credential headers must be valid UTF-8",
    )
    .into()
}

// ============================================================================
// CLI credential flow
// ============================================================================

async fn cli_flow(
    state: &AppState,
    resolved: &ResolvedIdentityProvider,
    validated: &ValidatedAuthorizeRequest,
    username: &str,
    password: &str,
) -> Result<Response, AuthorizeFailure> {
    if validated.client_id != CLI_CLIENT_ID {
        return Err(validated
            .error(
                OauthErrorCode::AccessDenied,
                "this client may not perform the credential flow",
            )
            .into());
    }
    if username.is_empty() || password.is_empty() {
        return Err(validated
            .error(OauthErrorCode::AccessDenied, "missing username or password")
            .into());
    }

    let identity =
        authenticate_upstream(&resolved.provider, username, password)
            .await
            .map_err(|err| map_auth_error(validated, err))?;

    let identity = resolved
        .transforms
        .apply(identity)
        .map_err(|err| map_auth_error(validated, err))?;

    debug!(username = %identity.username, idp = %resolved.display_name, "cli authentication succeeded");
    issue_code_redirect(state, validated, identity)
}

async fn authenticate_upstream(
    provider: &UpstreamProvider,
    username: &str,
    password: &str,
) -> fedgate_core::Result<FederatedIdentity> {
    match provider {
        UpstreamProvider::Oidc(p) => p.password_credentials_grant(username, password).await,
        UpstreamProvider::Ldap(p) | UpstreamProvider::ActiveDirectory(p) => {
            p.authenticate_user(username, password).await
        }
        UpstreamProvider::Github(_) => Err(FedgateError::AuthRejected {
            message: "GitHub identity providers do not support the credential flow".to_string(),
        }),
    }
}

fn map_auth_error(validated: &ValidatedAuthorizeRequest, err: FedgateError) -> AuthorizeFailure {
    match err {
        FedgateError::AuthRejected { message } => validated
            .error(OauthErrorCode::AccessDenied, message)
            .into(),
        FedgateError::Auth { message } => validated
            .error(OauthErrorCode::AccessDenied, message)
            .into(),
        FedgateError::Upstream { message } => validated
            .error(
                OauthErrorCode::ServerError,
                format!("upstream identity provider error: {message}"),
            )
            .into(),
        other => AuthorizeFailure::Internal(other),
    }
}

/// Builds the self-contained authorization code and redirects the client.
pub(crate) fn issue_code_redirect(
    state: &AppState,
    validated: &ValidatedAuthorizeRequest,
    identity: FederatedIdentity,
) -> Result<Response, AuthorizeFailure> {
    let grant = AuthorizationCodeGrant::new(
        identity.username,
        identity.groups,
        validated.client_id.clone(),
        validated.redirect_uri.clone(),
        validated.scopes.clone(),
        validated.nonce.clone(),
        validated.code_challenge.clone(),
        Utc::now().timestamp(),
    );
    let code = grant.encode(&state.codec)?;

    let separator = if validated.redirect_uri.contains('?') {
        '&'
    } else {
        '?'
    };
    let mut location = format!(
        "{}{separator}code={}",
        validated.redirect_uri,
        urlencoding::encode(&code)
    );
    if let Some(request_state) = &validated.state {
        location.push_str(&format!("&state={}", urlencoding::encode(request_state)));
    }
    Ok(found(&location))
}

// ============================================================================
// Browser redirect flow
// ============================================================================

fn browser_flow(
    state: &AppState,
    params: &AuthorizeParams,
    resolved: &ResolvedIdentityProvider,
    validated: &ValidatedAuthorizeRequest,
    jar: &CookieJar,
) -> Result<Response, AuthorizeFailure> {
    // Reuse the CSRF token from a valid existing cookie, otherwise mint
    // one and set the cookie on this response.
    let existing_csrf = jar
        .get(CSRF_COOKIE_NAME)
        .and_then(|c| CsrfCookie::decode(&state.codec, c.value()).ok());
    let (csrf_token, set_cookie) = match existing_csrf {
        Some(cookie) => (cookie.token, None),
        None => {
            let token = crate::oauth::random_token();
            let encoded = CsrfCookie::new(token.clone()).encode(&state.codec)?;
            (token, Some(encoded))
        }
    };

    let (pkce_verifier, pkce_challenge) = crate::oauth::generate_pkce();
    let nonce = crate::oauth::random_token();

    let envelope = AuthorizeRequestState::new(
        params.encode_without_idp_hints(),
        resolved.display_name.clone(),
        resolved.session_kind,
        nonce.clone(),
        csrf_token,
        pkce_verifier,
    )
    .encode(&state.codec)?;

    let location = match &resolved.provider {
        UpstreamProvider::Oidc(p) => p.authorize_redirect_url(
            &state.callback_uri(),
            &envelope,
            &nonce,
            &pkce_challenge,
            validated.login_hint.as_deref(),
        ),
        UpstreamProvider::Github(p) => {
            p.authorize_redirect_url(&state.callback_uri(), &envelope)
        }
        UpstreamProvider::Ldap(_) | UpstreamProvider::ActiveDirectory(_) => {
            format!("{LOGIN_PATH}?state={}", urlencoding::encode(&envelope))
        }
    };

    let mut response = found(&location);
    if let Some(encoded) = set_cookie {
        let cookie = Cookie::build((CSRF_COOKIE_NAME, encoded))
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .path("/")
            .build();
        let value = cookie
            .to_string()
            .parse()
            .map_err(|_| FedgateError::internal_error("failed to encode csrf cookie"))?;
        response
            .headers_mut()
            .append(axum::http::header::SET_COOKIE, value);
    }
    Ok(response)
}
