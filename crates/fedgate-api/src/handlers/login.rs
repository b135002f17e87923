//! Internal login page for LDAP and Active Directory upstreams
//!
//! The browser flow for directory-backed providers cannot redirect the
//! user anywhere; this page collects credentials and finishes the flow the
//! same way the CLI flow does. The encoded state envelope rides along as a
//! hidden form field and the CSRF cookie must match the token inside it.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::CookieJar;
use axum::Form;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use fedgate_identity::UpstreamProvider;

use crate::oauth::{
    validate_authorize_request, AuthorizeParams, OauthErrorCode, ProtocolError,
};
use crate::request_state::{AuthorizeRequestState, CsrfCookie};
use crate::state::AppState;

use super::authorize::{issue_code_redirect, CSRF_COOKIE_NAME};
use super::chooser::escape_html;
use super::{failure_response, AuthorizeFailure};

#[derive(Deserialize)]
pub struct LoginPageQuery {
    #[serde(default)]
    state: String,
}

pub async fn login_page(Query(query): Query<LoginPageQuery>) -> Response {
    render_form(&query.state, None)
}

fn render_form(encoded_state: &str, error: Option<&str>) -> Response {
    let notice = match error {
        Some(message) => format!("<p class=\"error\">{}</p>\n", escape_html(message)),
        None => String::new(),
    };
    let page = format!(
        "<!DOCTYPE html>\n<html><head><title>Log in</title></head>\n<body>\n<h1>Log in</h1>\n{notice}\
         <form method=\"post\" action=\"/oauth2/login\">\n\
         <input type=\"hidden\" name=\"state\" value=\"{}\"/>\n\
         <label>Username <input type=\"text\" name=\"username\" autocomplete=\"username\"/></label>\n\
         <label>Password <input type=\"password\" name=\"password\" autocomplete=\"current-password\"/></label>\n\
         <button type=\"submit\">Log in</button>\n</form>\n</body></html>\n",
        escape_html(encoded_state)
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        page,
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct LoginForm {
    state: String,
    username: String,
    password: String,
}

pub async fn login_submit(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    match handle_login(&state, &jar, form).await {
        Ok(response) => response,
        Err(failure) => failure_response(failure),
    }
}

async fn handle_login(
    state: &AppState,
    jar: &CookieJar,
    form: LoginForm,
) -> Result<Response, AuthorizeFailure> {
    // Fails closed on any decode problem.
    let envelope = AuthorizeRequestState::decode(&state.codec, &form.state).map_err(|_| {
        ProtocolError::unredirectable(OauthErrorCode::InvalidRequest, "invalid state parameter")
    })?;

    let cookie_token = jar
        .get(CSRF_COOKIE_NAME)
        .and_then(|c| CsrfCookie::decode(&state.codec, c.value()).ok())
        .map(|c| c.token);
    if cookie_token.as_deref() != Some(envelope.csrf.as_str()) {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "access_denied",
                "error_description": "CSRF check failed",
            })),
        )
            .into_response());
    }

    let resolver = state.resolver().await?;
    let resolved = resolver
        .find_upstream_idp_by_display_name(&envelope.idp_name)
        .await
        .map_err(|err| {
            ProtocolError::unredirectable(
                OauthErrorCode::InvalidRequest,
                format!("identity provider is no longer usable: {err}"),
            )
        })?;

    let params = AuthorizeParams::parse(&envelope.auth_params)?;
    let validated = validate_authorize_request(&state.clients, &params)?;

    let upstream = match &resolved.provider {
        UpstreamProvider::Ldap(p) | UpstreamProvider::ActiveDirectory(p) => p,
        _ => {
            return Err(ProtocolError::unredirectable(
                OauthErrorCode::InvalidRequest,
                "this identity provider does not use the login page",
            )
            .into())
        }
    };

    let identity = match upstream
        .authenticate_user(&form.username, &form.password)
        .await
    {
        Ok(identity) => identity,
        Err(fedgate_core::FedgateError::AuthRejected { message }) => {
            debug!(idp = %envelope.idp_name, "login rejected");
            return Ok(render_form(&form.state, Some(&message)));
        }
        Err(other) => return Err(other.into()),
    };

    let identity = match resolved.transforms.apply(identity) {
        Ok(identity) => identity,
        Err(fedgate_core::FedgateError::AuthRejected { message }) => {
            return Err(validated
                .error(OauthErrorCode::AccessDenied, message)
                .into())
        }
        Err(other) => return Err(other.into()),
    };

    issue_code_redirect(state, &validated, identity)
}
