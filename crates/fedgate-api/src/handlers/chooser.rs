//! Interstitial identity provider chooser
//!
//! Shown when a domain declares several providers, none is the default and
//! the request carried no provider hint. Each link repeats the original
//! authorize parameters plus the chosen provider's name.

use axum::extract::{RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::oauth::PARAM_IDP_NAME;
use crate::state::AppState;

use super::{failure_response, AuthorizeFailure};

pub async fn choose_identity_provider(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Response {
    match render_chooser(&state, query.unwrap_or_default()).await {
        Ok(response) => response,
        Err(failure) => failure_response(failure),
    }
}

async fn render_chooser(state: &AppState, query: String) -> Result<Response, AuthorizeFailure> {
    let resolver = state.resolver().await?;
    let providers = resolver.get_identity_providers().await;

    let mut items = String::new();
    for provider in &providers {
        let href = format!(
            "/oauth2/authorize?{query}&{PARAM_IDP_NAME}={}",
            urlencoding::encode(&provider.display_name)
        );
        items.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            escape_html(&href),
            escape_html(&provider.display_name)
        ));
    }

    let page = format!(
        "<!DOCTYPE html>\n<html><head><title>Choose an identity provider</title></head>\n\
         <body><h1>Choose an identity provider</h1>\n<ul>\n{items}</ul></body></html>\n"
    );

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        page,
    )
        .into_response())
}

pub(crate) fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
