//! HTTP routes for the proxy entrypoint.
//!
//! `GET /?url=<token>[&refresh]` decodes the token, makes sure the entry is
//! fresh, and replays it. Parameter names come from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use revcache_core::{AppConfig, CacheController, token};

use crate::error::ProxyError;
use crate::replay::replay;

/// Shared state handed to every request.
#[derive(Clone, Debug)]
pub struct AppState {
    pub controller: CacheController,
    pub url_param: Arc<str>,
    pub refresh_param: Option<Arc<str>>,
}

impl AppState {
    pub fn new(controller: CacheController, config: &AppConfig) -> Self {
        Self {
            controller,
            url_param: Arc::from(config.url_param.as_str()),
            refresh_param: config.refresh_param().map(Arc::from),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", get(proxy)).route("/healthz", get(healthz)).with_state(state)
}

async fn proxy(
    State(state): State<AppState>, Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ProxyError> {
    let token = params
        .get(&*state.url_param)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProxyError::MissingParam(format!("query parameter `{}` is required", state.url_param)))?;
    let force_refresh = state.refresh_param.as_deref().is_some_and(|p| params.contains_key(p));

    let url = token::decode(token)?;
    tracing::debug!(url = %url, force_refresh, "proxy request");

    let entry = state.controller.fetch_and_serve(&url, force_refresh).await?;
    Ok(replay(entry))
}

async fn healthz() -> &'static str {
    "ok"
}
