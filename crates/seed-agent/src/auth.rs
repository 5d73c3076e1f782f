//! Token extractor.
//!
//! The control plane learns the agent's token on registration and presents
//! it on every call, either in the configured header or as `?token=`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;

use seed_agent_control::SeedControl;

use crate::error::ApiError;
use crate::state::AgentState;

/// Proof that the request carried the agent's token.
#[derive(Debug, Clone, Copy)]
pub struct AgentAuth;

/// Token presented by a request, header first.
fn presented_token(parts: &Parts, header: &str) -> Option<String> {
    if !header.is_empty() {
        let from_header = parts
            .headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());
        if let Some(token) = from_header {
            return Some(token.to_string());
        }
    }

    let Query(mut query) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri).ok()?;
    query.remove("token")
}

#[async_trait]
impl<C> FromRequestParts<Arc<AgentState<C>>> for AgentAuth
where
    C: SeedControl + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AgentState<C>>,
    ) -> Result<Self, Self::Rejection> {
        let token = presented_token(parts, &state.config.token_http_header)
            .ok_or(ApiError::InvalidToken)?;

        if state.identity.token().matches(&token) {
            Ok(Self)
        } else {
            tracing::warn!(path = %parts.uri.path(), "Rejected request with invalid token");
            Err(ApiError::InvalidToken)
        }
    }
}
