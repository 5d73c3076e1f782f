//! Status endpoint.
//!
//! Public. Reports whether the agent has reached the control plane recently.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use seed_agent_control::{Health, SeedControl};

use crate::state::AgentState;

/// Status handler.
///
/// ```text
/// GET /api/status
///
/// Response: 200 OK          (ping answered within status-bad-seconds)
/// Response: 500 BAD         (otherwise, including before the first ping)
/// ```
pub async fn status<C>(State(state): State<Arc<AgentState<C>>>) -> impl IntoResponse
where
    C: SeedControl + 'static,
{
    let health = state.identity.health(state.config.status_bad_after());
    let code = match health {
        Health::Ok => StatusCode::OK,
        Health::Bad => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, health.to_string())
}
