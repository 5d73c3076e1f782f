//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use seed_agent_control::SeedControl;

use crate::handlers::{health, seed};
use crate::state::AgentState;

/// Create the agent router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET {status_endpoint}` - `OK` / `BAD` (default `/api/status`)
///
/// ## Seed stages (token required)
/// - `GET /api/prepare/:seed_id/:method/:side`
/// - `GET /api/backup/:seed_id/:method/:host/:port`
/// - `GET /api/restore/:seed_id/:method`
/// - `GET /api/cleanup/:seed_id/:method/:side`
/// - `GET /api/get-metadata/:seed_id/:method`
/// - `GET /api/abort-seed-stage/:seed_id/:stage`
/// - `GET /api/seed-stage-state/:seed_id/:stage`
/// - `GET /api/active-seed`
/// - `GET /api/seed-methods`
pub fn create_router<C>(state: AgentState<C>) -> Router
where
    C: SeedControl + 'static,
{
    let status_endpoint = state.config.status_endpoint.clone();
    let state = Arc::new(state);

    Router::new()
        // Status (public)
        .route(&status_endpoint, get(health::status::<C>))
        // Stage requests
        .route(
            "/api/prepare/:seed_id/:method/:side",
            get(seed::prepare::<C>),
        )
        .route(
            "/api/backup/:seed_id/:method/:host/:port",
            get(seed::backup::<C>),
        )
        .route("/api/restore/:seed_id/:method", get(seed::restore::<C>))
        .route(
            "/api/cleanup/:seed_id/:method/:side",
            get(seed::cleanup::<C>),
        )
        .route(
            "/api/get-metadata/:seed_id/:method",
            get(seed::get_metadata::<C>),
        )
        // Stage control and inspection
        .route(
            "/api/abort-seed-stage/:seed_id/:stage",
            get(seed::abort_seed_stage::<C>),
        )
        .route(
            "/api/seed-stage-state/:seed_id/:stage",
            get(seed::seed_stage_state::<C>),
        )
        .route("/api/active-seed", get(seed::active_seed::<C>))
        .route("/api/seed-methods", get(seed::seed_methods::<C>))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
