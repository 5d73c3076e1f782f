//! Seed stage endpoints.
//!
//! Stage requests return as soon as the stage is dispatched; the control
//! plane polls `seed-stage-state` for the outcome.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use seed_agent_control::{SeedControl, StageOutcome};
use seed_agent_core::{SeedId, Side, StageKind};

use crate::auth::AgentAuth;
use crate::error::ApiError;
use crate::state::AgentState;

// =============================================================================
// Stage requests
// =============================================================================

/// Start Prepare.
///
/// # Errors
///
/// Returns an error if a parameter does not parse or the state machine
/// rejects the request.
pub async fn prepare<C>(
    _auth: AgentAuth,
    State(state): State<Arc<AgentState<C>>>,
    Path((seed_id, method, side)): Path<(String, String, String)>,
) -> Result<Response, ApiError>
where
    C: SeedControl + 'static,
{
    let seed_id = parse_seed_id(&seed_id)?;
    let side = parse_side(&side)?;
    let outcome = state.control.prepare(seed_id, &method, side)?;
    Ok(stage_response(outcome))
}

/// Start Backup against a peer.
///
/// # Errors
///
/// Returns an error if a parameter does not parse or the state machine
/// rejects the request.
pub async fn backup<C>(
    _auth: AgentAuth,
    State(state): State<Arc<AgentState<C>>>,
    Path((seed_id, method, host, port)): Path<(String, String, String, String)>,
) -> Result<Response, ApiError>
where
    C: SeedControl + 'static,
{
    let seed_id = parse_seed_id(&seed_id)?;
    let port = port.trim().parse::<u16>().map_err(|e| ApiError::InvalidParameter {
        name: "port",
        value: port.clone(),
        reason: e.to_string(),
    })?;
    let outcome = state.control.backup(seed_id, &method, &host, port)?;
    Ok(stage_response(outcome))
}

/// Start Restore.
///
/// # Errors
///
/// Returns an error if a parameter does not parse or the state machine
/// rejects the request.
pub async fn restore<C>(
    _auth: AgentAuth,
    State(state): State<Arc<AgentState<C>>>,
    Path((seed_id, method)): Path<(String, String)>,
) -> Result<Response, ApiError>
where
    C: SeedControl + 'static,
{
    let seed_id = parse_seed_id(&seed_id)?;
    let outcome = state.control.restore(seed_id, &method)?;
    Ok(stage_response(outcome))
}

/// Start Cleanup.
///
/// # Errors
///
/// Returns an error if a parameter does not parse or the state machine
/// rejects the request.
pub async fn cleanup<C>(
    _auth: AgentAuth,
    State(state): State<Arc<AgentState<C>>>,
    Path((seed_id, method, side)): Path<(String, String, String)>,
) -> Result<Response, ApiError>
where
    C: SeedControl + 'static,
{
    let seed_id = parse_seed_id(&seed_id)?;
    let side = parse_side(&side)?;
    let outcome = state.control.cleanup(seed_id, &method, side)?;
    Ok(stage_response(outcome))
}

/// Read binlog coordinates of the completed backup.
///
/// Unlike the other stages this one answers synchronously.
///
/// # Errors
///
/// Returns an error if the backup has not completed or its metadata cannot
/// be read.
pub async fn get_metadata<C>(
    _auth: AgentAuth,
    State(state): State<Arc<AgentState<C>>>,
    Path((seed_id, method)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError>
where
    C: SeedControl + 'static,
{
    let seed_id = parse_seed_id(&seed_id)?;
    let metadata = state.control.get_metadata(seed_id, &method).await?;
    Ok(Json(metadata))
}

// =============================================================================
// Stage control and inspection
// =============================================================================

/// Kill the process of a running stage.
///
/// # Errors
///
/// Returns an error if the stage has no live process.
pub async fn abort_seed_stage<C>(
    _auth: AgentAuth,
    State(state): State<Arc<AgentState<C>>>,
    Path((seed_id, stage)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError>
where
    C: SeedControl + 'static,
{
    let seed_id = parse_seed_id(&seed_id)?;
    let stage = parse_stage(&stage)?;
    state.control.abort_stage(seed_id, stage)?;
    Ok(format!("{stage} stage of seed {seed_id} aborted"))
}

/// Current record of one stage.
///
/// # Errors
///
/// Returns an error if the seed or stage is unknown.
pub async fn seed_stage_state<C>(
    _auth: AgentAuth,
    State(state): State<Arc<AgentState<C>>>,
    Path((seed_id, stage)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError>
where
    C: SeedControl + 'static,
{
    let seed_id = parse_seed_id(&seed_id)?;
    let stage = parse_stage(&stage)?;
    Ok(Json(state.control.stage(seed_id, stage)?))
}

/// The operation the agent holds, or `null`.
pub async fn active_seed<C>(
    _auth: AgentAuth,
    State(state): State<Arc<AgentState<C>>>,
) -> impl IntoResponse
where
    C: SeedControl + 'static,
{
    Json(state.control.active_operation())
}

/// Registered seed methods and whether each is usable on this host.
pub async fn seed_methods<C>(
    _auth: AgentAuth,
    State(state): State<Arc<AgentState<C>>>,
) -> impl IntoResponse
where
    C: SeedControl + 'static,
{
    Json(state.control.methods())
}

// =============================================================================
// Helpers
// =============================================================================

fn stage_response(outcome: StageOutcome) -> Response {
    let status = match outcome {
        StageOutcome::Started => StatusCode::ACCEPTED,
        StageOutcome::AlreadyStarted(_) => StatusCode::OK,
    };
    (status, outcome.message()).into_response()
}

fn parse_seed_id(s: &str) -> Result<SeedId, ApiError> {
    s.parse().map_err(|e| ApiError::invalid("seed_id", s, &e))
}

fn parse_side(s: &str) -> Result<Side, ApiError> {
    s.parse().map_err(|e| ApiError::invalid("side", s, &e))
}

fn parse_stage(s: &str) -> Result<StageKind, ApiError> {
    s.parse().map_err(|e| ApiError::invalid("stage", s, &e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_statuses() {
        assert_eq!(
            stage_response(StageOutcome::Started).status(),
            StatusCode::ACCEPTED
        );
        assert_eq!(
            stage_response(StageOutcome::AlreadyStarted(StageKind::Backup)).status(),
            StatusCode::OK
        );
    }

    #[test]
    fn parameter_parsing() {
        assert_eq!(parse_seed_id("42").unwrap(), SeedId::new(42));
        assert!(matches!(
            parse_seed_id("forty-two"),
            Err(ApiError::InvalidParameter { name: "seed_id", .. })
        ));
        assert!(parse_side("sideways").is_err());
        assert!(parse_stage("Teleport").is_err());
    }
}
