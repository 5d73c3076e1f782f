//! Stage transition log.

use seed_agent_core::StageStatus;
use seed_agent_control::StageRecord;
use tokio::sync::broadcast::{self, error::RecvError};

/// Log every stage record published by the state machine until the
/// channel closes.
pub async fn log_stage_events(mut events: broadcast::Receiver<StageRecord>) {
    loop {
        match events.recv().await {
            Ok(record) => log_record(&record),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Stage event log fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_record(record: &StageRecord) {
    match record.status {
        StageStatus::Error | StageStatus::Cancelled => tracing::warn!(
            seed_id = %record.seed_id,
            stage = %record.stage,
            side = %record.side,
            method = %record.method,
            status = %record.status,
            details = %record.details,
            "Stage event"
        ),
        _ => tracing::info!(
            seed_id = %record.seed_id,
            stage = %record.stage,
            side = %record.side,
            method = %record.method,
            status = %record.status,
            details = %record.details,
            "Stage event"
        ),
    }
}
