//! Seed operation and stage record types.
//!
//! These are the structures the control plane polls, so their serialized
//! field names are part of the agent's API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use seed_agent_core::{MethodKind, SeedId, Side, StageKind, StageStatus};
use seed_agent_exec::ProcessHandle;
use serde::{Deserialize, Serialize};

use crate::lifecycle::Phase;

/// Progress of one stage of a seed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StageRecord {
    /// Operation the stage belongs to.
    #[serde(rename = "SeedID")]
    pub seed_id: SeedId,
    /// The stage.
    pub stage: StageKind,
    /// Side the agent plays in the operation.
    pub side: Side,
    /// Method the operation uses.
    pub method: MethodKind,
    /// Host the agent runs on.
    pub hostname: String,
    /// When the stage was (last) started.
    pub started_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// Current status.
    pub status: StageStatus,
    /// Progress text, or the error text once failed.
    pub details: String,
    /// Live process of the stage. Present only while running.
    #[serde(skip)]
    pub(crate) process: Option<ProcessHandle>,
    /// Dispatch that owns the record; completions of older dispatches are dropped.
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl StageRecord {
    pub(crate) fn running(
        operation: &SeedOperation,
        stage: StageKind,
        hostname: &str,
        generation: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            seed_id: operation.seed_id,
            stage,
            side: operation.side,
            method: operation.method,
            hostname: hostname.to_string(),
            started_at: now,
            updated_at: now,
            status: StageStatus::Running,
            details: format!("{stage} started"),
            process: None,
            generation,
        }
    }

    /// Handle of the command the stage is currently running, if any.
    #[must_use]
    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    /// Settle the record and drop its process handle.
    pub(crate) fn settle(&mut self, status: StageStatus, details: impl Into<String>) {
        self.status = status;
        self.details = details.into();
        self.process = None;
        self.updated_at = Utc::now();
    }
}

/// The seed operation an agent currently holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SeedOperation {
    /// Operation ID assigned by the control plane.
    #[serde(rename = "ID")]
    pub seed_id: SeedId,
    /// Most recently started stage.
    pub stage: StageKind,
    /// Side fixed at Prepare.
    pub side: Side,
    /// Method fixed at Prepare.
    pub method: MethodKind,
    /// Status of the most recently started stage.
    pub status: StageStatus,
    /// Every stage started so far.
    #[serde(rename = "StageRecords")]
    pub records: BTreeMap<StageKind, StageRecord>,
}

impl SeedOperation {
    pub(crate) fn new(seed_id: SeedId, side: Side, method: MethodKind) -> Self {
        Self {
            seed_id,
            stage: StageKind::Prepare,
            side,
            method,
            status: StageStatus::Running,
            records: BTreeMap::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        if self.records.is_empty() {
            return Phase::Idle;
        }
        Phase::of(self.stage, self.status)
    }

    /// Record of `stage`, if it was started.
    #[must_use]
    pub fn record(&self, stage: StageKind) -> Option<&StageRecord> {
        self.records.get(&stage)
    }

    /// A forward stage with a live or pending dispatch.
    #[must_use]
    pub fn running_stage(&self) -> Option<StageKind> {
        self.records
            .values()
            .find(|r| r.stage != StageKind::MetadataFetch && r.status == StageStatus::Running)
            .map(|r| r.stage)
    }
}

/// Result of a stage request that was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage was dispatched.
    Started,
    /// The stage is already running or completed; nothing was dispatched.
    AlreadyStarted(StageKind),
}

impl StageOutcome {
    /// Response text for the control plane.
    #[must_use]
    pub fn message(self) -> String {
        match self {
            Self::Started => "Started".to_string(),
            Self::AlreadyStarted(stage) => format!("{stage} stage already started for seed"),
        }
    }
}

/// Parameters of a stage request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageRequest {
    /// Prepare on the given side.
    Prepare {
        /// Side this agent plays.
        side: Side,
    },
    /// Back up against a peer.
    Backup {
        /// The peer host.
        host: String,
        /// The peer's database port.
        port: u16,
    },
    /// Restore the backup locally.
    Restore,
    /// Clean up on the given side.
    Cleanup {
        /// Side this agent plays.
        side: Side,
    },
}

impl StageRequest {
    /// Stage the request starts.
    #[must_use]
    pub const fn stage(&self) -> StageKind {
        match self {
            Self::Prepare { .. } => StageKind::Prepare,
            Self::Backup { .. } => StageKind::Backup,
            Self::Restore => StageKind::Restore,
            Self::Cleanup { .. } => StageKind::Cleanup,
        }
    }
}
