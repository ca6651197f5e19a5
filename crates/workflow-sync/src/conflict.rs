//! Sync status, conflict records and resolution strategies.

use crate::version::{EditMethod, VersionInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Synchronization state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Synced,
    Conflict,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    VersionMismatch,
    ConcurrentEdit,
    DataInconsistency,
}

/// Policy applied when a conflict is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the last reconciled state and push it back to the document
    UseLocal,
    /// Accept the incoming change
    #[default]
    UseRemote,
    /// Leave the conflict in place until a client resolves it
    Manual,
}

impl ConflictResolution {
    /// Which side to replay when resolving automatically, `None` for manual.
    pub fn preferred_source(&self) -> Option<PreferSource> {
        match self {
            ConflictResolution::UseLocal => Some(PreferSource::Graph),
            ConflictResolution::UseRemote => Some(PreferSource::Semantic),
            ConflictResolution::Manual => None,
        }
    }
}

/// Representation that wins an explicit conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferSource {
    /// The reconciled model held by the graphical session
    Graph,
    /// The current document text
    Semantic,
}

/// Direction of one synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    GraphToSemantic,
    SemanticToGraph,
}

impl From<PreferSource> for SyncDirection {
    fn from(source: PreferSource) -> Self {
        match source {
            PreferSource::Graph => SyncDirection::GraphToSemantic,
            PreferSource::Semantic => SyncDirection::SemanticToGraph,
        }
    }
}

/// Two version snapshots that diverged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub uri: String,
    pub local_version: u64,
    pub remote_version: u64,
    pub local_method: EditMethod,
    pub remote_method: EditMethod,
    pub local_timestamp: u64,
    pub remote_timestamp: u64,
    pub conflict_type: ConflictType,
    pub description: String,
}

impl SyncConflict {
    pub fn between(
        uri: &str,
        local: &VersionInfo,
        remote: &VersionInfo,
        conflict_type: ConflictType,
        description: String,
    ) -> Self {
        Self {
            uri: uri.to_string(),
            local_version: local.version,
            remote_version: remote.version,
            local_method: local.method,
            remote_method: remote.method,
            local_timestamp: local.timestamp,
            remote_timestamp: remote.timestamp,
            conflict_type,
            description,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

/// One committed change to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub uri: String,
    pub source_method: EditMethod,
    pub source_client_id: String,
    pub timestamp: u64,
    pub version: u64,
    pub change_type: ChangeType,
}

impl SyncEvent {
    /// Whether a client must re-sync after this change.
    pub fn requires_resync(&self, client_id: &str) -> bool {
        self.source_client_id != client_id
    }
}

/// Aggregate sync state of one document, as shown to status UIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateInfo {
    pub status: SyncStatus,
    /// Milliseconds since Unix epoch
    pub last_sync_time: Option<u64>,
    pub pending_changes: usize,
    pub conflicts: Vec<SyncConflict>,
    pub connected_clients: BTreeSet<String>,
}

impl SyncStateInfo {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}
