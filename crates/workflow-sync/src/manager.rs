//! SyncManager: one coordinator for the sync state of every open URI.
//!
//! Responsibilities:
//! - Single-flight: at most one sync per URI runs at a time; a second request
//!   while one is in flight returns immediately with no actions
//! - Bounded attempts: each attempt is cut off after `sync_timeout` and
//!   transient failures are retried with exponential backoff
//! - Version tracking: store revisions are compared with the last-known-good
//!   version to detect conflicts
//! - Status: the aggregate `SyncStateInfo` per URI

use crate::action::ClientAction;
use crate::builder::ParseError;
use crate::config::SyncConfig;
use crate::conflict::{SyncConflict, SyncDirection, SyncStateInfo, SyncStatus};
use crate::document::Revision;
use crate::mutation::PatchError;
use crate::store::StoreError;
use crate::version::{compare_versions, detect_conflict, now_millis, EditMethod, VersionInfo, VersionOrdering};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(2);
const BACKOFF_FACTOR: f64 = 2.0;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync of {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },

    #[error("Unresolved conflict on {0}")]
    Conflict(String),

    #[error("No model has been built for {0}")]
    NoModel(String),

    #[error("Model of {0} is readonly until its errors are fixed")]
    Readonly(String),

    #[error("Edit of {uri} is based on version {base}, the document is at {current}")]
    Stale { uri: String, base: u64, current: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Timeout { .. } | SyncError::Store(StoreError::Fs(_)))
    }
}

/// Delay before retry number `attempt` (1-based).
pub fn calculate_backoff(attempt: u32) -> Duration {
    let delay_secs = BACKOFF_INITIAL.as_secs_f64() * BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
    Duration::from_secs_f64(delay_secs.min(BACKOFF_MAX.as_secs_f64()))
}

/// How a store revision relates to the last-known-good version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Nothing new
    InSync,
    /// The revision is the new last-known-good version
    Advanced,
    /// The revision is older than what is already reconciled
    KeepLocal,
    /// The revision diverged and needs a resolution
    Conflict(SyncConflict),
}

#[derive(Debug, Default)]
struct UriState {
    info: SyncStateInfo,
    methods: HashMap<String, EditMethod>,
    last_known: Option<VersionInfo>,
    /// Last observed (version, checksum) and what it was classified as
    last_observation: Option<(u64, String, Observation)>,
    in_flight: bool,
}

pub struct SyncManager {
    config: SyncConfig,
    states: Mutex<HashMap<String, UriState>>,
}

/// Clears the in-flight flag however the sync ends.
struct InFlightGuard<'a> {
    manager: &'a SyncManager,
    uri: &'a str,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.manager.states().get_mut(self.uri) {
            state.in_flight = false;
        }
    }
}

impl SyncManager {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register a client editing `uri` with `method`.
    pub fn connect(&self, uri: &str, client_id: &str, method: EditMethod) {
        let mut states = self.states();
        let state = states.entry(uri.to_string()).or_default();
        state.info.connected_clients.insert(client_id.to_string());
        state.methods.insert(client_id.to_string(), method);
        info!("Client {} ({}) connected to {}", client_id, method, uri);
    }

    /// Forget a client. The URI's state is dropped with its last client.
    pub fn disconnect(&self, uri: &str, client_id: &str) {
        let mut states = self.states();
        let Some(state) = states.get_mut(uri) else {
            return;
        };
        state.info.connected_clients.remove(client_id);
        state.methods.remove(client_id);
        info!("Client {} disconnected from {}", client_id, uri);

        if state.info.connected_clients.is_empty() && !state.in_flight {
            states.remove(uri);
        }
    }

    pub fn method_of(&self, uri: &str, client_id: &str) -> EditMethod {
        self.states()
            .get(uri)
            .and_then(|s| s.methods.get(client_id).copied())
            .unwrap_or_default()
    }

    /// Classify a store revision against the last-known-good version.
    ///
    /// Observing the same revision again returns the same answer without
    /// counting it twice.
    pub fn observe(&self, uri: &str, revision: &Revision) -> Observation {
        let mut states = self.states();
        let state = states.entry(uri.to_string()).or_default();

        if let Some((version, checksum, observation)) = &state.last_observation {
            if *version == revision.version && *checksum == revision.checksum {
                return observation.clone();
            }
        }

        let method = state.methods.get(&revision.client_id).copied().unwrap_or_default();
        let remote = VersionInfo {
            version: revision.claimed_version,
            timestamp: revision.timestamp,
            client_id: revision.client_id.clone(),
            method,
            checksum: Some(revision.checksum.clone()),
        };
        // The store may have bumped the claimed version; track what it assigned
        let accepted = VersionInfo {
            version: revision.version,
            ..remote.clone()
        };

        let observation = match &state.last_known {
            None => Observation::Advanced,
            Some(local) => match detect_conflict(uri, local, &remote) {
                Some(conflict) => Observation::Conflict(conflict),
                None => match compare_versions(local, &remote) {
                    VersionOrdering::InSync => Observation::InSync,
                    VersionOrdering::LocalNewer => Observation::KeepLocal,
                    VersionOrdering::RemoteNewer | VersionOrdering::Diverged => Observation::Advanced,
                },
            },
        };

        match &observation {
            Observation::Advanced => {
                debug!("{} advanced to version {} by {}", uri, revision.version, revision.client_id);
                state.last_known = Some(accepted);
                state.info.pending_changes += 1;
            }
            Observation::KeepLocal => {
                debug!(
                    "{} version {} from {} is older than the reconciled state",
                    uri, revision.claimed_version, revision.client_id
                );
                state.info.pending_changes += 1;
            }
            Observation::Conflict(conflict) => {
                warn!("Conflict on {}: {}", uri, conflict.description);
                state.info.conflicts.push(conflict.clone());
                state.info.status = SyncStatus::Conflict;
            }
            Observation::InSync => {}
        }

        state.last_observation = Some((revision.version, revision.checksum.clone(), observation.clone()));
        observation
    }

    /// Clear active conflicts ahead of a replay.
    ///
    /// With `accept`, that revision becomes the last-known-good version.
    pub fn begin_resolution(&self, uri: &str, accept: Option<&Revision>) {
        let mut states = self.states();
        let state = states.entry(uri.to_string()).or_default();

        let cleared = state.info.conflicts.len();
        state.info.conflicts.clear();
        if state.info.status == SyncStatus::Conflict {
            state.info.status = SyncStatus::Idle;
        }
        if let Some(revision) = accept {
            let method = state.methods.get(&revision.client_id).copied().unwrap_or_default();
            state.last_known = Some(VersionInfo {
                version: revision.version,
                timestamp: revision.timestamp,
                client_id: revision.client_id.clone(),
                method,
                checksum: Some(revision.checksum.clone()),
            });
        }
        state.last_observation = None;
        info!("Resolving {} conflict(s) on {}", cleared, uri);
    }

    /// Run one sync of `uri` in `direction`.
    ///
    /// Returns no actions if a sync is already in flight, or if every attempt
    /// failed (the status then reads `error`).
    pub async fn run<F, Fut>(&self, uri: &str, direction: SyncDirection, mut attempt: F) -> Vec<ClientAction>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<ClientAction>>>,
    {
        {
            let mut states = self.states();
            let state = states.entry(uri.to_string()).or_default();
            if state.in_flight {
                debug!("Sync of {} already in flight, skipping {:?}", uri, direction);
                return Vec::new();
            }
            state.in_flight = true;
            if state.info.status != SyncStatus::Conflict {
                state.info.status = SyncStatus::Syncing;
            }
        }
        let _guard = InFlightGuard { manager: self, uri };

        let timeout = self.config.sync_timeout;
        let mut tries: u32 = 0;
        loop {
            let outcome = match tokio::time::timeout(timeout, attempt()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout {
                    uri: uri.to_string(),
                    timeout,
                }),
            };

            match outcome {
                Ok(actions) => {
                    let mut states = self.states();
                    let state = states.entry(uri.to_string()).or_default();
                    state.info.status = SyncStatus::Synced;
                    state.info.last_sync_time = Some(now_millis());
                    if direction == SyncDirection::SemanticToGraph {
                        state.info.pending_changes = 0;
                    }
                    debug!("Synced {} ({:?})", uri, direction);
                    return actions;
                }
                Err(SyncError::Conflict(_)) => {
                    debug!("Sync of {} deferred until its conflict is resolved", uri);
                    let mut states = self.states();
                    let state = states.entry(uri.to_string()).or_default();
                    state.info.status = SyncStatus::Conflict;
                    return Vec::new();
                }
                Err(e) if e.is_transient() && tries < self.config.max_retries => {
                    tries += 1;
                    let delay = calculate_backoff(tries);
                    warn!("Sync of {} failed ({}), retry {} in {:?}", uri, e, tries, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Sync of {} ({:?}) failed: {}", uri, direction, e);
                    let mut states = self.states();
                    let state = states.entry(uri.to_string()).or_default();
                    state.info.status = SyncStatus::Error;
                    return Vec::new();
                }
            }
        }
    }

    pub fn status(&self, uri: &str) -> SyncStateInfo {
        self.states()
            .get(uri)
            .map(|s| s.info.clone())
            .unwrap_or_default()
    }

    pub fn has_conflict(&self, uri: &str) -> bool {
        self.states().get(uri).is_some_and(|s| s.info.has_conflicts())
    }

    pub fn is_syncing(&self, uri: &str) -> bool {
        self.states().get(uri).is_some_and(|s| s.in_flight)
    }

    pub fn pending_changes(&self, uri: &str) -> usize {
        self.states().get(uri).map_or(0, |s| s.info.pending_changes)
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, UriState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictType;
    use crate::fs::FsError;
    use crate::version::calculate_checksum;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const URI: &str = "file:///a.wf";

    fn revision(claimed: u64, version: u64, client: &str, text: &str) -> Revision {
        Revision {
            claimed_version: claimed,
            version,
            client_id: client.into(),
            timestamp: now_millis(),
            checksum: calculate_checksum(text),
        }
    }

    fn manager() -> SyncManager {
        SyncManager::new(SyncConfig::default())
    }

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(1), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3), Duration::from_millis(400));
        assert_eq!(calculate_backoff(10), Duration::from_secs(2));
    }

    #[test]
    fn test_observe_advances_and_counts_pending() {
        let manager = manager();
        assert_eq!(manager.observe(URI, &revision(0, 0, "text-1", "a")), Observation::Advanced);
        assert_eq!(manager.observe(URI, &revision(1, 1, "text-1", "b")), Observation::Advanced);
        assert_eq!(manager.pending_changes(URI), 2);
    }

    #[test]
    fn test_observe_is_idempotent() {
        let manager = manager();
        let rev = revision(1, 1, "text-1", "a");
        assert_eq!(manager.observe(URI, &rev), Observation::Advanced);
        assert_eq!(manager.observe(URI, &rev), Observation::Advanced);
        assert_eq!(manager.pending_changes(URI), 1);
    }

    #[test]
    fn test_same_version_different_content_conflicts() {
        let manager = manager();
        manager.connect(URI, "graph-1", EditMethod::Graphical);
        manager.observe(URI, &revision(3, 3, "graph-1", "a"));

        // A text edit claiming version 3 with other content
        match manager.observe(URI, &revision(3, 4, "text-1", "b")) {
            Observation::Conflict(conflict) => {
                assert_eq!(conflict.conflict_type, ConflictType::DataInconsistency);
                assert_eq!(conflict.local_version, conflict.remote_version);
                assert_eq!(conflict.local_method, EditMethod::Graphical);
                assert_eq!(conflict.remote_method, EditMethod::Text);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(manager.has_conflict(URI));
        assert_eq!(manager.status(URI).status, SyncStatus::Conflict);
    }

    #[test]
    fn test_stale_claim_keeps_local() {
        let manager = manager();
        manager.observe(URI, &revision(5, 5, "graph-1", "a"));
        assert_eq!(manager.observe(URI, &revision(2, 6, "text-1", "b")), Observation::KeepLocal);
        assert!(!manager.has_conflict(URI));
    }

    #[test]
    fn test_begin_resolution_accepts_revision() {
        let manager = manager();
        manager.observe(URI, &revision(3, 3, "graph-1", "a"));
        let remote = revision(3, 4, "text-1", "b");
        manager.observe(URI, &remote);

        manager.begin_resolution(URI, Some(&remote));
        assert!(!manager.has_conflict(URI));
        assert_eq!(manager.status(URI).status, SyncStatus::Idle);

        // Re-observing the accepted revision is now in sync
        let again = Revision {
            claimed_version: 4,
            ..remote
        };
        assert_eq!(manager.observe(URI, &again), Observation::InSync);
    }

    #[test]
    fn test_connect_and_disconnect() {
        let manager = manager();
        manager.connect(URI, "graph-1", EditMethod::Graphical);
        manager.connect(URI, "text-1", EditMethod::Text);
        assert_eq!(manager.status(URI).connected_clients.len(), 2);
        assert_eq!(manager.method_of(URI, "graph-1"), EditMethod::Graphical);

        manager.disconnect(URI, "graph-1");
        manager.disconnect(URI, "text-1");
        assert_eq!(manager.status(URI), SyncStateInfo::default());
    }

    #[tokio::test]
    async fn test_run_success_marks_synced() {
        let manager = manager();
        manager.observe(URI, &revision(1, 1, "text-1", "a"));

        let actions = manager
            .run(URI, SyncDirection::SemanticToGraph, || async {
                Ok::<Vec<ClientAction>, SyncError>(Vec::new())
            })
            .await;
        assert!(actions.is_empty());

        let info = manager.status(URI);
        assert_eq!(info.status, SyncStatus::Synced);
        assert!(info.last_sync_time.is_some());
        assert_eq!(info.pending_changes, 0);
        assert!(!manager.is_syncing(URI));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_concurrent_run_returns_immediately() {
        let manager = manager();
        let calls = AtomicU32::new(0);

        let slow = manager.run(URI, SyncDirection::SemanticToGraph, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, SyncError>(vec![ClientAction::SyncStatusChanged {
                    uri: URI.into(),
                    status: SyncStatus::Synced,
                }])
            }
        });
        let second = async {
            tokio::task::yield_now().await;
            assert!(manager.is_syncing(URI));
            manager
                .run(URI, SyncDirection::SemanticToGraph, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<Vec<ClientAction>, SyncError>(Vec::new()) }
                })
                .await
        };

        let (first, second) = futures::join!(slow, second);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!manager.is_syncing(URI));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_uris_sync_while_one_is_in_flight() {
        const OTHER: &str = "file:///b.wf";
        let manager = manager();
        let other_calls = AtomicU32::new(0);

        let slow = manager.run(URI, SyncDirection::SemanticToGraph, || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<Vec<ClientAction>, SyncError>(Vec::new())
        });
        let other = async {
            tokio::task::yield_now().await;
            assert!(manager.is_syncing(URI));
            let actions = manager
                .run(OTHER, SyncDirection::SemanticToGraph, || {
                    other_calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Ok::<_, SyncError>(vec![ClientAction::SyncStatusChanged {
                            uri: OTHER.into(),
                            status: SyncStatus::Synced,
                        }])
                    }
                })
                .await;
            // Finished while the first URI is still syncing
            assert!(manager.is_syncing(URI));
            actions
        };

        let (_, other) = futures::join!(slow, other);
        assert_eq!(other.len(), 1);
        assert_eq!(other_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(OTHER).status, SyncStatus::Synced);
        assert!(!manager.is_syncing(URI));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_then_errors() {
        let manager = SyncManager::new(SyncConfig {
            sync_timeout: Duration::from_millis(50),
            max_retries: 2,
            ..SyncConfig::default()
        });
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let actions = manager
            .run(URI, SyncDirection::GraphToSemantic, move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<Vec<ClientAction>, SyncError>(Vec::new())
                }
            })
            .await;

        assert!(actions.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.status(URI).status, SyncStatus::Error);
        assert!(!manager.is_syncing(URI));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_recovers() {
        let manager = manager();
        let calls = AtomicU32::new(0);

        let actions = manager
            .run(URI, SyncDirection::SemanticToGraph, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(SyncError::Store(StoreError::Fs(FsError::Io("busy".into()))))
                    } else {
                        Ok(vec![ClientAction::SyncStatusChanged {
                            uri: URI.into(),
                            status: SyncStatus::Synced,
                        }])
                    }
                }
            })
            .await;

        assert_eq!(actions.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.status(URI).status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_usage_error_is_not_retried() {
        let manager = manager();
        let calls = AtomicU32::new(0);

        manager
            .run(URI, SyncDirection::SemanticToGraph, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<Vec<ClientAction>, _>(SyncError::NoModel(URI.into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(URI).status, SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_conflict_refusal_keeps_conflict_status() {
        let manager = manager();
        manager.observe(URI, &revision(3, 3, "graph-1", "a"));
        manager.observe(URI, &revision(3, 4, "text-1", "b"));

        manager
            .run(URI, SyncDirection::SemanticToGraph, || async {
                Err::<Vec<ClientAction>, _>(SyncError::Conflict(URI.into()))
            })
            .await;
        assert_eq!(manager.status(URI).status, SyncStatus::Conflict);
    }
}
