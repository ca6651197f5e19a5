//! SyncHandler: one graphical session on one document.
//!
//! The handler listens to the document store, asks the [`SyncManager`] how
//! each revision relates to the reconciled state, and keeps its
//! [`ModelState`] and graphical client up to date:
//!
//! ```text
//! store event ──► observe ──► Advanced  ──► debounce ──► update_and_submit
//!                          ├► KeepLocal ──► debounce ──► graph→semantic replay
//!                          └► Conflict  ──► resolve per policy (or wait)
//! ```
//!
//! Graphical edits travel the other way through a single funnel:
//! `submit_patch` → commit → store update → rebuild → sync. A commit claims
//! the version after the one its model was built from and is refused once
//! the document has moved on.

use crate::action::{ActionDispatcher, ClientAction, ModelSubmissionHandler};
use crate::conflict::{ChangeType, PreferSource, SyncDirection, SyncStateInfo};
use crate::debounce::Debouncer;
use crate::events::Subscription;
use crate::fs::FileSystem;
use crate::manager::{Observation, Result, SyncError, SyncManager};
use crate::model::WorkflowDocument;
use crate::mutation::ModelPatch;
use crate::state::{EditMode, ModelState};
use crate::store::{DocumentStore, OpenHandle, OpenRequest, StoreError, UpdateEvent, UpdateReason};
use crate::version::EditMethod;

use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State shared between the handler, its store listener and its timers.
struct Session<F: FileSystem + 'static> {
    uri: String,
    client_id: String,
    store: Arc<DocumentStore<F>>,
    manager: Arc<SyncManager>,
    dispatcher: Arc<dyn ActionDispatcher>,
    submission: ModelSubmissionHandler,
    state: Mutex<ModelState>,
    debouncer: Debouncer<String>,
}

pub struct SyncHandler<F: FileSystem + 'static> {
    session: Arc<Session<F>>,
    _subscription: Subscription,
    auto_sync: Option<JoinHandle<()>>,
    _open: OpenHandle<F>,
}

impl<F: FileSystem + 'static> SyncHandler<F> {
    /// Open `uri` for graphical client `client_id` and start syncing it.
    ///
    /// The current model is submitted to the client before this returns.
    pub async fn attach(
        store: Arc<DocumentStore<F>>,
        manager: Arc<SyncManager>,
        dispatcher: Arc<dyn ActionDispatcher>,
        uri: &str,
        client_id: &str,
    ) -> Result<Self> {
        let open = store.open(OpenRequest::new(uri, client_id)).await?;
        manager.connect(uri, client_id, EditMethod::Graphical);

        let debounce_delay = manager.config().debounce_delay;
        let session = Arc::new(Session {
            uri: uri.to_string(),
            client_id: client_id.to_string(),
            store: Arc::clone(&store),
            manager,
            dispatcher,
            submission: ModelSubmissionHandler::default(),
            state: Mutex::new(ModelState::new()),
            debouncer: Debouncer::new(debounce_delay),
        });

        let weak = Arc::downgrade(&session);
        let subscription = store.on_update(uri, move |event| {
            if let Some(session) = weak.upgrade() {
                session.on_update(event);
            }
        });

        if let Some(doc) = store.get(uri) {
            session.manager.observe(uri, &doc.current_revision());
        }
        session.update_and_submit().await;

        let auto_sync = spawn_auto_sync(&session);
        info!("Sync handler attached: {} on {}", client_id, uri);

        Ok(Self {
            session,
            _subscription: subscription,
            auto_sync,
            _open: open,
        })
    }

    pub fn uri(&self) -> &str {
        &self.session.uri
    }

    pub fn client_id(&self) -> &str {
        &self.session.client_id
    }

    pub fn status(&self) -> SyncStateInfo {
        self.session.manager.status(&self.session.uri)
    }

    /// Snapshot of the session's model state.
    pub async fn model_state(&self) -> ModelState {
        self.session.state.lock().await.clone()
    }

    /// Refresh the model from the store and send it to the client.
    pub async fn update_and_submit(&self) -> Vec<ClientAction> {
        self.session.update_and_submit().await
    }

    /// Write the reconciled model back into the document.
    pub async fn sync_graph_to_semantic(&self) -> Vec<ClientAction> {
        self.session.sync_graph_to_semantic().await
    }

    /// Rebuild the model state from the document, without notifying the client.
    pub async fn sync_semantic_to_graph(&self) -> Vec<ClientAction> {
        self.session.sync_semantic_to_graph().await
    }

    /// Replay one side and discard the other.
    pub async fn resolve_conflict(&self, prefer: PreferSource) -> Vec<ClientAction> {
        self.session.resolve_conflict(prefer).await
    }

    /// Apply a graphical edit to the model and submit the result.
    pub async fn submit_patch(&self, patch: &ModelPatch) -> Result<Vec<ClientAction>> {
        self.session.submit_patch(patch).await
    }

    /// Replace the document text on behalf of this client.
    pub async fn update_source_model(&self, text: &str) -> Result<Vec<ClientAction>> {
        self.session.update_source_model(text).await
    }

    /// Stop syncing and release the document.
    pub fn detach(self) {}
}

impl<F: FileSystem + 'static> Drop for SyncHandler<F> {
    fn drop(&mut self) {
        if let Some(task) = self.auto_sync.take() {
            task.abort();
        }
        self.session.debouncer.cancel(&self.session.uri);
        self.session.manager.disconnect(&self.session.uri, &self.session.client_id);
        debug!("Sync handler detached: {} on {}", self.session.client_id, self.session.uri);
    }
}

impl<F: FileSystem + 'static> Session<F> {
    fn on_update(self: &Arc<Self>, event: &UpdateEvent) {
        let change = event.sync_event(self.manager.method_of(&self.uri, &event.source_client_id));
        if change.change_type == ChangeType::Delete {
            debug!("{} was closed by every holder", self.uri);
            return;
        }

        let observation = self.manager.observe(&self.uri, &event.revision);
        // Our own commits still surface conflicts, nothing else
        if !change.requires_resync(&self.client_id) && !matches!(observation, Observation::Conflict(_)) {
            return;
        }

        match observation {
            Observation::Advanced => self.schedule(SyncDirection::SemanticToGraph),
            Observation::InSync if event.reason == UpdateReason::Updated => {
                self.schedule(SyncDirection::SemanticToGraph)
            }
            Observation::InSync => {}
            Observation::KeepLocal => self.schedule(SyncDirection::GraphToSemantic),
            Observation::Conflict(conflict) => {
                match self.manager.config().default_conflict_resolution.preferred_source() {
                    Some(prefer) => {
                        info!("Resolving {:?} on {} in favor of {:?}", conflict.conflict_type, self.uri, prefer);
                        self.spawn_resolution(prefer);
                    }
                    None => {
                        warn!("Conflict on {} left for manual resolution", self.uri);
                        self.publish(Vec::new());
                    }
                }
            }
        }
    }

    /// Debounce a sync in `direction`. The latest request wins.
    fn schedule(self: &Arc<Self>, direction: SyncDirection) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.debouncer.call(self.uri.clone(), move || async move {
            let Some(session) = weak.upgrade() else {
                return;
            };
            match direction {
                SyncDirection::SemanticToGraph => {
                    session.update_and_submit().await;
                }
                SyncDirection::GraphToSemantic => {
                    let actions = session.sync_graph_to_semantic().await;
                    session.publish(actions);
                }
            }
        });
    }

    fn spawn_resolution(self: &Arc<Self>, prefer: PreferSource) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No runtime to resolve the conflict on {}", self.uri);
            return;
        };
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            if let Some(session) = weak.upgrade() {
                session.resolve_conflict(prefer).await;
            }
        });
    }

    async fn update_and_submit(&self) -> Vec<ClientAction> {
        let actions = self.sync_semantic_to_graph().await;
        self.publish(actions.clone());
        actions
    }

    async fn sync_semantic_to_graph(&self) -> Vec<ClientAction> {
        self.manager
            .run(&self.uri, SyncDirection::SemanticToGraph, move || self.refresh_model())
            .await
    }

    async fn sync_graph_to_semantic(&self) -> Vec<ClientAction> {
        self.manager
            .run(&self.uri, SyncDirection::GraphToSemantic, move || self.write_model())
            .await
    }

    async fn resolve_conflict(&self, prefer: PreferSource) -> Vec<ClientAction> {
        let actions = match prefer {
            PreferSource::Semantic => {
                let current = self.store.get(&self.uri).map(|doc| doc.current_revision());
                self.manager.begin_resolution(&self.uri, current.as_ref());
                self.sync_semantic_to_graph().await
            }
            PreferSource::Graph => {
                self.manager.begin_resolution(&self.uri, None);
                self.sync_graph_to_semantic().await
            }
        };
        self.publish(actions.clone());
        actions
    }

    async fn submit_patch(&self, patch: &ModelPatch) -> Result<Vec<ClientAction>> {
        let (workflow, base) = {
            let state = self.state.lock().await;
            if state.edit_mode() == EditMode::Readonly {
                return Err(SyncError::Readonly(self.uri.clone()));
            }
            let workflow = state
                .workflow_model()
                .cloned()
                .ok_or_else(|| SyncError::NoModel(self.uri.clone()))?;
            (workflow, state.version())
        };
        if self.manager.has_conflict(&self.uri) {
            return Err(SyncError::Conflict(self.uri.clone()));
        }

        debug!("Applying patch to '{}' of {} (base version {})", patch.target_id(), self.uri, base);
        let edited = patch.apply(workflow)?;
        let text = self.store.builder().serialize(&WorkflowDocument {
            workflow: Some(edited),
        })?;
        self.commit(base, &text).await
    }

    async fn update_source_model(&self, text: &str) -> Result<Vec<ClientAction>> {
        let base = self.state.lock().await.version();
        self.commit(base, text).await
    }

    /// Write `text`, edited from the model at version `base`, into the document.
    ///
    /// The commit claims `base + 1`. A document that moved past `base` since
    /// the model was built refuses the edit.
    async fn commit(&self, base: u64, text: &str) -> Result<Vec<ClientAction>> {
        let current = self
            .store
            .get(&self.uri)
            .ok_or_else(|| StoreError::NotOpen(self.uri.clone()))?
            .version();
        if current != base {
            warn!(
                "Refusing edit of {} from {}: model is at {}, document at {}",
                self.uri, self.client_id, base, current
            );
            return Err(SyncError::Stale {
                uri: self.uri.clone(),
                base,
                current,
            });
        }
        self.store
            .update(&self.uri, base.saturating_add(1), text, &self.client_id)
            .await?;

        let actions = self.sync_semantic_to_graph().await;
        self.publish(actions.clone());
        Ok(actions)
    }

    /// Take the store's latest build into the model state.
    async fn refresh_model(&self) -> Result<Vec<ClientAction>> {
        let mut state = self.state.lock().await;
        if self.manager.has_conflict(&self.uri) {
            return Err(SyncError::Conflict(self.uri.clone()));
        }

        let doc = self
            .store
            .get(&self.uri)
            .ok_or_else(|| StoreError::NotOpen(self.uri.clone()))?;
        let result = self
            .store
            .build_result(&self.uri)
            .ok_or_else(|| SyncError::NoModel(self.uri.clone()))?;

        state.update(&result, doc.current_revision(), doc.text());
        Ok(self.submission.submit_model(&state))
    }

    /// Serialize the reconciled model into the document.
    async fn write_model(&self) -> Result<Vec<ClientAction>> {
        let mut state = self.state.lock().await;
        let root = state
            .root()
            .cloned()
            .ok_or_else(|| SyncError::NoModel(self.uri.clone()))?;
        let text = self.store.builder().serialize(&root)?;

        let doc = self
            .store
            .get(&self.uri)
            .ok_or_else(|| StoreError::NotOpen(self.uri.clone()))?;
        if doc.text() != text {
            self.store
                .update(&self.uri, doc.version().saturating_add(1), &text, &self.client_id)
                .await?;
        }

        let doc = self
            .store
            .get(&self.uri)
            .ok_or_else(|| StoreError::NotOpen(self.uri.clone()))?;
        if let Some(result) = self.store.build_result(&self.uri) {
            state.update(&result, doc.current_revision(), doc.text());
        }
        Ok(self.submission.submit_model(&state))
    }

    /// Send `actions` plus the current sync status to the client.
    fn publish(&self, mut actions: Vec<ClientAction>) {
        actions.push(ClientAction::SyncStatusChanged {
            uri: self.uri.clone(),
            status: self.manager.status(&self.uri).status,
        });
        self.dispatcher.dispatch(&self.client_id, actions);
    }
}

/// Re-sync pending changes every `auto_sync_interval`, if enabled.
///
/// Picks up changes whose sync was skipped by the single-flight guard or
/// failed.
fn spawn_auto_sync<F: FileSystem + 'static>(session: &Arc<Session<F>>) -> Option<JoinHandle<()>> {
    let config = session.manager.config();
    if !config.auto_sync_enabled {
        return None;
    }
    let runtime = Handle::try_current().ok()?;
    let period = config.auto_sync_interval;
    let weak = Arc::downgrade(session);

    Some(runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(session) = weak.upgrade() else {
                break;
            };
            let uri = &session.uri;
            if session.manager.pending_changes(uri) > 0
                && !session.manager.has_conflict(uri)
                && !session.manager.is_syncing(uri)
                && !session.debouncer.is_pending(uri)
            {
                debug!("Auto-sync of {}", uri);
                session.update_and_submit().await;
            }
        }
    }))
}
