//! DocumentStore: the single authoritative copy of every open workflow document.
//!
//! The store bridges the editing clients (which address documents by URI and
//! identify themselves by client id) and the filesystem. Every accepted
//! change runs a build pass (parse + validate) and notifies the listeners
//! registered for that URI.
//!
//! Lifecycle:
//! 1. `open` materializes the document from supplied text or from disk and
//!    registers the client as a holder
//! 2. `update` records a new text revision
//! 3. `save` persists the text, keeping a `.backup` of the previous file
//! 4. `close` drops the client's hold; the document is unregistered once
//!    no holder remains

use crate::builder::{BuildResult, SemanticModelBuilder};
use crate::conflict::{ChangeType, SyncEvent};
use crate::document::{Revision, TextDocument, WORKFLOW_LANGUAGE_ID};
use crate::events::{EventBus, Subscription};
use crate::fs::{FileSystem, FsError};
use crate::version::EditMethod;

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

/// Client id used for changes read back from disk.
pub const FILESYSTEM_CLIENT_ID: &str = "filesystem";

const BACKUP_SUFFIX: &str = ".backup";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document is not open: {0}")]
    NotOpen(String),

    #[error("Refusing to save empty content to {0}")]
    EmptyContent(String),

    #[error("Invalid document URI: {0:?}")]
    InvalidUri(String),

    #[error("No versions left for {0}")]
    VersionExhausted(String),

    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Why listeners are being notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    /// The document was registered by its first holder
    Opened,
    /// The document text changed in this pass
    Changed,
    /// The document was unregistered
    Deleted,
    /// Rebuilt without a text change
    Updated,
}

/// Notification sent after every build pass.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub result: BuildResult,
    /// Client whose change triggered the pass
    pub source_client_id: String,
    pub reason: UpdateReason,
    pub revision: Revision,
}

impl UpdateEvent {
    /// The committed change this notification carries, as seen by sync.
    pub fn sync_event(&self, source_method: EditMethod) -> SyncEvent {
        SyncEvent {
            uri: self.result.uri.clone(),
            source_method,
            source_client_id: self.source_client_id.clone(),
            timestamp: self.revision.timestamp,
            version: self.revision.version,
            change_type: match self.reason {
                UpdateReason::Opened => ChangeType::Create,
                UpdateReason::Deleted => ChangeType::Delete,
                UpdateReason::Changed | UpdateReason::Updated => ChangeType::Update,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaveEvent {
    pub document: TextDocument,
    pub source_client_id: String,
}

/// Arguments of [`DocumentStore::open`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRequest {
    pub uri: String,
    pub client_id: String,
    #[serde(default)]
    pub language_id: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
    /// Initial content; read from disk when absent
    #[serde(default)]
    pub text: Option<String>,
}

impl OpenRequest {
    pub fn new(uri: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            client_id: client_id.into(),
            language_id: None,
            version: None,
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

/// Keeps a client's hold on an open document. Dropping it closes the document
/// for that client.
pub struct OpenHandle<F: FileSystem + 'static> {
    store: Weak<DocumentStore<F>>,
    uri: String,
    client_id: String,
    released: bool,
}

impl<F: FileSystem + 'static> OpenHandle<F> {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Close the document for this client now.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(store) = self.store.upgrade() {
            store.close(&self.uri, &self.client_id);
        }
    }
}

impl<F: FileSystem + 'static> Drop for OpenHandle<F> {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct DocumentStore<F: FileSystem> {
    fs: F,
    builder: SemanticModelBuilder,
    documents: Mutex<HashMap<String, TextDocument>>,
    /// Latest build per URI, tagged with the document version it was built from
    builds: Mutex<HashMap<String, (u64, BuildResult)>>,
    updates: Arc<EventBus<UpdateEvent>>,
    saves: Arc<EventBus<SaveEvent>>,
}

impl<F: FileSystem + 'static> DocumentStore<F> {
    pub fn new(fs: F) -> Self {
        Self::with_builder(fs, SemanticModelBuilder::default())
    }

    pub fn with_builder(fs: F, builder: SemanticModelBuilder) -> Self {
        Self {
            fs,
            builder,
            documents: Mutex::new(HashMap::new()),
            builds: Mutex::new(HashMap::new()),
            updates: Arc::new(EventBus::new()),
            saves: Arc::new(EventBus::new()),
        }
    }

    pub fn builder(&self) -> &SemanticModelBuilder {
        &self.builder
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Open `request.uri` for `request.client_id`.
    ///
    /// An already-open document is refreshed with the supplied text instead
    /// of being duplicated.
    pub async fn open(self: &Arc<Self>, request: OpenRequest) -> Result<OpenHandle<F>> {
        let OpenRequest {
            uri,
            client_id,
            language_id,
            version,
            text,
        } = request;
        let path = uri_to_path(&uri)?;

        if !self.is_open(&uri) {
            let initial = match text.clone() {
                Some(text) => text,
                None => {
                    let bytes = self.fs.read(&path).await?;
                    String::from_utf8_lossy(&bytes).into_owned()
                }
            };

            let created = {
                let mut documents = self.documents();
                if documents.contains_key(&uri) {
                    None
                } else {
                    let mut doc = TextDocument::new(
                        uri.clone(),
                        language_id.as_deref().unwrap_or(WORKFLOW_LANGUAGE_ID),
                        version.unwrap_or(0),
                        initial,
                        client_id.clone(),
                    );
                    doc.add_holder(&client_id);
                    let revision = doc.current_revision();
                    documents.insert(uri.clone(), doc);
                    Some(revision)
                }
            };

            if let Some(revision) = created {
                info!("Opened {} for {}", uri, client_id);
                self.build_pass(&uri, UpdateReason::Opened, &client_id, revision);
                return Ok(self.handle(uri, client_id));
            }
        }

        // Already open: register the holder and refresh the text if it differs
        let refreshed = {
            let mut documents = self.documents();
            let doc = documents
                .get_mut(&uri)
                .ok_or_else(|| StoreError::NotOpen(uri.clone()))?;
            doc.add_holder(&client_id);
            match text {
                Some(text) if text != doc.text() => {
                    let claimed = version.unwrap_or(doc.version().saturating_add(1));
                    let revision = doc
                        .apply(claimed, text, &client_id)
                        .ok_or_else(|| StoreError::VersionExhausted(uri.clone()))?;
                    Some(revision)
                }
                _ => None,
            }
        };

        debug!("Joined open document {} for {}", uri, client_id);
        if let Some(revision) = refreshed {
            self.build_pass(&uri, UpdateReason::Changed, &client_id, revision);
        }

        Ok(self.handle(uri, client_id))
    }

    /// Record a new revision of an open document.
    pub async fn update(&self, uri: &str, version: u64, text: &str, client_id: &str) -> Result<Revision> {
        let revision = {
            let mut documents = self.documents();
            let doc = documents
                .get_mut(uri)
                .ok_or_else(|| StoreError::NotOpen(uri.to_string()))?;
            doc.apply(version, text, client_id)
                .ok_or_else(|| StoreError::VersionExhausted(uri.to_string()))?
        };

        debug!("Updated {} to version {} from {}", uri, revision.version, client_id);
        self.build_pass(uri, UpdateReason::Changed, client_id, revision.clone());
        Ok(revision)
    }

    /// Persist `text` for `uri`.
    ///
    /// The previous file content is copied to `<file>.backup` first. A failed
    /// backup is logged and does not stop the save.
    pub async fn save(&self, uri: &str, text: &str, client_id: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(StoreError::EmptyContent(uri.to_string()));
        }
        let path = uri_to_path(uri)?;

        if self.fs.exists(&path).await? {
            if let Err(e) = self.write_backup(&path).await {
                warn!("Could not back up {} before saving: {}", path, e);
            }
        }

        self.fs.write(&path, text.as_bytes()).await?;
        info!("Saved {} ({} bytes) for {}", uri, text.len(), client_id);

        let (document, revision) = {
            let mut documents = self.documents();
            match documents.get_mut(uri) {
                Some(doc) => {
                    let revision = if doc.text() != text {
                        let claimed = doc.version().saturating_add(1);
                        let revision = doc.apply(claimed, text, client_id);
                        if revision.is_none() {
                            warn!("Saved {} but its open copy has no versions left", uri);
                        }
                        revision
                    } else {
                        None
                    };
                    (doc.clone(), revision)
                }
                None => (
                    TextDocument::new(uri, WORKFLOW_LANGUAGE_ID, 0, text, client_id),
                    None,
                ),
            }
        };

        if let Some(revision) = revision {
            self.build_pass(uri, UpdateReason::Changed, client_id, revision);
        }

        self.saves.emit(&SaveEvent {
            document,
            source_client_id: client_id.to_string(),
        });
        Ok(())
    }

    async fn write_backup(&self, path: &str) -> std::result::Result<(), FsError> {
        let previous = self.fs.read(path).await?;
        self.fs.write(&format!("{}{}", path, BACKUP_SUFFIX), &previous).await
    }

    /// Release `client_id`'s hold on `uri`.
    ///
    /// Returns true if this was the last holder and the document is gone.
    pub fn close(&self, uri: &str, client_id: &str) -> bool {
        let removed = {
            let mut documents = self.documents();
            match documents.get_mut(uri).map(|doc| doc.remove_holder(client_id)) {
                Some(true) => documents.remove(uri),
                Some(false) => None,
                None => {
                    debug!("Close for unknown document {} from {}", uri, client_id);
                    None
                }
            }
        };

        let Some(doc) = removed else {
            return false;
        };

        info!("Closed {} (last holder {})", uri, client_id);
        self.builds().remove(uri);
        self.updates.emit(&UpdateEvent {
            result: BuildResult {
                uri: uri.to_string(),
                root: None,
                diagnostics: Vec::new(),
            },
            source_client_id: client_id.to_string(),
            reason: UpdateReason::Deleted,
            revision: doc.current_revision(),
        });
        true
    }

    /// Run a build pass without changing the text.
    pub fn rebuild(&self, uri: &str, client_id: &str) -> Result<BuildResult> {
        let revision = self
            .documents()
            .get(uri)
            .map(TextDocument::current_revision)
            .ok_or_else(|| StoreError::NotOpen(uri.to_string()))?;
        Ok(self.build_pass(uri, UpdateReason::Updated, client_id, revision))
    }

    /// Re-read an open document after it changed on disk.
    ///
    /// Returns `None` if the file matches the open text (an echo of our own save).
    pub async fn reload_from_disk(&self, uri: &str) -> Result<Option<Revision>> {
        if !self.is_open(uri) {
            return Err(StoreError::NotOpen(uri.to_string()));
        }
        let path = uri_to_path(uri)?;
        let bytes = self.fs.read(&path).await?;
        let text = String::from_utf8_lossy(&bytes);

        let revision = {
            let mut documents = self.documents();
            let doc = documents
                .get_mut(uri)
                .ok_or_else(|| StoreError::NotOpen(uri.to_string()))?;
            if doc.text() == text {
                return Ok(None);
            }
            let claimed = doc.version().saturating_add(1);
            doc.apply(claimed, text.as_ref(), FILESYSTEM_CLIENT_ID)
                .ok_or_else(|| StoreError::VersionExhausted(uri.to_string()))?
        };

        info!("Reloaded {} from disk (version {})", uri, revision.version);
        self.build_pass(uri, UpdateReason::Changed, FILESYSTEM_CLIENT_ID, revision.clone());
        Ok(Some(revision))
    }

    /// Listen to build passes of `uri`.
    pub fn on_update(
        &self,
        uri: &str,
        listener: impl Fn(&UpdateEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let uri = uri.to_string();
        self.updates
            .subscribe_filtered(move |event| event.result.uri == uri, listener)
    }

    /// Listen to saves of `uri` only.
    pub fn on_save(&self, uri: &str, listener: impl Fn(&SaveEvent) + Send + Sync + 'static) -> Subscription {
        let uri = uri.to_string();
        self.saves
            .subscribe_filtered(move |event| event.document.uri() == uri, listener)
    }

    pub fn get(&self, uri: &str) -> Option<TextDocument> {
        self.documents().get(uri).cloned()
    }

    pub fn is_open(&self, uri: &str) -> bool {
        self.documents().contains_key(uri)
    }

    pub fn holders(&self, uri: &str) -> BTreeSet<String> {
        self.documents()
            .get(uri)
            .map(|doc| doc.holders().clone())
            .unwrap_or_default()
    }

    pub fn open_uris(&self) -> Vec<String> {
        self.documents().keys().cloned().collect()
    }

    /// Latest build of `uri`, if it is open.
    pub fn build_result(&self, uri: &str) -> Option<BuildResult> {
        self.builds().get(uri).map(|(_, result)| result.clone())
    }

    /// Parse and validate the current text, cache the result, notify listeners.
    fn build_pass(&self, uri: &str, reason: UpdateReason, source_client_id: &str, revision: Revision) -> BuildResult {
        let Some(text) = self.documents().get(uri).map(|doc| doc.text().to_string()) else {
            return BuildResult {
                uri: uri.to_string(),
                root: None,
                diagnostics: Vec::new(),
            };
        };

        let result = self.builder.build(uri, &text);
        {
            let mut builds = self.builds();
            let stale = builds
                .get(uri)
                .is_some_and(|(version, _)| *version > revision.version);
            if !stale {
                builds.insert(uri.to_string(), (revision.version, result.clone()));
            }
        }

        self.updates.emit(&UpdateEvent {
            result: result.clone(),
            source_client_id: source_client_id.to_string(),
            reason,
            revision,
        });
        result
    }

    fn handle(self: &Arc<Self>, uri: String, client_id: String) -> OpenHandle<F> {
        OpenHandle {
            store: Arc::downgrade(self),
            uri,
            client_id,
            released: false,
        }
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<String, TextDocument>> {
        self.documents.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn builds(&self) -> MutexGuard<'_, HashMap<String, (u64, BuildResult)>> {
        self.builds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Filesystem path of a `file://` URI.
pub fn uri_to_path(uri: &str) -> Result<String> {
    let url = Url::parse(uri).map_err(|_| StoreError::InvalidUri(uri.to_string()))?;
    if url.scheme() != "file" {
        return Err(StoreError::InvalidUri(uri.to_string()));
    }
    let path = url
        .to_file_path()
        .map_err(|_| StoreError::InvalidUri(uri.to_string()))?;
    Ok(path.to_string_lossy().into_owned())
}
