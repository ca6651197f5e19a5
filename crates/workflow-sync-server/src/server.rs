//! Request handling and the stdio serve loop.

use crate::protocol::{Request, Response};
use crate::watcher::{FileEvent, FileEventKind};

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use workflow_sync::fs::FileSystem;
use workflow_sync::store::{DocumentStore, OpenHandle, StoreError};
use workflow_sync::{ChannelDispatcher, ClientAction, SyncConfig, SyncError, SyncHandler, SyncManager};

pub type ActionReceiver = mpsc::UnboundedReceiver<(String, Vec<ClientAction>)>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Client {client_id} has not opened {uri}")]
    NotOpened { uri: String, client_id: String },

    #[error("No graphical session {client_id} on {uri}")]
    NotAttached { uri: String, client_id: String },

    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

type SessionKey = (String, String);

/// Server state: the store, the sync coordinator and every client session.
pub struct WorkflowServer<F: FileSystem + 'static> {
    store: Arc<DocumentStore<F>>,
    manager: Arc<SyncManager>,
    dispatcher: Arc<ChannelDispatcher>,
    /// Text and form clients' holds on their documents
    documents: HashMap<SessionKey, OpenHandle<F>>,
    handlers: HashMap<SessionKey, SyncHandler<F>>,
}

impl<F: FileSystem + 'static> WorkflowServer<F> {
    /// Returns the server and the receiver of actions for graphical clients.
    pub fn new(fs: F, config: SyncConfig) -> (Self, ActionReceiver) {
        let (dispatcher, actions) = ChannelDispatcher::new();
        let server = Self {
            store: Arc::new(DocumentStore::new(fs)),
            manager: Arc::new(SyncManager::new(config)),
            dispatcher: Arc::new(dispatcher),
            documents: HashMap::new(),
            handlers: HashMap::new(),
        };
        (server, actions)
    }

    pub fn store(&self) -> &Arc<DocumentStore<F>> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<SyncManager> {
        &self.manager
    }

    /// Parse and handle one protocol line. Failures become `error` responses.
    pub async fn handle_line(&mut self, line: &str) -> Response {
        let result = match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => Err(ServerError::Malformed(e)),
        };
        result.unwrap_or_else(|e| {
            warn!("Request failed: {}", e);
            Response::error(e)
        })
    }

    pub async fn handle(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::Open { request, method } => {
                let key = (request.uri.clone(), request.client_id.clone());
                if self.documents.contains_key(&key) {
                    // Already held by this client: only refresh the text
                    if let Some(text) = request.text {
                        let current = self.store.get(&key.0).map_or(0, |doc| doc.version());
                        let version = request.version.unwrap_or(current.saturating_add(1));
                        self.store.update(&key.0, version, &text, &key.1).await?;
                    }
                    return Ok(self.status(key.0, Some(key.1)));
                }
                let handle = self.store.open(request).await?;
                self.manager.connect(&key.0, &key.1, method);
                self.documents.insert(key.clone(), handle);
                Ok(self.status(key.0, Some(key.1)))
            }
            Request::Update {
                uri,
                client_id,
                version,
                text,
            } => {
                self.store.update(&uri, version, &text, &client_id).await?;
                Ok(self.status(uri, Some(client_id)))
            }
            Request::Save { uri, client_id, text } => {
                let text = match text {
                    Some(text) => text,
                    None => self
                        .store
                        .get(&uri)
                        .map(|doc| doc.text().to_string())
                        .ok_or_else(|| StoreError::NotOpen(uri.clone()))?,
                };
                self.store.save(&uri, &text, &client_id).await?;
                Ok(Response::Saved { uri, client_id })
            }
            Request::Close { uri, client_id } => {
                let key = (uri, client_id);
                let handle = self.documents.remove(&key).ok_or_else(|| ServerError::NotOpened {
                    uri: key.0.clone(),
                    client_id: key.1.clone(),
                })?;
                handle.dispose();
                self.manager.disconnect(&key.0, &key.1);
                Ok(self.status(key.0, Some(key.1)))
            }
            Request::Attach { uri, client_id } => {
                let client_id = client_id.unwrap_or_else(|| format!("graph-{}", uuid::Uuid::new_v4()));
                let key = (uri.clone(), client_id.clone());
                if self.handlers.contains_key(&key) {
                    debug!("{} is already attached to {}", client_id, uri);
                } else {
                    let handler = SyncHandler::attach(
                        Arc::clone(&self.store),
                        Arc::clone(&self.manager),
                        self.dispatcher.clone(),
                        &uri,
                        &client_id,
                    )
                    .await?;
                    self.handlers.insert(key, handler);
                }
                Ok(self.status(uri, Some(client_id)))
            }
            Request::Detach { uri, client_id } => {
                let key = (uri, client_id);
                let handler = self.handlers.remove(&key).ok_or_else(|| ServerError::NotAttached {
                    uri: key.0.clone(),
                    client_id: key.1.clone(),
                })?;
                handler.detach();
                Ok(self.status(key.0, Some(key.1)))
            }
            Request::Patch { uri, client_id, patch } => {
                self.handler(&uri, &client_id)?.submit_patch(&patch).await?;
                Ok(self.status(uri, Some(client_id)))
            }
            Request::ResolveConflict {
                uri,
                client_id,
                prefer,
            } => {
                self.handler(&uri, &client_id)?.resolve_conflict(prefer).await;
                Ok(self.status(uri, Some(client_id)))
            }
            Request::Status { uri } => Ok(self.status(uri, None)),
        }
    }

    /// Feed an external file change into the store.
    pub async fn on_file_event(&self, event: FileEvent) {
        let Some(uri) = event.uri() else {
            return;
        };
        if !self.store.is_open(&uri) {
            return;
        }

        match event.kind {
            FileEventKind::Modified => match self.store.reload_from_disk(&uri).await {
                Ok(Some(revision)) => info!("External edit to {} (version {})", uri, revision.version),
                Ok(None) => debug!("Ignoring echo of our own save to {}", uri),
                Err(e) => error!("Failed to reload {}: {}", uri, e),
            },
            FileEventKind::Deleted => {
                warn!("{} was deleted on disk while open", uri);
            }
        }
    }

    fn handler(&self, uri: &str, client_id: &str) -> Result<&SyncHandler<F>> {
        self.handlers
            .get(&(uri.to_string(), client_id.to_string()))
            .ok_or_else(|| ServerError::NotAttached {
                uri: uri.to_string(),
                client_id: client_id.to_string(),
            })
    }

    fn status(&self, uri: String, client_id: Option<String>) -> Response {
        let state = self.manager.status(&uri);
        Response::Status { uri, client_id, state }
    }
}

/// Serve requests from `reader` until it closes, writing responses and
/// dispatched actions to `writer`.
pub async fn serve<F, R, W>(
    mut server: WorkflowServer<F>,
    mut actions: ActionReceiver,
    mut file_events: Option<mpsc::UnboundedReceiver<FileEvent>>,
    reader: R,
    mut writer: W,
) -> anyhow::Result<()>
where
    F: FileSystem + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let response = server.handle_line(&line).await;
                write_response(&mut writer, &response).await?;
            }

            Some((client_id, actions)) = actions.recv() => {
                write_response(&mut writer, &Response::Actions { client_id, actions }).await?;
            }

            Some(event) = next_file_event(&mut file_events) => {
                server.on_file_event(event).await;
            }
        }
    }

    // Deliver what the last requests produced
    while let Ok((client_id, actions)) = actions.try_recv() {
        write_response(&mut writer, &Response::Actions { client_id, actions }).await?;
    }
    Ok(())
}

async fn next_file_event(events: &mut Option<mpsc::UnboundedReceiver<FileEvent>>) -> Option<FileEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
