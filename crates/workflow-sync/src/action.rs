//! Actions sent to graphical clients and the seam that delivers them.

use crate::conflict::SyncStatus;
use crate::graph::{GraphModel, GraphModelFactory};
use crate::state::{EditMode, ModelState};
use crate::validation::Diagnostic;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientAction {
    /// Replace the client's graph
    UpdateModel { model: GraphModel },
    SetEditMode { mode: EditMode },
    /// Validation markers to show on the canvas
    SetMarkers { markers: Vec<Diagnostic> },
    SyncStatusChanged { uri: String, status: SyncStatus },
}

/// Delivers actions to one graphical client.
pub trait ActionDispatcher: Send + Sync {
    fn dispatch(&self, client_id: &str, actions: Vec<ClientAction>);
}

/// Forwards actions into a tokio channel, tagged with the receiving client.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<(String, Vec<ClientAction>)>,
}

impl ChannelDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Vec<ClientAction>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ActionDispatcher for ChannelDispatcher {
    fn dispatch(&self, client_id: &str, actions: Vec<ClientAction>) {
        if actions.is_empty() {
            return;
        }
        if self.tx.send((client_id.to_string(), actions)).is_err() {
            tracing::debug!("Action receiver for {} is gone", client_id);
        }
    }
}

/// Turns model state into the actions that bring a client up to date.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelSubmissionHandler {
    factory: GraphModelFactory,
}

impl ModelSubmissionHandler {
    pub fn new(factory: GraphModelFactory) -> Self {
        Self { factory }
    }

    /// Empty when the state has no root yet.
    pub fn submit_model(&self, state: &ModelState) -> Vec<ClientAction> {
        let Some(root) = state.root() else {
            return vec![
                ClientAction::SetEditMode { mode: state.edit_mode() },
                ClientAction::SetMarkers {
                    markers: state.diagnostics().to_vec(),
                },
            ];
        };

        vec![
            ClientAction::UpdateModel {
                model: self.factory.create(root, state.version()),
            },
            ClientAction::SetEditMode { mode: state.edit_mode() },
            ClientAction::SetMarkers {
                markers: state.diagnostics().to_vec(),
            },
        ]
    }
}
