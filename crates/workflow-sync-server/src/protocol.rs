//! JSON-lines client protocol.
//!
//! Each line on stdin is one [`Request`]; each line on stdout is one
//! [`Response`]. Both are tagged with `"type"` and use camelCase fields.

use serde::{Deserialize, Serialize};
use workflow_sync::conflict::{PreferSource, SyncStateInfo};
use workflow_sync::store::OpenRequest;
use workflow_sync::{ClientAction, EditMethod, ModelPatch};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Open a document for a text or form client
    Open {
        #[serde(flatten)]
        request: OpenRequest,
        #[serde(default)]
        method: EditMethod,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        uri: String,
        client_id: String,
        version: u64,
        text: String,
    },
    /// Persist `text`, or the current document text when absent
    #[serde(rename_all = "camelCase")]
    Save {
        uri: String,
        client_id: String,
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Close { uri: String, client_id: String },
    /// Start a graphical session; a client id is generated when absent
    #[serde(rename_all = "camelCase")]
    Attach {
        uri: String,
        #[serde(default)]
        client_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Detach { uri: String, client_id: String },
    #[serde(rename_all = "camelCase")]
    Patch {
        uri: String,
        client_id: String,
        patch: ModelPatch,
    },
    #[serde(rename_all = "camelCase")]
    ResolveConflict {
        uri: String,
        client_id: String,
        prefer: PreferSource,
    },
    Status { uri: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Actions {
        client_id: String,
        actions: Vec<ClientAction>,
    },
    #[serde(rename_all = "camelCase")]
    Status {
        uri: String,
        /// Client the request was made for, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        state: SyncStateInfo,
    },
    #[serde(rename_all = "camelCase")]
    Saved { uri: String, client_id: String },
    Error { message: String },
}

impl Response {
    pub fn error(message: impl std::fmt::Display) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }
}
