//! TextDocument: the authoritative text of one open workflow file.
//!
//! Owned exclusively by the `DocumentStore`. Every mutation goes through
//! [`TextDocument::apply`], which keeps the version monotonic and records the
//! client that produced it.

use crate::version::{calculate_checksum, now_millis};
use serde::Serialize;
use std::collections::BTreeSet;

/// Language id used when a client does not supply one.
pub const WORKFLOW_LANGUAGE_ID: &str = "workflow";

/// One committed text revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Version the client claimed for its edit
    pub claimed_version: u64,
    /// Version the store assigned (never lower than the previous one)
    pub version: u64,
    pub client_id: String,
    /// Milliseconds since Unix epoch
    pub timestamp: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocument {
    uri: String,
    language_id: String,
    text: String,
    version: u64,
    /// Client that produced the current version
    author: String,
    /// Clients holding this document open
    holders: BTreeSet<String>,
}

impl TextDocument {
    pub fn new(
        uri: impl Into<String>,
        language_id: impl Into<String>,
        version: u64,
        text: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            language_id: language_id.into(),
            text: text.into(),
            version,
            author: author.into(),
            holders: BTreeSet::new(),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn holders(&self) -> &BTreeSet<String> {
        &self.holders
    }

    /// Record a new text revision from `client_id`.
    ///
    /// The stored version becomes `max(claimed, current + 1)`. Returns `None`,
    /// leaving the document untouched, once the version reached `u64::MAX`.
    pub fn apply(&mut self, claimed: u64, text: impl Into<String>, client_id: &str) -> Option<Revision> {
        let next = self.version.checked_add(1)?;
        self.version = claimed.max(next);
        self.text = text.into();
        self.author = client_id.to_string();
        Some(Revision {
            claimed_version: claimed,
            version: self.version,
            client_id: client_id.to_string(),
            timestamp: now_millis(),
            checksum: calculate_checksum(&self.text),
        })
    }

    /// Revision describing the current state, without changing it.
    pub fn current_revision(&self) -> Revision {
        Revision {
            claimed_version: self.version,
            version: self.version,
            client_id: self.author.clone(),
            timestamp: now_millis(),
            checksum: calculate_checksum(&self.text),
        }
    }

    /// Returns false if the client already held the document.
    pub(crate) fn add_holder(&mut self, client_id: &str) -> bool {
        self.holders.insert(client_id.to_string())
    }

    /// Returns true when no holder remains.
    pub(crate) fn remove_holder(&mut self, client_id: &str) -> bool {
        self.holders.remove(client_id);
        self.holders.is_empty()
    }
}
