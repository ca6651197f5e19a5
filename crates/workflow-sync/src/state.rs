//! Per-session model state and the element index over it.

use crate::builder::BuildResult;
use crate::document::Revision;
use crate::model::{Edge, Node, Swimlane, Workflow, WorkflowDocument};
use crate::validation::{self, Diagnostic};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Whether a graphical client may edit the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    #[default]
    Editable,
    Readonly,
}

impl EditMode {
    /// Readonly whenever any diagnostic is an error.
    pub fn for_diagnostics(diagnostics: &[Diagnostic]) -> Self {
        if validation::has_errors(diagnostics) {
            EditMode::Readonly
        } else {
            EditMode::Editable
        }
    }
}

/// Position of an element inside its workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRef {
    Node(usize),
    Edge(usize),
    Swimlane(usize),
}

/// Id lookup over one semantic root.
#[derive(Debug, Clone, Default)]
pub struct ModelIndex {
    root: Option<Arc<WorkflowDocument>>,
    elements: HashMap<String, ElementRef>,
}

impl ModelIndex {
    pub fn build(root: Arc<WorkflowDocument>) -> Self {
        let mut elements = HashMap::new();
        if let Some(workflow) = &root.workflow {
            // First occurrence wins; duplicates are reported by validation
            for (i, node) in workflow.nodes.iter().enumerate() {
                elements.entry(node.id.clone()).or_insert(ElementRef::Node(i));
            }
            for (i, edge) in workflow.edges.iter().enumerate() {
                elements.entry(edge.id.clone()).or_insert(ElementRef::Edge(i));
            }
            for (i, lane) in workflow.swimlanes.iter().enumerate() {
                elements.entry(lane.id.clone()).or_insert(ElementRef::Swimlane(i));
            }
        }
        Self {
            root: Some(root),
            elements,
        }
    }

    pub fn get(&self, id: &str) -> Option<ElementRef> {
        self.elements.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        match self.get(id)? {
            ElementRef::Node(i) => self.workflow()?.nodes.get(i),
            ElementRef::Edge(_) | ElementRef::Swimlane(_) => None,
        }
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        match self.get(id)? {
            ElementRef::Edge(i) => self.workflow()?.edges.get(i),
            ElementRef::Node(_) | ElementRef::Swimlane(_) => None,
        }
    }

    pub fn swimlane(&self, id: &str) -> Option<&Swimlane> {
        match self.get(id)? {
            ElementRef::Swimlane(i) => self.workflow()?.swimlanes.get(i),
            ElementRef::Node(_) | ElementRef::Edge(_) => None,
        }
    }

    fn workflow(&self) -> Option<&Workflow> {
        self.root.as_ref()?.workflow.as_ref()
    }
}

/// Cached semantic root of one graphical session.
///
/// The root only ever comes from a reconciled build. A build that failed to
/// parse keeps the previous root and marks the session readonly.
#[derive(Debug, Clone, Default)]
pub struct ModelState {
    root: Option<Arc<WorkflowDocument>>,
    revision: Option<Revision>,
    text: String,
    diagnostics: Vec<Diagnostic>,
    edit_mode: EditMode,
    index: ModelIndex,
}

impl ModelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take over a reconciled build of `text` at `revision`.
    pub fn update(&mut self, result: &BuildResult, revision: Revision, text: impl Into<String>) {
        if let Some(root) = &result.root {
            self.index = ModelIndex::build(Arc::clone(root));
            self.root = Some(Arc::clone(root));
        }
        self.revision = Some(revision);
        self.text = text.into();
        self.diagnostics = result.diagnostics.clone();
        self.edit_mode = EditMode::for_diagnostics(&self.diagnostics);
    }

    pub fn root(&self) -> Option<&Arc<WorkflowDocument>> {
        self.root.as_ref()
    }

    pub fn workflow_model(&self) -> Option<&Workflow> {
        self.root.as_ref()?.workflow.as_ref()
    }

    pub fn revision(&self) -> Option<&Revision> {
        self.revision.as_ref()
    }

    /// Store version the state was built from, 0 before the first build.
    pub fn version(&self) -> u64 {
        self.revision.as_ref().map_or(0, |r| r.version)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn edit_mode(&self) -> EditMode {
        self.edit_mode
    }

    pub fn index(&self) -> &ModelIndex {
        &self.index
    }
}
