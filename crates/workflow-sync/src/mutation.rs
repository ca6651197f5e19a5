//! Graphical edits expressed as patches over an owned workflow.
//!
//! A patch never edits the cached model in place. It consumes a `Workflow`
//! value and returns the edited copy, which the sync handler serializes and
//! submits as new document text.

use crate::model::{Edge, Node, Position, Size, Swimlane, Workflow};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("Unknown element: {0}")]
    UnknownElement(String),

    #[error("Element id already in use: {0}")]
    DuplicateId(String),

    #[error("Document has no workflow to edit")]
    NoWorkflow,
}

pub type Result<T> = std::result::Result<T, PatchError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ModelPatch {
    MoveNode {
        id: String,
        position: Position,
    },
    #[serde(rename_all = "camelCase")]
    ChangeBounds {
        id: String,
        position: Position,
        size: Size,
    },
    CreateNode {
        node: Node,
        /// Swimlane to place the new node in
        #[serde(default)]
        lane: Option<String>,
    },
    CreateEdge {
        edge: Edge,
    },
    CreateSwimlane {
        swimlane: Swimlane,
    },
    /// Deleting a node also removes its edges and lane membership
    DeleteElement {
        id: String,
    },
    RenameElement {
        id: String,
        label: String,
    },
    #[serde(rename_all = "camelCase")]
    AssignLane {
        node_id: String,
        /// `None` removes the node from every lane
        #[serde(default)]
        lane_id: Option<String>,
    },
}

impl ModelPatch {
    /// Apply the patch to `workflow`, returning the edited value.
    pub fn apply(&self, mut workflow: Workflow) -> Result<Workflow> {
        match self {
            ModelPatch::MoveNode { id, position } => {
                node_mut(&mut workflow, id)?.position = Some(*position);
            }
            ModelPatch::ChangeBounds { id, position, size } => {
                let node = node_mut(&mut workflow, id)?;
                node.position = Some(*position);
                node.size = Some(*size);
            }
            ModelPatch::CreateNode { node, lane } => {
                ensure_free(&workflow, &node.id)?;
                if let Some(lane) = lane {
                    lane_mut(&mut workflow, lane)?.nodes.push(node.id.clone());
                }
                workflow.nodes.push(node.clone());
            }
            ModelPatch::CreateEdge { edge } => {
                ensure_free(&workflow, &edge.id)?;
                for endpoint in [&edge.source, &edge.target] {
                    if workflow.node(endpoint).is_none() {
                        return Err(PatchError::UnknownElement(endpoint.clone()));
                    }
                }
                workflow.edges.push(edge.clone());
            }
            ModelPatch::CreateSwimlane { swimlane } => {
                ensure_free(&workflow, &swimlane.id)?;
                if let Some(missing) = swimlane.nodes.iter().find(|n| workflow.node(n).is_none()) {
                    return Err(PatchError::UnknownElement(missing.clone()));
                }
                for member in &swimlane.nodes {
                    remove_from_lanes(&mut workflow, member);
                }
                workflow.swimlanes.push(swimlane.clone());
            }
            ModelPatch::DeleteElement { id } => delete(&mut workflow, id)?,
            ModelPatch::RenameElement { id, label } => rename(&mut workflow, id, label)?,
            ModelPatch::AssignLane { node_id, lane_id } => {
                if workflow.node(node_id).is_none() {
                    return Err(PatchError::UnknownElement(node_id.clone()));
                }
                if let Some(lane_id) = lane_id {
                    // Validate before detaching so a bad lane leaves the model untouched
                    lane_mut(&mut workflow, lane_id)?;
                }
                remove_from_lanes(&mut workflow, node_id);
                if let Some(lane_id) = lane_id {
                    lane_mut(&mut workflow, lane_id)?.nodes.push(node_id.clone());
                }
            }
        }
        Ok(workflow)
    }

    /// Id of the element the patch targets.
    pub fn target_id(&self) -> &str {
        match self {
            ModelPatch::MoveNode { id, .. }
            | ModelPatch::ChangeBounds { id, .. }
            | ModelPatch::DeleteElement { id }
            | ModelPatch::RenameElement { id, .. } => id,
            ModelPatch::CreateNode { node, .. } => &node.id,
            ModelPatch::CreateEdge { edge } => &edge.id,
            ModelPatch::CreateSwimlane { swimlane } => &swimlane.id,
            ModelPatch::AssignLane { node_id, .. } => node_id,
        }
    }
}

fn node_mut<'a>(workflow: &'a mut Workflow, id: &str) -> Result<&'a mut Node> {
    workflow
        .nodes
        .iter_mut()
        .find(|n| n.id == id)
        .ok_or_else(|| PatchError::UnknownElement(id.to_string()))
}

fn lane_mut<'a>(workflow: &'a mut Workflow, id: &str) -> Result<&'a mut Swimlane> {
    workflow
        .swimlanes
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| PatchError::UnknownElement(id.to_string()))
}

fn ensure_free(workflow: &Workflow, id: &str) -> Result<()> {
    if workflow.contains_id(id) {
        Err(PatchError::DuplicateId(id.to_string()))
    } else {
        Ok(())
    }
}

fn remove_from_lanes(workflow: &mut Workflow, node_id: &str) {
    for lane in &mut workflow.swimlanes {
        lane.nodes.retain(|n| n != node_id);
    }
}

fn delete(workflow: &mut Workflow, id: &str) -> Result<()> {
    if let Some(pos) = workflow.nodes.iter().position(|n| n.id == id) {
        workflow.nodes.remove(pos);
        workflow.edges.retain(|e| e.source != id && e.target != id);
        remove_from_lanes(workflow, id);
    } else if let Some(pos) = workflow.edges.iter().position(|e| e.id == id) {
        workflow.edges.remove(pos);
    } else if let Some(pos) = workflow.swimlanes.iter().position(|s| s.id == id) {
        workflow.swimlanes.remove(pos);
    } else {
        return Err(PatchError::UnknownElement(id.to_string()));
    }
    Ok(())
}

fn rename(workflow: &mut Workflow, id: &str, label: &str) -> Result<()> {
    if let Some(node) = workflow.nodes.iter_mut().find(|n| n.id == id) {
        node.label = Some(label.to_string());
    } else if let Some(edge) = workflow.edges.iter_mut().find(|e| e.id == id) {
        edge.label = Some(label.to_string());
    } else if let Some(lane) = workflow.swimlanes.iter_mut().find(|s| s.id == id) {
        lane.name = label.to_string();
    } else {
        return Err(PatchError::UnknownElement(id.to_string()));
    }
    Ok(())
}
