//! Graphical model derived from a reconciled semantic root.
//!
//! Rebuilt from scratch after every semantic→graph sync and sent to the
//! graphical clients inside an `UpdateModel` action.

use crate::model::{Node, NodeKind, Position, Size, Workflow, WorkflowDocument};
use serde::{Deserialize, Serialize};

const GRID_COLUMNS: usize = 4;
const GRID_ORIGIN: f64 = 50.0;
const GRID_SPACING_X: f64 = 200.0;
const GRID_SPACING_Y: f64 = 150.0;
const LANE_PADDING: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeShape {
    Circle,
    Diamond,
    Rectangle,
    Bar,
}

impl NodeShape {
    pub fn for_kind(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Begin | NodeKind::End | NodeKind::Exception => NodeShape::Circle,
            NodeKind::Decision | NodeKind::DecisionTable => NodeShape::Diamond,
            NodeKind::Process | NodeKind::Subprocess | NodeKind::Auto | NodeKind::Api => NodeShape::Rectangle,
            NodeKind::Concurrent => NodeShape::Bar,
        }
    }
}

/// Size used when the document does not specify one.
pub fn default_size(kind: NodeKind) -> Size {
    let (width, height) = match kind {
        NodeKind::Begin | NodeKind::End | NodeKind::Exception => (40.0, 40.0),
        NodeKind::Decision => (60.0, 60.0),
        NodeKind::DecisionTable => (120.0, 80.0),
        NodeKind::Process | NodeKind::Auto | NodeKind::Api => (140.0, 60.0),
        NodeKind::Subprocess => (160.0, 70.0),
        NodeKind::Concurrent => (20.0, 120.0),
    };
    Size { width, height }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GNode {
    pub id: String,
    pub kind: NodeKind,
    pub shape: NodeShape,
    pub label: String,
    pub position: Position,
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GSwimlane {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    /// Box around the member nodes
    pub bounds: Bounds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphModel {
    pub id: String,
    /// Document version this graph was built from
    pub revision: u64,
    pub nodes: Vec<GNode>,
    pub edges: Vec<GEdge>,
    pub swimlanes: Vec<GSwimlane>,
}

impl GraphModel {
    pub fn node(&self, id: &str) -> Option<&GNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphModelFactory;

impl GraphModelFactory {
    pub fn create(&self, root: &WorkflowDocument, revision: u64) -> GraphModel {
        let Some(workflow) = &root.workflow else {
            return GraphModel {
                id: String::new(),
                revision,
                nodes: Vec::new(),
                edges: Vec::new(),
                swimlanes: Vec::new(),
            };
        };

        let nodes: Vec<GNode> = workflow
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| self.create_node(i, node))
            .collect();
        let edges = workflow
            .edges
            .iter()
            .map(|edge| GEdge {
                id: edge.id.clone(),
                source_id: edge.source.clone(),
                target_id: edge.target.clone(),
                label: edge.label.clone(),
            })
            .collect();
        let swimlanes = self.create_swimlanes(workflow, &nodes);

        GraphModel {
            id: workflow.name.clone(),
            revision,
            nodes,
            edges,
            swimlanes,
        }
    }

    fn create_node(&self, index: usize, node: &Node) -> GNode {
        let position = node.position.unwrap_or_else(|| Position {
            x: GRID_ORIGIN + (index % GRID_COLUMNS) as f64 * GRID_SPACING_X,
            y: GRID_ORIGIN + (index / GRID_COLUMNS) as f64 * GRID_SPACING_Y,
        });
        GNode {
            id: node.id.clone(),
            kind: node.kind,
            shape: NodeShape::for_kind(node.kind),
            label: node.display_label().to_string(),
            position,
            size: node.size.unwrap_or_else(|| default_size(node.kind)),
        }
    }

    fn create_swimlanes(&self, workflow: &Workflow, nodes: &[GNode]) -> Vec<GSwimlane> {
        workflow
            .swimlanes
            .iter()
            .map(|lane| {
                let members: Vec<&GNode> = lane
                    .nodes
                    .iter()
                    .filter_map(|id| nodes.iter().find(|n| &n.id == id))
                    .collect();
                GSwimlane {
                    id: lane.id.clone(),
                    name: lane.name.clone(),
                    members: members.iter().map(|n| n.id.clone()).collect(),
                    bounds: enclosing(&members),
                }
            })
            .collect()
    }
}

fn enclosing(nodes: &[&GNode]) -> Bounds {
    if nodes.is_empty() {
        return Bounds::default();
    }
    let min_x = nodes.iter().map(|n| n.position.x).fold(f64::INFINITY, f64::min);
    let min_y = nodes.iter().map(|n| n.position.y).fold(f64::INFINITY, f64::min);
    let max_x = nodes
        .iter()
        .map(|n| n.position.x + n.size.width)
        .fold(f64::NEG_INFINITY, f64::max);
    let max_y = nodes
        .iter()
        .map(|n| n.position.y + n.size.height)
        .fold(f64::NEG_INFINITY, f64::max);

    Bounds {
        x: min_x - LANE_PADDING,
        y: min_y - LANE_PADDING,
        width: max_x - min_x + 2.0 * LANE_PADDING,
        height: max_y - min_y + 2.0 * LANE_PADDING,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, Swimlane};

    #[test]
    fn test_every_kind_has_a_shape_and_size() {
        let kinds = [
            NodeKind::Begin,
            NodeKind::End,
            NodeKind::Exception,
            NodeKind::Process,
            NodeKind::Decision,
            NodeKind::DecisionTable,
            NodeKind::Subprocess,
            NodeKind::Concurrent,
            NodeKind::Auto,
            NodeKind::Api,
        ];
        for kind in kinds {
            let size = default_size(kind);
            assert!(size.width > 0.0 && size.height > 0.0, "{kind}");
            let _ = NodeShape::for_kind(kind);
        }
        assert_eq!(NodeShape::for_kind(NodeKind::DecisionTable), NodeShape::Diamond);
    }

    #[test]
    fn test_create_graph() {
        let root = WorkflowDocument {
            workflow: Some(Workflow {
                name: "order".into(),
                nodes: vec![
                    Node::new("start", NodeKind::Begin).at(0.0, 0.0),
                    Node::new("work", NodeKind::Process).with_label("Do work"),
                ],
                edges: vec![Edge::new("e1", "start", "work")],
                swimlanes: vec![Swimlane {
                    id: "lane".into(),
                    name: "Team".into(),
                    nodes: vec!["start".into(), "ghost".into()],
                }],
                ..Default::default()
            }),
        };

        let graph = GraphModelFactory.create(&root, 7);
        assert_eq!(graph.id, "order");
        assert_eq!(graph.revision, 7);

        let work = graph.node("work").unwrap();
        assert_eq!(work.label, "Do work");
        assert_eq!(work.position, Position { x: 250.0, y: 50.0 });
        assert_eq!(work.size, default_size(NodeKind::Process));

        assert_eq!(graph.edges[0].source_id, "start");

        let lane = &graph.swimlanes[0];
        assert_eq!(lane.members, vec!["start".to_string()]);
        assert_eq!(
            lane.bounds,
            Bounds {
                x: -20.0,
                y: -20.0,
                width: 80.0,
                height: 80.0
            }
        );
    }

    #[test]
    fn test_empty_document() {
        let graph = GraphModelFactory.create(&WorkflowDocument::default(), 0);
        assert!(graph.nodes.is_empty());
        assert!(graph.id.is_empty());
    }
}
