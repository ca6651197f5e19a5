//! Semantic checks over a parsed workflow.

use crate::model::{NodeKind, Workflow, WorkflowDocument};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Element the diagnostic is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            element_id: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            element_id: None,
        }
    }

    pub fn on(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = Some(element_id.into());
        self
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

/// Run every rule over `document`.
pub fn validate(document: &WorkflowDocument) -> Vec<Diagnostic> {
    let Some(workflow) = &document.workflow else {
        return vec![Diagnostic::error("document does not define a workflow")];
    };

    let mut diagnostics = Vec::new();
    check_contents(workflow, &mut diagnostics);
    check_unique_ids(workflow, &mut diagnostics);
    check_edges(workflow, &mut diagnostics);
    check_nodes(workflow, &mut diagnostics);
    check_swimlanes(workflow, &mut diagnostics);
    diagnostics
}

fn check_contents(workflow: &Workflow, diagnostics: &mut Vec<Diagnostic>) {
    if workflow.nodes.is_empty() {
        diagnostics.push(Diagnostic::error(format!(
            "workflow '{}' must contain at least one node",
            workflow.name
        )));
    }
    if workflow.edges.is_empty() {
        diagnostics.push(Diagnostic::warning(format!(
            "workflow '{}' should contain at least one edge",
            workflow.name
        )));
    }
    if !workflow.nodes.is_empty() && !workflow.nodes.iter().any(|n| n.kind == NodeKind::Begin) {
        diagnostics.push(Diagnostic::warning(format!(
            "workflow '{}' has no begin node",
            workflow.name
        )));
    }
}

fn check_unique_ids(workflow: &Workflow, diagnostics: &mut Vec<Diagnostic>) {
    let mut seen = HashSet::new();
    let ids = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .chain(workflow.edges.iter().map(|e| e.id.as_str()))
        .chain(workflow.swimlanes.iter().map(|s| s.id.as_str()));

    for id in ids {
        if !seen.insert(id) {
            diagnostics.push(Diagnostic::error(format!("duplicate element id '{}'", id)).on(id));
        }
    }
}

fn check_edges(workflow: &Workflow, diagnostics: &mut Vec<Diagnostic>) {
    for edge in &workflow.edges {
        for endpoint in [&edge.source, &edge.target] {
            if workflow.node(endpoint).is_none() {
                diagnostics.push(
                    Diagnostic::error(format!("edge '{}' references unknown node '{}'", edge.id, endpoint))
                        .on(&edge.id),
                );
            }
        }
        if edge.source == edge.target {
            diagnostics.push(Diagnostic::warning(format!("edge '{}' connects a node to itself", edge.id)).on(&edge.id));
        }
    }
}

fn check_nodes(workflow: &Workflow, diagnostics: &mut Vec<Diagnostic>) {
    for node in &workflow.nodes {
        let incoming = workflow.incoming(&node.id).count();
        let outgoing = workflow.outgoing(&node.id).count();

        match node.kind {
            NodeKind::Begin => {
                if incoming > 0 {
                    diagnostics.push(
                        Diagnostic::error(format!("begin node '{}' cannot have incoming edges", node.id)).on(&node.id),
                    );
                }
            }
            NodeKind::End => {
                if outgoing > 0 {
                    diagnostics.push(
                        Diagnostic::error(format!("end node '{}' cannot have outgoing edges", node.id)).on(&node.id),
                    );
                }
            }
            NodeKind::Decision | NodeKind::DecisionTable => {
                if outgoing < 2 && !workflow.edges.is_empty() {
                    diagnostics.push(
                        Diagnostic::warning(format!("decision '{}' should have at least two outgoing edges", node.id))
                            .on(&node.id),
                    );
                }
            }
            NodeKind::Api => {
                if !node.properties.contains_key("endpoint") {
                    diagnostics.push(
                        Diagnostic::warning(format!("api node '{}' has no endpoint", node.id)).on(&node.id),
                    );
                }
            }
            NodeKind::Subprocess => {
                if !node.properties.contains_key("workflow") {
                    diagnostics.push(
                        Diagnostic::warning(format!("subprocess '{}' does not name a workflow", node.id)).on(&node.id),
                    );
                }
            }
            NodeKind::Exception | NodeKind::Process | NodeKind::Concurrent | NodeKind::Auto => {}
        }
    }
}

fn check_swimlanes(workflow: &Workflow, diagnostics: &mut Vec<Diagnostic>) {
    let mut placed = HashSet::new();
    for lane in &workflow.swimlanes {
        for member in &lane.nodes {
            if workflow.node(member).is_none() {
                diagnostics.push(
                    Diagnostic::error(format!("swimlane '{}' contains unknown node '{}'", lane.id, member)).on(&lane.id),
                );
            } else if !placed.insert(member.as_str()) {
                diagnostics.push(
                    Diagnostic::error(format!("node '{}' is placed in more than one swimlane", member)).on(member),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, Node, Swimlane};

    fn workflow(nodes: Vec<Node>, edges: Vec<Edge>) -> WorkflowDocument {
        WorkflowDocument {
            workflow: Some(Workflow {
                name: "order".into(),
                nodes,
                edges,
                ..Default::default()
            }),
        }
    }

    fn messages(diagnostics: &[Diagnostic], severity: Severity) -> Vec<&str> {
        diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| d.message.as_str())
            .collect()
    }

    #[test]
    fn test_missing_edge_is_only_a_warning() {
        let doc = workflow(
            vec![Node::new("start", NodeKind::Begin), Node::new("done", NodeKind::End)],
            vec![],
        );
        let diagnostics = validate(&doc);

        assert!(!has_errors(&diagnostics));
        assert_eq!(
            messages(&diagnostics, Severity::Warning),
            vec!["workflow 'order' should contain at least one edge"]
        );
    }

    #[test]
    fn test_empty_workflow_is_an_error() {
        let diagnostics = validate(&workflow(vec![], vec![]));
        assert!(has_errors(&diagnostics));
    }

    #[test]
    fn test_missing_workflow_section() {
        let diagnostics = validate(&WorkflowDocument::default());
        assert!(has_errors(&diagnostics));
    }

    #[test]
    fn test_dangling_edge_and_direction_rules() {
        let doc = workflow(
            vec![Node::new("start", NodeKind::Begin), Node::new("done", NodeKind::End)],
            vec![
                Edge::new("e1", "done", "start"),
                Edge::new("e2", "start", "ghost"),
            ],
        );
        let errors: Vec<_> = validate(&doc)
            .into_iter()
            .filter(|d| d.severity == Severity::Error)
            .filter_map(|d| d.element_id)
            .collect();

        assert!(errors.contains(&"e2".to_string()));
        assert!(errors.contains(&"start".to_string()));
        assert!(errors.contains(&"done".to_string()));
    }

    #[test]
    fn test_duplicate_ids() {
        let doc = workflow(
            vec![Node::new("a", NodeKind::Begin), Node::new("a", NodeKind::Process)],
            vec![Edge::new("e1", "a", "a")],
        );
        let diagnostics = validate(&doc);
        assert!(messages(&diagnostics, Severity::Error).contains(&"duplicate element id 'a'"));
        assert!(messages(&diagnostics, Severity::Warning).contains(&"edge 'e1' connects a node to itself"));
    }

    #[test]
    fn test_decision_needs_two_branches() {
        let doc = workflow(
            vec![
                Node::new("start", NodeKind::Begin),
                Node::new("check", NodeKind::Decision),
                Node::new("done", NodeKind::End),
            ],
            vec![Edge::new("e1", "start", "check"), Edge::new("e2", "check", "done")],
        );
        let diagnostics = validate(&doc);
        assert!(!has_errors(&diagnostics));
        assert_eq!(diagnostics[0].element_id.as_deref(), Some("check"));
    }

    #[test]
    fn test_swimlane_members() {
        let mut doc = workflow(vec![Node::new("start", NodeKind::Begin)], vec![]);
        let wf = doc.workflow.as_mut().unwrap();
        wf.swimlanes.push(Swimlane {
            id: "lane1".into(),
            name: "Sales".into(),
            nodes: vec!["start".into(), "ghost".into()],
        });
        wf.swimlanes.push(Swimlane {
            id: "lane2".into(),
            name: "Ops".into(),
            nodes: vec!["start".into()],
        });

        let errors = messages(&validate(&doc), Severity::Error)
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        assert!(errors.contains(&"swimlane 'lane1' contains unknown node 'ghost'".to_string()));
        assert!(errors.contains(&"node 'start' is placed in more than one swimlane".to_string()));
    }
}
