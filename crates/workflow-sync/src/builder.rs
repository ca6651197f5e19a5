//! Parsing, validation and serialization of workflow text.
//!
//! The DSL is an indented block syntax:
//!
//! ```text
//! workflow:
//!   name: order
//!   nodes:
//!     - id: start
//!       type: begin
//!     - id: done
//!       type: end
//!   edges:
//!     - id: e1
//!       source: start
//!       target: done
//!   swimlanes:
//!     - id: sales
//!       name: Sales
//!       nodes: [start]
//! ```

use crate::model::WorkflowDocument;
use crate::validation::{self, Diagnostic};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;

/// A parse/serialize pair for the workflow DSL.
pub trait WorkflowFormat: Send + Sync {
    fn parse(&self, text: &str) -> Result<WorkflowDocument>;

    fn serialize(&self, document: &WorkflowDocument) -> Result<String>;
}

/// The indented block syntax, read and written with serde_yaml.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlWorkflowFormat;

impl WorkflowFormat for YamlWorkflowFormat {
    fn parse(&self, text: &str) -> Result<WorkflowDocument> {
        if text.trim().is_empty() {
            return Ok(WorkflowDocument::default());
        }
        serde_yaml::from_str(text).map_err(|e| ParseError::Syntax(e.to_string()))
    }

    fn serialize(&self, document: &WorkflowDocument) -> Result<String> {
        serde_yaml::to_string(document).map_err(|e| ParseError::Serialization(e.to_string()))
    }
}

/// Outcome of one build pass over a document.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub uri: String,
    /// `None` when the text could not be parsed
    pub root: Option<Arc<WorkflowDocument>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildResult {
    pub fn has_errors(&self) -> bool {
        validation::has_errors(&self.diagnostics)
    }
}

/// Turns document text into a validated semantic root.
#[derive(Clone)]
pub struct SemanticModelBuilder {
    format: Arc<dyn WorkflowFormat>,
}

impl Default for SemanticModelBuilder {
    fn default() -> Self {
        Self::new(Arc::new(YamlWorkflowFormat))
    }
}

impl SemanticModelBuilder {
    pub fn new(format: Arc<dyn WorkflowFormat>) -> Self {
        Self { format }
    }

    /// Parse and validate `text`. Syntax errors become error diagnostics.
    pub fn build(&self, uri: &str, text: &str) -> BuildResult {
        match self.format.parse(text) {
            Ok(root) => {
                let diagnostics = validation::validate(&root);
                BuildResult {
                    uri: uri.to_string(),
                    root: Some(Arc::new(root)),
                    diagnostics,
                }
            }
            Err(e) => {
                tracing::debug!("Parse failed for {}: {}", uri, e);
                BuildResult {
                    uri: uri.to_string(),
                    root: None,
                    diagnostics: vec![Diagnostic::error(e.to_string())],
                }
            }
        }
    }

    pub fn serialize(&self, document: &WorkflowDocument) -> Result<String> {
        self.format.serialize(document)
    }
}
