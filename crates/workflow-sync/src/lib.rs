//! workflow-sync: keeps the textual and graphical models of workflow
//! documents consistent across concurrent editing clients.
//!
//! This crate provides:
//! - A document store holding the authoritative text of every open document
//! - Parsing, validation and serialization of the workflow DSL
//! - Version/checksum based conflict detection
//! - A sync manager (per-document single-flight, timeouts, retries) and
//!   per-session sync handlers with debouncing and auto-sync
//! - The graphical model factory and the patch funnel for graphical edits
//! - A FileSystem trait abstraction

pub mod action;
pub mod builder;
pub mod config;
pub mod conflict;
pub mod debounce;
pub mod document;
pub mod events;
pub mod fs;
pub mod graph;
pub mod handler;
pub mod manager;
pub mod model;
pub mod mutation;
pub mod state;
pub mod store;
pub mod validation;
pub mod version;

pub use action::{ActionDispatcher, ChannelDispatcher, ClientAction, ModelSubmissionHandler};
pub use builder::{BuildResult, ParseError, SemanticModelBuilder, WorkflowFormat, YamlWorkflowFormat};
pub use config::{ConfigError, SyncConfig};
pub use conflict::{
    ChangeType, ConflictResolution, ConflictType, PreferSource, SyncConflict, SyncDirection, SyncEvent,
    SyncStateInfo, SyncStatus,
};
pub use debounce::Debouncer;
pub use document::{Revision, TextDocument};
pub use events::{EventBus, Subscription};
pub use fs::{FileSystem, FsError, InMemoryFs};
pub use graph::{GraphModel, GraphModelFactory};
pub use handler::SyncHandler;
pub use manager::{Observation, SyncError, SyncManager};
pub use model::{Edge, Node, NodeKind, Swimlane, Workflow, WorkflowDocument};
pub use mutation::{ModelPatch, PatchError};
pub use state::{EditMode, ModelIndex, ModelState};
pub use store::{DocumentStore, OpenHandle, OpenRequest, SaveEvent, StoreError, UpdateEvent, UpdateReason};
pub use validation::{Diagnostic, Severity};
pub use version::{EditMethod, VersionInfo, calculate_checksum, detect_conflict};
