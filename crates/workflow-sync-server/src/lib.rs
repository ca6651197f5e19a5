//! workflow-sync-server library: the stdio server over `workflow-sync`.
//!
//! The binary is a thin shell around these modules so integration tests can
//! drive the server without spawning a process.

pub mod native_fs;
pub mod protocol;
pub mod server;
pub mod watcher;

pub use native_fs::NativeFs;
pub use protocol::{Request, Response};
pub use server::{ServerError, WorkflowServer, serve};
pub use watcher::{FileEvent, FileEventKind, FileWatcher};
