//! The streaming tool-loop executor and its display pipeline.
//!
//! One invocation corresponds to one batch off the per-thread queue: build
//! the request, stream the turn, dispatch tools in parallel with cost
//! accounting, iterate until `end_turn` or the cost cap, then commit.

pub mod dispatch;
pub mod display;
pub mod draft;
pub mod executor;
pub mod history;
pub mod markdown;
pub mod precheck;
pub mod session;
pub mod tools;
pub mod truncate;

pub use draft::{DeliverableFile, DraftSink};
pub use executor::{ExecutorDeps, ToolLoopExecutor};
