//! Domain models for stageflow.
//!
//! # Core Concepts
//!
//! - [`Stage`]: One phase of the fixed pipeline `idea → requirements → design → tasks → development`.
//! - [`Session`]: A numbered execution context bound to one chat thread and one backing host.
//! - [`Project`]: The unit of work tracked across all stages, keyed by name.
//! - [`WorkflowState`]: Per-project pipeline bookkeeping (completed stages, threads per channel,
//!   and the marker of a transition that is still in flight).
//!
//! Everything here lives only for the lifetime of the process.

mod project;
mod session;
mod stage;
mod workflow;

pub use project::*;
pub use session::*;
pub use stage::*;
pub use workflow::*;
