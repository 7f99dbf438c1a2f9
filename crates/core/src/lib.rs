//! Shared types and the Step Kernel for the flow orchestrator.
//!
//! This crate holds everything that does not itself need to drive
//! concurrency: the configuration schema, the branch/context types, the
//! error taxonomy, the external-collaborator trait seams, and the kernel
//! that executes one step in isolation. The Flow Engine, Flow Expander, and
//! Run Supervisor live in `flowctl-automation`; concrete adapters live in
//! `flowctl-adapters`.

pub mod config;
pub mod context;
pub mod error;
pub mod kernel;
pub mod placeholders;
pub mod traits;
pub mod util;

pub use config::{FlowConfig, InputRef, ResponseBuckets, StepSpec, StepType};
pub use context::{BranchContext, BranchResult};
pub use error::FlowError;
pub use kernel::{LlmDefaults, StepOutcome};
pub use traits::{CliClient, LlmClient, LlmRequest};
