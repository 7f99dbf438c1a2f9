//! The Flow Expander, Flow Engine, and Run Supervisor: the concurrency and
//! orchestration layer built on top of `flowctl-core`'s Step Kernel.

pub mod cancel;
pub mod engine;
pub mod expander;
pub mod status;
pub mod supervisor;

pub use cancel::CancelLatch;
pub use engine::{run_flow, EngineShared};
pub use expander::expand_flows;
pub use status::{ActiveGuard, StatusBoard};
pub use supervisor::{orchestrate, SupervisorOptions, SupervisorReport};
