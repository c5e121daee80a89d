//! Agent core.
//!
//! The agent orchestrates:
//! - Realtime event routing with idempotent dispatch
//! - Concurrent sandboxed execution with busy/idle status tracking
//! - A periodic liveness loop that keeps the coordinator connection honest
//! - A reconnecting supervisor that backs off and retries forever

mod dispatcher;
mod liveness;
mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::Dispatcher;
pub use liveness::LivenessLoop;
pub use supervisor::{AgentState, Supervisor, SupervisorOptions};
