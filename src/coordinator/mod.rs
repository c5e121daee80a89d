//! Coordinator gateway: typed records and the contract to the remote backend.
//!
//! The coordinator owns persistent storage and realtime event delivery; the
//! agent core only depends on the [`Coordinator`] trait. [`HttpCoordinator`]
//! is the production adapter speaking the backend's REST + SSE surface.

mod gateway;
mod http;
mod types;

pub use gateway::{Coordinator, EventStream, Subscription, UnsubscribeFuture};
pub use http::HttpCoordinator;
pub use types::{
    EventAction, ExecutionFilter, ExecutionPatch, ExecutionRecord, ExecutionStatus, Machine,
    MachinePatch, MachineStatus, NewExecution, RecordEvent, START_MARKER,
};
