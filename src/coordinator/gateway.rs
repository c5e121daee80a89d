//! The gateway contract consumed by the agent core.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use futures::future::BoxFuture;

use crate::coordinator::types::{
    ExecutionFilter, ExecutionPatch, ExecutionRecord, Machine, MachinePatch, NewExecution,
    RecordEvent,
};
use crate::error::GatewayError;

/// Stream of realtime record events.
pub type EventStream = Pin<Box<dyn Stream<Item = RecordEvent> + Send>>;

/// Future returned by a subscription's unsubscribe hook.
pub type UnsubscribeFuture = BoxFuture<'static, Result<(), GatewayError>>;

/// A live realtime subscription: an event stream plus its teardown hook.
///
/// Dropping the subscription closes the stream; calling [`unsubscribe`]
/// tears it down explicitly and reports teardown failures.
///
/// [`unsubscribe`]: Subscription::unsubscribe
pub struct Subscription {
    events: EventStream,
    unsubscribe: Option<Box<dyn FnOnce() -> UnsubscribeFuture + Send>>,
}

impl Subscription {
    pub fn new(
        events: EventStream,
        unsubscribe: Box<dyn FnOnce() -> UnsubscribeFuture + Send>,
    ) -> Self {
        Self {
            events,
            unsubscribe: Some(unsubscribe),
        }
    }

    /// The event stream, for polling.
    pub fn events_mut(&mut self) -> &mut EventStream {
        &mut self.events
    }

    /// Tear the subscription down. Consumes self, so the hook runs at most once.
    pub async fn unsubscribe(mut self) -> Result<(), GatewayError> {
        match self.unsubscribe.take() {
            Some(hook) => hook().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Abstraction over the remote backend.
///
/// The agent process holds exactly one machine record; `fetch_machine`
/// resolves it through the bearer token's scope without needing its ID.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Fetch this agent's machine record.
    async fn fetch_machine(&self) -> Result<Machine, GatewayError>;

    /// Apply a partial update to a machine record.
    async fn update_machine(&self, id: &str, patch: MachinePatch) -> Result<Machine, GatewayError>;

    /// Create an execution record.
    async fn create_execution(&self, fields: NewExecution)
    -> Result<ExecutionRecord, GatewayError>;

    /// Apply a partial update to an execution record.
    async fn update_execution(
        &self,
        id: &str,
        patch: ExecutionPatch,
    ) -> Result<ExecutionRecord, GatewayError>;

    /// Look up a single execution record, if one matches the filter.
    async fn fetch_execution(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Option<ExecutionRecord>, GatewayError>;

    /// Open a realtime feed of execution-record changes for one machine.
    async fn subscribe(&self, machine_id: &str) -> Result<Subscription, GatewayError>;
}
