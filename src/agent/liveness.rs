//! Periodic liveness maintenance.
//!
//! Two jobs per tick: re-assert the machine's status when the coordinator
//! has timed the connection out server-side, and write the invisible
//! heartbeat record so the realtime channel is provably alive. The write is
//! the probe: when it fails, the loop unwinds into the supervisor's
//! reconnect handling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;

use crate::coordinator::{
    Coordinator, ExecutionPatch, ExecutionStatus, Machine, MachinePatch, MachineStatus,
};
use crate::error::GatewayError;
use crate::tracker::ExecutionTracker;

/// The liveness loop for one subscribed session.
pub struct LivenessLoop {
    gateway: Arc<dyn Coordinator>,
    tracker: Arc<ExecutionTracker>,
    machine: Arc<RwLock<Machine>>,
    heartbeat_id: String,
    interval: Duration,
}

impl LivenessLoop {
    pub fn new(
        gateway: Arc<dyn Coordinator>,
        tracker: Arc<ExecutionTracker>,
        machine: Arc<RwLock<Machine>>,
        heartbeat_id: String,
        interval: Duration,
    ) -> Self {
        Self {
            gateway,
            tracker,
            machine,
            heartbeat_id,
            interval,
        }
    }

    /// Run until a gateway call fails. Never returns otherwise.
    pub async fn run(&self) -> GatewayError {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the session just
        // initialized, so skip it.
        ticker.tick().await;

        let mut cycle = ExecutionStatus::Pending;
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick(&mut cycle).await {
                return e;
            }
        }
    }

    async fn tick(&self, cycle: &mut ExecutionStatus) -> Result<(), GatewayError> {
        // 1. Status self-healing.
        let fresh = self.gateway.fetch_machine().await?;
        if fresh.status == MachineStatus::Offline {
            let status = if self.tracker.active_count() > 0 {
                MachineStatus::Busy
            } else {
                MachineStatus::Idle
            };
            tracing::warn!(forced = ?status, "coordinator shows machine offline; re-asserting");
            let fresh = self
                .gateway
                .update_machine(&fresh.id, MachinePatch::status(status))
                .await?;
            *self.machine.write().await = fresh;
        } else {
            *self.machine.write().await = fresh;
        }

        // 2. Heartbeat probe.
        *cycle = cycle.cycled();
        self.gateway
            .update_execution(&self.heartbeat_id, ExecutionPatch::status(*cycle))
            .await?;
        tracing::debug!(status = ?*cycle, "heartbeat probe written");
        Ok(())
    }
}
