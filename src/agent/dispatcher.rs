//! Realtime event routing and per-execution processing.
//!
//! Routing never blocks on an execution: accepted requests are spawned as
//! independent tasks so the realtime delivery path stays responsive. All
//! coordinator writes for one execution are sequential; writes across
//! concurrent executions are unordered relative to each other.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinSet;

use crate::coordinator::{
    Coordinator, EventAction, ExecutionPatch, ExecutionRecord, Machine, MachinePatch,
    MachineStatus, RecordEvent,
};
use crate::sandbox::SandboxRunner;
use crate::tracker::ExecutionTracker;

/// Routes realtime events into execution tasks.
pub struct Dispatcher {
    gateway: Arc<dyn Coordinator>,
    tracker: Arc<ExecutionTracker>,
    runner: Arc<SandboxRunner>,
}

impl Dispatcher {
    pub fn new(
        gateway: Arc<dyn Coordinator>,
        tracker: Arc<ExecutionTracker>,
        runner: Arc<SandboxRunner>,
    ) -> Self {
        Self {
            gateway,
            tracker,
            runner,
        }
    }

    /// Route one realtime event, spawning an execution task if it passes
    /// every gate.
    ///
    /// Gates, in order: only create events; never the invisible heartbeat
    /// record; only this machine's records (defensive; the subscription is
    /// already filtered server-side); the dedup gate, so repeated deliveries
    /// of one creation event never run the same code twice; and never
    /// records that already arrived completed (stale snapshot).
    pub fn route(
        &self,
        event: RecordEvent,
        machine_id: &str,
        machine: &Arc<RwLock<Machine>>,
        tasks: &mut JoinSet<()>,
    ) {
        if event.action != EventAction::Create {
            return;
        }
        let record = event.record;
        if record.invisible {
            return;
        }
        if record.machine != machine_id {
            tracing::debug!(execution_id = %record.id, "ignoring event for another machine");
            return;
        }
        if self.tracker.already_dispatched(&record.id) {
            tracing::debug!(execution_id = %record.id, "ignoring duplicate delivery");
            return;
        }
        self.tracker.mark_dispatched(&record.id);
        if record.completed {
            tracing::debug!(execution_id = %record.id, "ignoring already-completed execution");
            return;
        }

        tasks.spawn(process_execution(
            Arc::clone(&self.gateway),
            Arc::clone(&self.tracker),
            Arc::clone(&self.runner),
            Arc::clone(machine),
            record,
        ));
    }
}

/// Run one accepted execution end to end.
async fn process_execution(
    gateway: Arc<dyn Coordinator>,
    tracker: Arc<ExecutionTracker>,
    runner: Arc<SandboxRunner>,
    machine: Arc<RwLock<Machine>>,
    record: ExecutionRecord,
) {
    let execution_id = record.id;

    if tracker.begin_active(&execution_id) {
        push_status(gateway.as_ref(), &machine, MachineStatus::Busy).await;
    }
    tracing::info!(
        execution_id = %execution_id,
        active = tracker.active_count(),
        "executing task"
    );

    if let Err(e) = gateway
        .update_execution(&execution_id, ExecutionPatch::started())
        .await
    {
        tracing::warn!(execution_id = %execution_id, error = %e, "failed to write start marker");
    }

    let (machine_id, machine_json, context) = {
        let machine = machine.read().await;
        (
            machine.id.clone(),
            serde_json::to_string(&*machine).unwrap_or_default(),
            machine.context().cloned(),
        )
    };

    let out = runner
        .run(&record.executable, &execution_id, &machine_json, context.as_ref())
        .await;

    let patch = ExecutionPatch::finished(out.output, out.succeeded, out.duration.as_secs_f64());
    if let Err(e) = gateway.update_execution(&execution_id, patch).await {
        tracing::error!(execution_id = %execution_id, error = %e, "failed to write execution result");
    }

    // Persist whatever state blob the executed code left behind.
    if let Some(updated) = out.context {
        match gateway
            .update_machine(&machine_id, MachinePatch::data(updated))
            .await
        {
            Ok(fresh) => *machine.write().await = fresh,
            Err(e) => {
                tracing::warn!(execution_id = %execution_id, error = %e, "failed to persist machine state blob")
            }
        }
    }

    if tracker.end_active(&execution_id) {
        push_status(gateway.as_ref(), &machine, MachineStatus::Idle).await;
    }
    tracing::info!(
        execution_id = %execution_id,
        remaining = tracker.active_count(),
        "task completed"
    );
}

/// Best-effort machine status write. Failures are logged and left for the
/// liveness loop to self-correct; strict coupling of the Busy/Idle flag to
/// execution completion is deliberately not attempted.
pub(crate) async fn push_status(
    gateway: &dyn Coordinator,
    machine: &Arc<RwLock<Machine>>,
    status: MachineStatus,
) {
    let id = machine.read().await.id.clone();
    match gateway.update_machine(&id, MachinePatch::status(status)).await {
        Ok(fresh) => {
            tracing::info!(status = ?status, "machine status updated");
            *machine.write().await = fresh;
        }
        Err(e) => tracing::warn!(status = ?status, error = %e, "failed to update machine status"),
    }
}
