//! In-memory coordinator mock for agent tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::coordinator::{
    Coordinator, ExecutionFilter, ExecutionPatch, ExecutionRecord, Machine, MachinePatch,
    MachineStatus, NewExecution, RecordEvent, Subscription, UnsubscribeFuture,
};
use crate::error::GatewayError;

/// A machine record as tests expect the coordinator to hold it.
pub fn test_machine() -> Machine {
    Machine {
        id: "m1".to_string(),
        ip: String::new(),
        mac: String::new(),
        name: "test-machine".to_string(),
        region: "local".to_string(),
        status: MachineStatus::Offline,
        data: None,
    }
}

/// Shared-state coordinator double with scriptable failures.
///
/// Failure counters fail the next N calls of an operation with a
/// connectivity error; `usize::MAX` means "always".
pub struct MockCoordinator {
    machine: Mutex<Machine>,
    executions: Mutex<HashMap<String, ExecutionRecord>>,
    execution_updates: Mutex<Vec<(String, ExecutionPatch)>>,
    status_history: Mutex<Vec<MachineStatus>>,
    event_senders: Mutex<Vec<mpsc::Sender<RecordEvent>>>,
    created: AtomicUsize,
    pub subscribe_count: AtomicUsize,
    pub unsubscribe_count: Arc<AtomicUsize>,
    fail_fetch_machine: AtomicUsize,
    fail_update_machine: AtomicUsize,
    fail_update_execution: AtomicUsize,
    fail_subscribe: AtomicUsize,
    fail_unsubscribe: Arc<AtomicBool>,
}

impl MockCoordinator {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine: Mutex::new(machine),
            executions: Mutex::new(HashMap::new()),
            execution_updates: Mutex::new(Vec::new()),
            status_history: Mutex::new(Vec::new()),
            event_senders: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            subscribe_count: AtomicUsize::new(0),
            unsubscribe_count: Arc::new(AtomicUsize::new(0)),
            fail_fetch_machine: AtomicUsize::new(0),
            fail_update_machine: AtomicUsize::new(0),
            fail_update_execution: AtomicUsize::new(0),
            fail_subscribe: AtomicUsize::new(0),
            fail_unsubscribe: Arc::new(AtomicBool::new(false)),
        }
    }

    // --- State inspection ---

    pub fn machine(&self) -> Machine {
        self.machine.lock().unwrap().clone()
    }

    pub fn execution(&self, id: &str) -> Option<ExecutionRecord> {
        self.executions.lock().unwrap().get(id).cloned()
    }

    /// Patches applied to one execution, in order.
    pub fn updates_for(&self, id: &str) -> Vec<ExecutionPatch> {
        self.execution_updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(record_id, _)| record_id == id)
            .map(|(_, patch)| patch.clone())
            .collect()
    }

    /// Every machine status value written, in order.
    pub fn status_history(&self) -> Vec<MachineStatus> {
        self.status_history.lock().unwrap().clone()
    }

    // --- State manipulation ---

    pub fn set_machine_status(&self, status: MachineStatus) {
        self.machine.lock().unwrap().status = status;
    }

    pub fn set_machine_data(&self, data: serde_json::Value) {
        self.machine.lock().unwrap().data = Some(data);
    }

    /// Deliver an event to the most recent live subscription.
    pub fn push_event(&self, event: RecordEvent) {
        if let Some(tx) = self.event_senders.lock().unwrap().last() {
            let _ = tx.try_send(event);
        }
    }

    // --- Failure injection ---

    pub fn fail_fetch_machine(&self, count: usize) {
        self.fail_fetch_machine.store(count, Ordering::SeqCst);
    }

    pub fn fail_update_machine(&self, count: usize) {
        self.fail_update_machine.store(count, Ordering::SeqCst);
    }

    pub fn fail_update_execution(&self, count: usize) {
        self.fail_update_execution.store(count, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, count: usize) {
        self.fail_subscribe.store(count, Ordering::SeqCst);
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }
}

/// Consume one scripted failure, if any remain.
fn take_failure(counter: &AtomicUsize) -> bool {
    let mut current = counter.load(Ordering::SeqCst);
    while current > 0 {
        if current == usize::MAX {
            return true;
        }
        match counter.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
    false
}

fn refused(what: &str) -> GatewayError {
    GatewayError::Connect {
        reason: format!("{what} refused by mock"),
    }
}

fn apply_machine_patch(machine: &mut Machine, patch: &MachinePatch) {
    if let Some(ip) = &patch.ip {
        machine.ip = ip.clone();
    }
    if let Some(mac) = &patch.mac {
        machine.mac = mac.clone();
    }
    if let Some(status) = patch.status {
        machine.status = status;
    }
    if let Some(data) = &patch.data {
        machine.data = Some(data.clone());
    }
}

fn apply_execution_patch(record: &mut ExecutionRecord, patch: &ExecutionPatch) {
    if let Some(logs) = &patch.logs {
        record.logs = logs.clone();
    }
    if let Some(status) = patch.status {
        record.status = status;
    }
    if let Some(completed) = patch.completed {
        record.completed = completed;
    }
    if let Some(duration) = patch.duration {
        record.duration = duration;
    }
}

#[async_trait::async_trait]
impl Coordinator for MockCoordinator {
    async fn fetch_machine(&self) -> Result<Machine, GatewayError> {
        if take_failure(&self.fail_fetch_machine) {
            return Err(refused("fetch_machine"));
        }
        Ok(self.machine())
    }

    async fn update_machine(&self, id: &str, patch: MachinePatch) -> Result<Machine, GatewayError> {
        if take_failure(&self.fail_update_machine) {
            return Err(refused("update_machine"));
        }
        let mut machine = self.machine.lock().unwrap();
        if machine.id != id {
            return Err(GatewayError::NotFound {
                what: format!("machine {id}"),
            });
        }
        apply_machine_patch(&mut machine, &patch);
        if let Some(status) = patch.status {
            self.status_history.lock().unwrap().push(status);
        }
        Ok(machine.clone())
    }

    async fn create_execution(
        &self,
        fields: NewExecution,
    ) -> Result<ExecutionRecord, GatewayError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let record = ExecutionRecord {
            id: format!("created-{n}-{}", uuid::Uuid::new_v4().simple()),
            machine: fields.machine,
            invisible: fields.invisible,
            completed: fields.completed,
            executable: fields.executable,
            logs: fields.logs,
            status: fields.status,
            duration: 0.0,
        };
        self.executions
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_execution(
        &self,
        id: &str,
        patch: ExecutionPatch,
    ) -> Result<ExecutionRecord, GatewayError> {
        if take_failure(&self.fail_update_execution) {
            return Err(refused("update_execution"));
        }
        let mut executions = self.executions.lock().unwrap();
        // Records routed from realtime events may not have been created
        // through this mock; materialize them on first write.
        let record = executions
            .entry(id.to_string())
            .or_insert_with(|| ExecutionRecord {
                id: id.to_string(),
                machine: self.machine.lock().unwrap().id.clone(),
                invisible: false,
                completed: false,
                executable: String::new(),
                logs: String::new(),
                status: Default::default(),
                duration: 0.0,
            });
        apply_execution_patch(record, &patch);
        self.execution_updates
            .lock()
            .unwrap()
            .push((id.to_string(), patch));
        Ok(record.clone())
    }

    async fn fetch_execution(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Option<ExecutionRecord>, GatewayError> {
        let executions = self.executions.lock().unwrap();
        Ok(executions
            .values()
            .find(|record| {
                filter
                    .machine
                    .as_ref()
                    .is_none_or(|machine| &record.machine == machine)
                    && filter
                        .invisible
                        .is_none_or(|invisible| record.invisible == invisible)
            })
            .cloned())
    }

    async fn subscribe(&self, _machine_id: &str) -> Result<Subscription, GatewayError> {
        if take_failure(&self.fail_subscribe) {
            return Err(refused("subscribe"));
        }
        let (tx, rx) = mpsc::channel(32);
        self.event_senders.lock().unwrap().push(tx);
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);

        let unsubscribes = Arc::clone(&self.unsubscribe_count);
        let fail_flag = Arc::clone(&self.fail_unsubscribe);
        let unsubscribe = Box::new(move || -> UnsubscribeFuture {
            Box::pin(async move {
                unsubscribes.fetch_add(1, Ordering::SeqCst);
                // Read at teardown time so tests can arm the failure after
                // the subscription was opened.
                if fail_flag.load(Ordering::SeqCst) {
                    Err(GatewayError::Connect {
                        reason: "unsubscribe refused by mock".to_string(),
                    })
                } else {
                    Ok(())
                }
            })
        });

        Ok(Subscription::new(
            Box::pin(ReceiverStream::new(rx)),
            unsubscribe,
        ))
    }
}

/// Poll a predicate until it holds or the timeout elapses.
pub async fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}
