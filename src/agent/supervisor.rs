//! Top-level agent state machine.
//!
//! ```text
//! Disconnected ──▶ Initializing ──▶ Subscribed (liveness loop running)
//!      ▲                │                  │
//!      │   connect error│                  │ gateway error
//!      └────────────────┴───── backoff ◀───┘
//!
//! any state ── shutdown ──▶ Terminated (mark offline, unsubscribe)
//! ```
//!
//! The agent is a long-running service: transient errors back off and retry
//! forever, and the only way out is the shutdown future resolving.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinSet;

use crate::agent::dispatcher::Dispatcher;
use crate::agent::liveness::LivenessLoop;
use crate::coordinator::{
    Coordinator, ExecutionFilter, Machine, MachinePatch, MachineStatus, NewExecution, Subscription,
};
use crate::error::GatewayError;
use crate::identity::HostIdentity;
use crate::sandbox::SandboxRunner;
use crate::tracker::ExecutionTracker;

/// Supervisor states, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Disconnected,
    Initializing,
    Subscribed,
    Terminated,
}

/// Tunables for the supervisor loop.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Interval between liveness ticks.
    pub heartbeat_interval: Duration,
    /// Fixed delay before re-initializing after a failed cycle.
    pub reconnect_backoff: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(120),
            reconnect_backoff: Duration::from_secs(10),
        }
    }
}

/// Everything belonging to one successfully-initialized connection cycle.
struct Session {
    machine_id: String,
    machine: Arc<RwLock<Machine>>,
    heartbeat_id: String,
    subscription: Subscription,
}

enum ServeEnd {
    Shutdown,
    Failed(GatewayError),
}

/// The reconnecting agent supervisor.
pub struct Supervisor {
    gateway: Arc<dyn Coordinator>,
    dispatcher: Dispatcher,
    identity: HostIdentity,
    options: SupervisorOptions,
    tracker: Arc<ExecutionTracker>,
    tasks: JoinSet<()>,
    state: AgentState,
    last_machine_id: Option<String>,
}

impl Supervisor {
    pub fn new(
        gateway: Arc<dyn Coordinator>,
        tracker: Arc<ExecutionTracker>,
        runner: Arc<SandboxRunner>,
        options: SupervisorOptions,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&gateway), Arc::clone(&tracker), runner);
        Self {
            gateway,
            dispatcher,
            identity: HostIdentity::probe(),
            options,
            tracker,
            tasks: JoinSet::new(),
            state: AgentState::Disconnected,
            last_machine_id: None,
        }
    }

    /// Run until the shutdown future resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()> + Send + 'static) {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });

        loop {
            self.set_state(AgentState::Initializing);
            let session = tokio::select! {
                session = self.connect() => session,
                _ = stop_rx.changed() => {
                    self.terminate(None).await;
                    return;
                }
            };

            match session {
                Ok(mut session) => {
                    self.last_machine_id = Some(session.machine_id.clone());
                    self.set_state(AgentState::Subscribed);
                    match self.serve(&mut session, &mut stop_rx).await {
                        ServeEnd::Shutdown => {
                            self.terminate(Some(session)).await;
                            return;
                        }
                        ServeEnd::Failed(e) => {
                            self.log_disconnect(&e);
                            if let Err(e) = session.subscription.unsubscribe().await {
                                tracing::warn!(error = %e, "failed to tear down stale subscription");
                            }
                        }
                    }
                }
                Err(e) => self.log_disconnect(&e),
            }

            self.set_state(AgentState::Disconnected);
            tokio::select! {
                _ = tokio::time::sleep(self.options.reconnect_backoff) => {}
                _ = stop_rx.changed() => {
                    self.terminate(None).await;
                    return;
                }
            }
        }
    }

    /// Initializing: fetch the machine record, push refreshed identity and
    /// Idle status, fetch-or-create the heartbeat record, subscribe.
    async fn connect(&self) -> Result<Session, GatewayError> {
        let machine = self.gateway.fetch_machine().await?;
        let patch = MachinePatch {
            ip: self.identity.ip.clone(),
            mac: self.identity.mac.clone(),
            status: Some(MachineStatus::Idle),
            data: None,
        };
        let machine = self.gateway.update_machine(&machine.id, patch).await?;
        tracing::info!(name = %machine.name, ip = %machine.ip, "agent initialized");

        let heartbeat = match self
            .gateway
            .fetch_execution(&ExecutionFilter::heartbeat(&machine.id))
            .await?
        {
            Some(record) => record,
            None => {
                self.gateway
                    .create_execution(NewExecution::heartbeat(&machine.id))
                    .await?
            }
        };

        let subscription = self.gateway.subscribe(&machine.id).await?;
        tracing::info!("subscription active, waiting for executions");

        Ok(Session {
            machine_id: machine.id.clone(),
            machine: Arc::new(RwLock::new(machine)),
            heartbeat_id: heartbeat.id,
            subscription,
        })
    }

    /// Subscribed: interleave realtime events, the liveness loop, and
    /// completed execution tasks until something fails or shutdown fires.
    async fn serve(
        &mut self,
        session: &mut Session,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> ServeEnd {
        let liveness = LivenessLoop::new(
            Arc::clone(&self.gateway),
            Arc::clone(&self.tracker),
            Arc::clone(&session.machine),
            session.heartbeat_id.clone(),
            self.options.heartbeat_interval,
        );
        let liveness_run = liveness.run();
        tokio::pin!(liveness_run);

        loop {
            tokio::select! {
                maybe_event = session.subscription.events_mut().next() => match maybe_event {
                    Some(event) => self.dispatcher.route(
                        event,
                        &session.machine_id,
                        &session.machine,
                        &mut self.tasks,
                    ),
                    None => {
                        return ServeEnd::Failed(GatewayError::Connect {
                            reason: "realtime stream ended".to_string(),
                        });
                    }
                },
                err = &mut liveness_run => return ServeEnd::Failed(err),
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = result
                        && e.is_panic()
                    {
                        tracing::error!("execution task panicked");
                    }
                }
                _ = stop_rx.changed() => return ServeEnd::Shutdown,
            }
        }
    }

    /// Terminated: abandon in-flight work, mark the machine offline, tear
    /// down the subscription. Everything is best-effort.
    async fn terminate(&mut self, session: Option<Session>) {
        self.set_state(AgentState::Terminated);

        if !self.tasks.is_empty() {
            tracing::info!(count = self.tasks.len(), "abandoning in-flight executions");
        }
        self.tasks.shutdown().await;

        let machine_id = session
            .as_ref()
            .map(|s| s.machine_id.clone())
            .or_else(|| self.last_machine_id.clone());
        if let Some(id) = machine_id {
            if let Err(e) = self
                .gateway
                .update_machine(&id, MachinePatch::status(MachineStatus::Offline))
                .await
            {
                tracing::warn!(error = %e, "failed to mark machine offline");
            }
        }

        if let Some(session) = session {
            match session.subscription.unsubscribe().await {
                Ok(()) => tracing::info!("unsubscribed from executions"),
                Err(e) => tracing::warn!(error = %e, "failed to unsubscribe"),
            }
        }
    }

    fn log_disconnect(&self, error: &GatewayError) {
        if error.is_connectivity() {
            tracing::warn!(
                error = %error,
                backoff = ?self.options.reconnect_backoff,
                "connection to coordinator lost; retrying"
            );
        } else {
            tracing::error!(
                error = %error,
                backoff = ?self.options.reconnect_backoff,
                "agent cycle failed; retrying"
            );
        }
    }

    fn set_state(&mut self, state: AgentState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "state transition");
            self.state = state;
        }
    }
}
