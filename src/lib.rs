//! Outpost: a persistent remote-execution agent.
//!
//! The agent runs on an endpoint machine, receives code-execution requests
//! pushed by a remote coordinator over a realtime event stream, executes each
//! request in an isolated subprocess, and reports results back.
//!
//! Core pieces:
//! - [`identity`]: host identity probing (outbound IP, hardware MAC)
//! - [`sandbox`]: per-execution scratch directory + interpreter subprocess
//! - [`tracker`]: dedup and active-set bookkeeping for dispatched work
//! - [`coordinator`]: typed records and the gateway contract to the backend
//! - [`agent`]: event dispatch, liveness loop, and the reconnecting supervisor

pub mod agent;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod logging;
pub mod sandbox;
pub mod tracker;
