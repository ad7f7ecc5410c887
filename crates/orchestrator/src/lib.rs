//! Caseflow Execution Orchestrator
//!
//! Drives test-plan execution sessions: a fixed ordered set of target
//! cases executed sequentially but freely navigable, with results
//! persisted to a backend execution record after every mutation.
//!
//! This crate provides:
//! - Session lifecycle control: create, submit, skip, cancel, teardown
//! - An in-memory case-result store with loss-free revisit restoration
//! - Snapshot and counter aggregation over the fixed target order
//! - Cursor navigation with cached case-detail lookups
//! - Completion watching for automated cases: push fast path with an
//!   authoritative reconciliation poll behind it
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`client`]: Collaborator traits and the HTTP backend client
//! - [`controller`]: The session controller tying everything together
//! - [`push`]: Push channel abstraction (in-memory and NATS)
//! - [`watcher`]: Watch handles over push subscriptions and poll timers

pub mod aggregator;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod navigator;
pub mod push;
pub mod store;
pub mod watcher;

pub use client::{CaseDetailService, CaseStatusSink, HttpBackendClient, PlanExecutionStore};
pub use config::OrchestratorConfig;
pub use controller::{Collaborators, ExecutionSessionController, CASE_EXECUTION_SCOPE};
pub use error::{OrchestratorError, OrchestratorResult};
pub use model::{
    CaseVerdict, ExecutionKind, ExecutionSession, SessionStatus, SubmittedResult, TargetCase,
};
pub use push::{MemoryPushChannel, NatsPushChannel, PushChannel, PushMessage};
pub use store::{CaseResultStore, RestoredCase, ScreenshotArtifact};
pub use watcher::{CompletionSource, CompletionWatcher, WatchEvent, WatchHandle};
