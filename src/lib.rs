//! taskpool - task lifecycle and client consistency engine
//!
//! Templates describe reusable tasks; assignments are their instances for a
//! single dependent. Every assignment moves through a guarded lifecycle, and
//! verification pays its reward exactly once.
//!
//! # Core Concepts
//!
//! - **Lifecycle**: the status machine, role checks and expected-status guard
//! - **Store**: scoped read cache with request coalescing, optimistic patches
//!   and rollback
//! - **Bus**: in-process pool events that tell views what to refetch
//! - **Sync**: views, focus switching with prefetch, and the mutation dispatcher
//! - **Settlement**: reward resolution and balance crediting
//!
//! # Module Organization
//!
//! - `bus`: Pool event bus and JSONL event sink
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.taskpool.toml`
//! - `display`: Status badges and category styles
//! - `error`: Error types and result aliases
//! - `lifecycle`: Status machine and transition guards
//! - `lock`: File locking and atomic writes
//! - `model`: Templates, assignments, scopes and filters
//! - `output`: Shared human/JSON output for CLI commands
//! - `service`: Record service trait with in-memory and file-backed backends
//! - `settlement`: Payouts and balances
//! - `storage`: Pool directory layout and JSON persistence
//! - `store`: Client-side cache of scoped assignment lists
//! - `sync`: Views, sessions and the dispatcher

pub mod bus;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod model;
pub mod output;
pub mod service;
pub mod settlement;
pub mod storage;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
