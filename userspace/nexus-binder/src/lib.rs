// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Binder-style IPC dispatcher (transaction router and object graph)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module; scenarios in tests/binder_e2e
//!
//! PUBLIC API:
//!   - Device: control surface (open/release/write_read/set_max_threads/
//!     set_context_manager/thread_exit/version)
//!   - Process, Credentials, BinderWriteRead: per-call state and identity
//!   - defs: wire opcodes, framing, and limits
//!   - DispatchError: batch-fatal error kinds
//!
//! DEPENDENCIES:
//!   - parking_lot: queue and registry locks
//!   - thiserror: error derive
//!   - log: lifecycle and protocol-violation tracing
//!
//! Independent processes exchange synchronous transactions and one-way
//! messages through opaque object handles. Each process owns a work queue
//! and an object registry; each worker thread owns a private queue for
//! replies. Writes parse a packed command batch and route messages onto
//! target queues; reads drain the worker's sources, translating embedded
//! object descriptors as they cross the process boundary. Death of an
//! exporting process fans a notification out to every observer and
//! redirects stranded callers.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
// Messages are heap-allocated routing units that move between queues and
// per-worker stacks without being copied.
#![allow(clippy::vec_box)]

pub mod defs;
mod device;
mod error;
mod message;
mod object;
mod process;
mod queue;
mod router;
mod thread;
mod translate;

pub use device::{BinderWriteRead, Credentials, Device};
pub use error::{DispatchError, Result};
pub use process::Process;
