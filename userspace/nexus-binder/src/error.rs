// Copyright 2025 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error kinds surfaced by the dispatcher.
//!
//! Only failures that abort a whole write or read batch are reported through
//! [`DispatchError`]. Per-command protocol failures (unknown target, empty
//! reply stack, dead peer) are recorded as `BR_*` codes in the worker's
//! `last_error` and delivered on its next read instead.

use thiserror::Error;

/// Result type returned by dispatcher operations.
pub type Result<T> = core::result::Result<T, DispatchError>;

/// Errors produced by the dispatcher control surface and batch processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A command record ran past the end of the caller's buffer.
    #[error("truncated command stream")]
    Fault,
    /// Malformed opcode or a size field violating the protocol limits.
    #[error("malformed command or size")]
    InvalidArgument,
    /// Message allocation failed.
    #[error("out of memory")]
    NoMemory,
    /// The peer's queue is closed and no progress was made.
    #[error("target queue unreachable")]
    DeadReply,
    /// The caller violated the command protocol.
    #[error("protocol violation")]
    FailedReply,
    /// The read buffer cannot hold the next message. Retryable.
    #[error("read buffer too small")]
    NoSpace,
    /// The context manager is already bound.
    #[error("context manager already bound")]
    Busy,
    /// The context manager was bound under a different euid.
    #[error("context manager owned by another euid")]
    PermissionDenied,
}
