/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;

use jinx_ptrace::Pid;
use thiserror::Error;

/// Everything that can go wrong while injecting faults.
#[derive(Error, Debug)]
pub enum Error {
    /// A range flag didn't parse to a valid `low < high` pair.
    #[error("malformed range {0:?}")]
    MalformedRange(String),

    /// A strategy name in `--iostrats` wasn't recognized.
    #[error("unknown strategy {0:?}")]
    UnknownStrategy(String),

    /// The target program could not be spawned.
    #[error("failed to spawn target")]
    SpawnFailed(#[source] io::Error),

    /// Reattaching to the freshly spawned target failed.
    #[error("failed to attach to pid {pid}")]
    AttachFailed {
        /// The pid of the spawned target.
        pid: Pid,
        #[source]
        source: jinx_ptrace::Error,
    },

    /// The first stop after launch was not the synthetic attach trap.
    #[error("unexpected initial stop: {0}")]
    UnexpectedInitialStop(String),

    /// Reading tracee memory failed.
    #[error("failed to read tracee memory at {addr:#x}")]
    MemoryReadFailed {
        /// The remote address of the failed read.
        addr: u64,
        #[source]
        source: jinx_ptrace::Error,
    },

    /// Writing tracee memory failed.
    #[error("failed to write tracee memory at {addr:#x}")]
    MemoryWriteFailed {
        /// The remote address of the failed write.
        addr: u64,
        #[source]
        source: jinx_ptrace::Error,
    },

    /// The tracee returned fewer bytes than its syscall arguments promised.
    #[error("short read from tracee: wanted {wanted} bytes, got {got}")]
    ShortRead {
        /// Bytes the syscall arguments described.
        wanted: usize,
        /// Bytes actually readable.
        got: usize,
    },

    /// Getting or setting tracee registers failed.
    #[error("failed to access registers")]
    RegisterAccessFailed(#[source] jinx_ptrace::Error),

    /// Any other tracing failure.
    #[error(transparent)]
    Trace(#[from] jinx_ptrace::Error),

    /// Not a failure: the last tracee is gone and the trace is complete.
    #[error("tracing finished")]
    FinishedTrace,
}
