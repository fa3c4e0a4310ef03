/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Probabilistic syscall fault injection for Linux processes.
//!
//! jinx launches a target under ptrace and, with configurable probability,
//! perturbs a curated set of its system calls: suppressing them while faking
//! success, scribbling over I/O buffers, injecting file-offset seeks, and
//! stretching sleeps. The point is to exercise a program's resilience to
//! partial-failure conditions without changing the program.
//!
//! The [`Supervisor`] owns every traced thread and runs a single-threaded
//! wait/dispatch loop; see its docs for the launch/step/resume protocol.
//! x86-64 only.

mod error;
mod fdtable;
mod options;
mod range;
mod strategy;
mod supervisor;
mod tracee;

pub use error::Error;
pub use fdtable::FdTable;
pub use jinx_ptrace::Pid;
pub use options::Options;
pub use range::Range;
pub use strategy::Strategy;
pub use supervisor::Status;
pub use supervisor::Step;
pub use supervisor::Supervisor;
pub use tracee::Phase;
pub use tracee::Tracee;
