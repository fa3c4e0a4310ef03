/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use jinx_ptrace::Pid;
use jinx_ptrace::Regs;
use jinx_ptrace::Stopped;
use rand::Rng;
use syscalls::Sysno;

use crate::error::Error;
use crate::fdtable::FdTable;
use crate::options::Options;
use crate::strategy;
use crate::strategy::Strategy;

/// Which side of a system call the next syscall-stop belongs to. The kernel
/// guarantees strict alternation per thread, so a single toggle suffices.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    /// The next syscall-stop is a syscall-enter.
    Enter,
    /// The next syscall-stop is a syscall-exit.
    Exit,
}

/// The exit half of an interception, captured at syscall-enter and run at the
/// matching syscall-exit.
#[derive(Debug)]
pub(crate) enum PendingExit {
    /// Record the returned fd under `path` if the open succeeded.
    RecordFd { path: String },

    /// Restore the saved registers and rewind the instruction pointer past
    /// the syscall instruction so the original call is replayed.
    RestoreAndRewind { regs: Regs },

    /// Overwrite the return value register.
    ForceReturn { value: u64 },
}

/// Files under these prefixes are never perturbed, whatever the draw says;
/// corrupting the dynamic loader's reads takes the target down before it can
/// fail interestingly.
fn is_protected(path: &str) -> bool {
    path.starts_with("/lib") || path.starts_with("/usr/lib")
}

/// Per-thread tracing state: the enter/exit phase, the stack of pending exit
/// handlers, and the fd bookkeeping used to spare the dynamic loader.
#[derive(Debug)]
pub struct Tracee {
    pid: Pid,
    phase: Phase,
    exited: bool,
    pending: Vec<PendingExit>,
    fds: FdTable,
    options: Arc<Options>,
}

impl Tracee {
    pub(crate) fn new(pid: Pid, options: Arc<Options>) -> Self {
        Tracee {
            pid,
            phase: Phase::Enter,
            exited: false,
            pending: Vec::new(),
            fds: FdTable::new(),
            options,
        }
    }

    /// The thread id this state belongs to.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// True once the kernel reported this thread gone.
    pub fn exited(&self) -> bool {
        self.exited
    }

    pub(crate) fn mark_exited(&mut self) {
        self.exited = true;
    }

    /// Advances the state machine for one syscall-stop.
    pub(crate) fn on_syscall_stop<R: Rng>(
        &mut self,
        task: &mut Stopped,
        rng: &mut R,
    ) -> Result<(), Error> {
        // Flip the phase before handling the stop so that an interception
        // error cannot desynchronize the alternation.
        match self.phase {
            Phase::Enter => {
                self.phase = Phase::Exit;
                if let Some(pending) = self.on_syscall_enter(task, rng)? {
                    self.pending.push(pending);
                }
            }
            Phase::Exit => {
                self.phase = Phase::Enter;
                if let Some(pending) = self.pending.pop() {
                    self.on_syscall_exit(task, pending)?;
                }
            }
        }
        Ok(())
    }

    /// Dispatches on the syscall number at an enter stop. Returns the exit
    /// handler to queue, if the chosen intervention needs one.
    fn on_syscall_enter<R: Rng>(
        &mut self,
        task: &mut Stopped,
        rng: &mut R,
    ) -> Result<Option<PendingExit>, Error> {
        let regs = task.getregs().map_err(Error::RegisterAccessFailed)?;
        let sysno = Sysno::new(regs.orig_rax as usize);

        // fd bookkeeping runs unconditionally; it is what keeps the loader
        // protection accurate.
        match sysno {
            Some(sysno @ (Sysno::open | Sysno::openat)) => {
                let addr = if sysno == Sysno::open {
                    regs.rdi
                } else {
                    regs.rsi
                };
                let path = task
                    .read_cstring(addr)
                    .map_err(|source| Error::MemoryReadFailed { addr, source })?;
                return Ok(Some(PendingExit::RecordFd { path }));
            }
            Some(Sysno::close) => {
                self.fds.record_close(regs.rdi as i32);
                return Ok(None);
            }
            _ => {}
        }

        if !rng.gen_bool(self.options.unpredictability) {
            return Ok(None);
        }

        match sysno {
            Some(sysno @ (Sysno::read | Sysno::write)) => {
                let path = self.fds.path_of(regs.rdi as i32);
                if is_protected(path) {
                    return Ok(None);
                }

                let strategy = self.options.strategies[rng.gen_range(0..self.options.strategies.len())];
                tracing::info!(
                    "[{}] {} {}({}, {:#x}, {})",
                    self.pid,
                    strategy,
                    sysno.name(),
                    regs.rdi,
                    regs.rsi,
                    regs.rdx
                );
                tracing::info!("[{}] reading/writing: {}", self.pid, path);

                match strategy {
                    Strategy::Silence => strategy::silence(task, &regs).map(Some),
                    Strategy::RandomBuffer => {
                        strategy::random_buffer(task, regs.rsi, regs.rdx, &self.options.rand_buf, rng)
                            .map(|()| None)
                    }
                    Strategy::RandomOffset => {
                        strategy::random_offset(task, &regs, &self.options.rand_fp, rng).map(Some)
                    }
                }
            }
            Some(sysno @ (Sysno::sendto | Sysno::recvfrom)) => {
                let path = self.fds.path_of(regs.rdi as i32);
                tracing::info!(
                    "[{}] {} {}({}, {:#x}, {})",
                    self.pid,
                    Strategy::RandomBuffer,
                    sysno.name(),
                    regs.rdi,
                    regs.rsi,
                    regs.rdx
                );
                tracing::info!("[{}] reading/writing: {}", self.pid, path);
                strategy::random_buffer(task, regs.rsi, regs.rdx, &self.options.rand_buf, rng)
                    .map(|()| None)
            }
            // Recognized but not yet perturbed.
            Some(Sysno::sendmsg | Sysno::recvmsg) => Ok(None),
            Some(Sysno::nanosleep) => {
                let micros = self.options.wait.sample(rng).max(0) as u64;
                tracing::info!("[{}] sleeping an additional {}us", self.pid, micros);
                thread::sleep(Duration::from_micros(micros));
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Runs the exit half of an interception at an exit stop.
    fn on_syscall_exit(&mut self, task: &mut Stopped, pending: PendingExit) -> Result<(), Error> {
        match pending {
            PendingExit::RecordFd { path } => {
                let regs = task.getregs().map_err(Error::RegisterAccessFailed)?;
                let fd = regs.rax as i64;
                if fd >= 0 {
                    self.fds.record_open(fd as i32, path);
                }
            }
            PendingExit::RestoreAndRewind { mut regs } => {
                // The syscall instruction is 2 bytes wide; backing rip up by
                // that much re-executes the call we hijacked.
                regs.rip -= 2;
                regs.rax = regs.orig_rax;
                task.setregs(&regs).map_err(Error::RegisterAccessFailed)?;
            }
            PendingExit::ForceReturn { value } => {
                let mut regs = task.getregs().map_err(Error::RegisterAccessFailed)?;
                regs.rax = value;
                task.setregs(&regs).map_err(Error::RegisterAccessFailed)?;
            }
        }
        Ok(())
    }
}
