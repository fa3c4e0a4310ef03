/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg(target_os = "linux")]

//! A safe, synchronous ptrace API. Ptrace operations only exist on the
//! [`Stopped`] handle, so it is not possible to poke at a tracee that is not
//! in a ptrace-stop. Resuming consumes the handle and yields a [`Running`]
//! tracee, which can only be waited on.
//!
//! Every operation must be issued from the OS thread that attached to the
//! tracee. The kernel enforces this contract; violating it shows up as
//! `ESRCH`.

mod memory;
mod regs;

use std::fmt;

use nix::sys::ptrace;
// Re-exports so that callers don't need to depend on `nix` directly.
pub use nix::sys::ptrace::Options;
pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;
use nix::sys::wait::waitpid;
use nix::sys::wait::WaitPidFlag;
use nix::sys::wait::WaitStatus;
pub use syscalls::Errno;
use thiserror::Error;

pub use crate::regs::Regs;

/// An error that occurred during tracing.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    /// A low-level errno.
    #[error(transparent)]
    Errno(#[from] Errno),

    /// The tracee died unexpectedly while we believed it to be stopped. This
    /// should be handled gracefully by reaping the zombie.
    #[error("tracee {0} is a zombie")]
    Died(Pid),
}

impl From<nix::errno::Errno> for Error {
    fn from(err: nix::errno::Errno) -> Self {
        Self::Errno(Errno::new(err as i32))
    }
}

/// Indicates how a child was created (i.e., via `fork`, `vfork`, or `clone`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChildOp {
    /// Stop before return from `fork(2)`.
    Fork,

    /// Stop before return from `vfork(2)` or `clone(2)` with `CLONE_VFORK`.
    Vfork,

    /// Stop before return from `clone(2)`.
    Clone,
}

impl fmt::Display for ChildOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Fork => write!(f, "fork"),
            Self::Vfork => write!(f, "vfork"),
            Self::Clone => write!(f, "clone"),
        }
    }
}

/// How a tracee fully exited.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExitStatus {
    /// Exited normally with the given code.
    Exited(i32),

    /// Killed by the given signal.
    Signaled(Signal),
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with {}", code),
            Self::Signaled(sig) => write!(f, "killed by {}", sig),
        }
    }
}

/// A stop event. Documentation is from `ptrace(2)`.
#[derive(Debug, Eq, PartialEq)]
pub enum Event {
    /// Stop event after a new child has been created (i.e., via `fork`,
    /// `vfork`, or `clone`). Carries the pid of the new child.
    NewChild(ChildOp, Pid),

    /// Stop before return from `execve(2)`. Carries the former thread ID.
    Exec(Pid),

    /// Stop before exit (including death from `exit_group(2)` or signal
    /// death). The tracee is still alive and needs to be resumed to finish
    /// exiting.
    Exit,

    /// Group-stop, or the initial stop of a child attached via
    /// `PTRACE_SEIZE`. Requires [`Stopped::listen`] to resume without ending
    /// the job-control stop.
    Stop,

    /// The tracee was stopped by execution of a system call
    /// (`SIGTRAP | 0x80` with `PTRACE_O_TRACESYSGOOD`).
    Syscall,

    /// The tracee was stopped by delivery of a signal.
    Signal(Signal),
}

impl Event {
    /// Converts a raw i32 to a ptrace event and gets any associated data.
    ///
    /// There is no danger in calling ptrace here because the tracee is
    /// guaranteed to be in a ptrace-stop when this is called.
    fn from_ptrace_event(task: &Stopped, event: i32) -> Result<Self, Error> {
        match event {
            libc::PTRACE_EVENT_FORK => {
                let child = Pid::from_raw(task.getevent()? as i32);
                Ok(Self::NewChild(ChildOp::Fork, child))
            }
            libc::PTRACE_EVENT_VFORK => {
                let child = Pid::from_raw(task.getevent()? as i32);
                Ok(Self::NewChild(ChildOp::Vfork, child))
            }
            libc::PTRACE_EVENT_CLONE => {
                let child = Pid::from_raw(task.getevent()? as i32);
                Ok(Self::NewChild(ChildOp::Clone, child))
            }
            libc::PTRACE_EVENT_EXEC => {
                // The thread group leader this exec is replacing. Not
                // necessarily equal to the stopped pid when a non-main thread
                // called exec.
                let former = Pid::from_raw(task.getevent()? as i32);
                Ok(Self::Exec(former))
            }
            libc::PTRACE_EVENT_EXIT => Ok(Self::Exit),
            libc::PTRACE_EVENT_STOP => Ok(Self::Stop),
            _ => unreachable!("unknown ptrace event {:#x}", event),
        }
    }
}

/// The result of a blocking wait. A tracee in this state is guaranteed to not
/// be running.
///
/// `Clone` and `Copy` are intentionally not implemented so that a stopped
/// handle cannot outlive the resume that consumes it.
#[derive(Debug, Eq, PartialEq)]
pub enum Wait {
    /// The tracee is in a ptrace-stop and ptrace operations are allowed.
    Stopped(Stopped, Event),

    /// The tracee has fully exited.
    Exited(Pid, ExitStatus),
}

impl Wait {
    /// Returns the PID for this state.
    pub fn pid(&self) -> Pid {
        match self {
            Self::Stopped(Stopped(pid), _) => *pid,
            Self::Exited(pid, _) => *pid,
        }
    }
}

impl TryFrom<WaitStatus> for Wait {
    type Error = Error;

    /// Converts a `WaitStatus` to this type.
    ///
    /// Preconditions: the status must not be `StillAlive`.
    fn try_from(status: WaitStatus) -> Result<Self, Error> {
        Ok(match status {
            WaitStatus::Exited(pid, code) => Self::Exited(pid, ExitStatus::Exited(code)),
            WaitStatus::Signaled(pid, sig, _coredump) => {
                Self::Exited(pid, ExitStatus::Signaled(sig))
            }
            WaitStatus::Stopped(pid, sig) => Self::Stopped(Stopped(pid), Event::Signal(sig)),
            WaitStatus::PtraceSyscall(pid) => Self::Stopped(Stopped(pid), Event::Syscall),
            WaitStatus::PtraceEvent(pid, _sig, event) => {
                let task = Stopped(pid);
                let event = Event::from_ptrace_event(&task, event)?;
                Self::Stopped(task, event)
            }
            WaitStatus::Continued(_) => {
                // Not possible because we never wait with WCONTINUED.
                unreachable!("unexpected WaitStatus::Continued")
            }
            WaitStatus::StillAlive => {
                unreachable!("precondition violated with WaitStatus::StillAlive")
            }
        })
    }
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Stopped(stopped, event) => {
                write!(f, "pid {} stopped ({:?})", stopped.pid(), event)
            }
            Self::Exited(pid, exit_status) => write!(f, "pid {} {}", pid, exit_status),
        }
    }
}

/// Waits for any tracee to change state, blocking until the next event. This
/// is equivalent to `waitpid(-1)` with `__WALL`, so clone children are
/// reported too.
///
/// Returns `None` when there are no children left to wait for, which makes it
/// easy to write a loop that terminates when the last tracee is gone.
pub fn wait_all() -> Result<Option<Wait>, Error> {
    loop {
        return match waitpid(None, Some(WaitPidFlag::__WALL)) {
            Ok(status) => Wait::try_from(status).map(Some),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => Ok(None),
            Err(err) => Err(err.into()),
        };
    }
}

/// A tracee that is in a ptrace-stop and allows ptrace operations to be
/// performed.
#[derive(Debug, Hash, Eq, PartialEq)]
pub struct Stopped(Pid);

impl Stopped {
    /// Helper for converting from the Errno type.
    ///
    /// According to ptrace(2), any ptrace operation may return ESRCH either
    /// because the tracee died while stopped, because the caller is not the
    /// tracer, or because the tracee is not stopped. The latter two only
    /// happen through programmer errors this API is designed to prevent, so
    /// ESRCH here means the tracee died unexpectedly.
    pub(crate) fn map_err(&self, err: Errno) -> Error {
        if err == Errno::ESRCH {
            Error::Died(self.0)
        } else {
            Error::Errno(err)
        }
    }

    // Helper for converting from the nix error type.
    pub(crate) fn map_nix_err(&self, err: nix::errno::Errno) -> Error {
        self.map_err(Errno::new(err as i32))
    }

    /// Creates a new stopped handle. This is useful when we know the tracee
    /// is already in a ptrace-stop by other means.
    ///
    /// There is no check that the pid really is stopped; it is better to
    /// arrive at a stopped state via [`Running::wait`].
    pub fn new_unchecked(pid: Pid) -> Self {
        Stopped(pid)
    }

    /// Returns the process ID of the tracee.
    pub fn pid(&self) -> Pid {
        self.0
    }

    /// Sets the ptracer options.
    pub fn setoptions(&self, options: Options) -> Result<(), Error> {
        ptrace::setoptions(self.0, options).map_err(|err| self.map_nix_err(err))
    }

    /// Gets the current state of the general purpose registers.
    pub fn getregs(&self) -> Result<Regs, Error> {
        ptrace::getregs(self.0).map_err(|err| self.map_nix_err(err))
    }

    /// Sets the general purpose registers.
    pub fn setregs(&self, regs: &Regs) -> Result<(), Error> {
        ptrace::setregs(self.0, *regs).map_err(|err| self.map_nix_err(err))
    }

    /// Retrieves the message about the ptrace event that just happened, e.g.
    /// the pid of a new child on a clone stop.
    pub fn getevent(&self) -> Result<i64, Error> {
        ptrace::getevent(self.0).map_err(|err| self.map_nix_err(err))
    }

    /// Resumes the tracee, optionally delivering a signal, and transitions it
    /// back to a running state.
    pub fn resume<T: Into<Option<Signal>>>(self, sig: T) -> Result<Running, Error> {
        ptrace::cont(self.0, sig.into()).map_err(|err| self.map_nix_err(err))?;
        Ok(Running::new(self.0))
    }

    /// Like `resume`, but arranges for the tracee to be stopped at the next
    /// entry to or exit from a system call.
    pub fn syscall<T: Into<Option<Signal>>>(self, sig: T) -> Result<Running, Error> {
        ptrace::syscall(self.0, sig.into()).map_err(|err| self.map_nix_err(err))?;
        Ok(Running::new(self.0))
    }

    /// Restarts a tracee that is in a group-stop without ending the
    /// job-control stop, so that the tracer keeps receiving notifications.
    /// Only valid on [`Event::Stop`] stops of a seized tracee.
    pub fn listen(self) -> Result<Running, Error> {
        // nix doesn't provide `ptrace::listen`, so we need to roll our own.
        Errno::result(unsafe {
            libc::ptrace(
                libc::PTRACE_LISTEN,
                self.0.as_raw(),
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        })
        .map_err(|err| self.map_err(err))?;
        Ok(Running::new(self.0))
    }

    /// Detaches from and then resumes the stopped tracee, optionally
    /// delivering a signal.
    pub fn detach<T: Into<Option<Signal>>>(self, sig: T) -> Result<Running, Error> {
        ptrace::detach(self.0, sig.into()).map_err(|err| self.map_nix_err(err))?;
        Ok(Running::new(self.0))
    }
}

/// A running tracee. The only thing it can do is be waited on.
#[derive(Debug, Hash, Eq, PartialEq)]
pub struct Running(Pid);

impl Running {
    /// Creates a new running handle. This is generally the entry point for a
    /// tracee as soon as it is created.
    pub fn new(pid: Pid) -> Self {
        Running(pid)
    }

    /// Attaches to a process without stopping it. Children created afterwards
    /// report `Event::Stop` on their initial stop, and the tracee accepts
    /// `PTRACE_LISTEN` on group-stops.
    pub fn seize(pid: Pid, options: Options) -> Result<Self, Errno> {
        ptrace::seize(pid, options).map_err(|err| Errno::new(err as i32))?;
        Ok(Running(pid))
    }

    /// Returns the pid of the running tracee.
    pub fn pid(&self) -> Pid {
        self.0
    }

    /// Blocks until a state change occurs. This transitions the tracee to
    /// either a stopped or an exited state, never a running state.
    pub fn wait(self) -> Result<Wait, Error> {
        loop {
            return match waitpid(self.0, Some(WaitPidFlag::__WALL)) {
                Ok(status) => Wait::try_from(status),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => Err(err.into()),
            };
        }
    }
}

/// Asks for this process to be traced by its parent. Must be called by the
/// tracee itself, typically between `fork` and `execve`; the subsequent exec
/// then delivers a `SIGTRAP` stop to the tracer.
pub fn traceme() -> Result<(), Errno> {
    ptrace::traceme().map_err(|err| Errno::new(err as i32))
}

/// These tests are meant to test this API but also to show how ptrace works.
#[cfg(test)]
mod test {
    use nix::sys::signal::raise;
    use nix::unistd::fork;
    use nix::unistd::ForkResult;

    use super::*;

    // Traces a closure in a forked child. The child announces itself with a
    // SIGTRAP once `f` has run, leaving the parent holding a stopped handle
    // while `value` is alive in the child's address space at the same virtual
    // address as the parent's copy.
    pub(crate) fn trace_with<T, F, P>(mut value: T, f: F, parent: P) -> bool
    where
        F: FnOnce(&mut T),
        P: FnOnce(Stopped, &mut T) -> bool,
    {
        match unsafe { fork() }.unwrap() {
            ForkResult::Parent { child } => {
                let wait = Running::new(child).wait().unwrap();
                let stopped = match wait {
                    Wait::Stopped(stopped, Event::Signal(Signal::SIGTRAP)) => stopped,
                    wait => panic!("expected SIGTRAP stop, got {}", wait),
                };

                let result = parent(stopped, &mut value);

                let stopped = Stopped::new_unchecked(child);
                assert_eq!(
                    stopped.resume(None).unwrap().wait().unwrap(),
                    Wait::Exited(child, ExitStatus::Exited(0))
                );

                result
            }
            ForkResult::Child => {
                traceme().unwrap();

                f(&mut value);

                // The parent can mess with our memory while we're stopped
                // here.
                raise(Signal::SIGTRAP).unwrap();

                // Can't use the normal exit function since `execve` was never
                // called and we don't want atexit handlers to run.
                unsafe { libc::_exit(0) }
            }
        }
    }

    #[test]
    fn signal_stop_and_exit() {
        assert!(trace_with((), |_| {}, |stopped, _| {
            // While stopped, register access must work.
            let regs = stopped.getregs().unwrap();
            stopped.setregs(&regs).unwrap();
            true
        }));
    }

    #[test]
    fn exit_status_of_killed_child() {
        match unsafe { fork() }.unwrap() {
            ForkResult::Parent { child } => {
                let wait = Running::new(child).wait().unwrap();
                let stopped = match wait {
                    Wait::Stopped(stopped, Event::Signal(Signal::SIGILL)) => stopped,
                    wait => panic!("expected SIGILL stop, got {}", wait),
                };

                assert_eq!(
                    stopped.resume(Signal::SIGILL).unwrap().wait().unwrap(),
                    Wait::Exited(child, ExitStatus::Signaled(Signal::SIGILL))
                );
            }
            ForkResult::Child => {
                // Suppress core dumps for testing purposes.
                let limit = libc::rlimit {
                    rlim_cur: 0,
                    rlim_max: 0,
                };
                let _ = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };

                traceme().unwrap();
                raise(Signal::SIGILL).unwrap();
                unsafe { libc::_exit(0) }
            }
        }
    }
}
