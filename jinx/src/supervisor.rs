/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashMap;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use jinx_ptrace as trace;
use jinx_ptrace::Event;
use jinx_ptrace::Pid;
use jinx_ptrace::Running;
use jinx_ptrace::Signal;
use jinx_ptrace::Stopped;
use jinx_ptrace::Wait;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::Error;
use crate::options::Options;
use crate::tracee::Tracee;

/// What a stop asks of the next resume: a signal to replay, and whether the
/// tracee sits in a group-stop (which needs the listen primitive instead of
/// an ordinary restart).
#[derive(Debug, Default, Copy, Clone)]
pub struct Status {
    /// A pending signal to inject on resume.
    pub sig: Option<Signal>,

    /// The stop was a group-stop.
    pub group_stop: bool,
}

/// One classified stop, ready to be passed back to [`Supervisor::resume`].
#[derive(Debug)]
pub struct Step {
    /// The tracee this stop belongs to.
    pub pid: Pid,

    /// How the tracee must be resumed.
    pub status: Status,

    // `None` when the tracee fully exited and there is nothing to resume.
    stopped: Option<Stopped>,
}

/// The multi-tracee registry and wait/dispatch loop. All tracing runs on the
/// thread that called [`Supervisor::launch`]; the kernel ties each tracee to
/// the attaching thread, so the supervisor must never migrate.
#[derive(Debug)]
pub struct Supervisor {
    options: Arc<Options>,
    tracees: HashMap<Pid, Tracee>,
    rng: StdRng,
}

fn attach_options() -> trace::Options {
    trace::Options::PTRACE_O_EXITKILL
        | trace::Options::PTRACE_O_TRACECLONE
        | trace::Options::PTRACE_O_TRACEFORK
        | trace::Options::PTRACE_O_TRACEVFORK
        | trace::Options::PTRACE_O_TRACESYSGOOD
        | trace::Options::PTRACE_O_TRACEEXIT
}

fn wallclock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or_default()
}

impl Supervisor {
    /// Spawns `target` stopped at `execve`, reattaches with the full event
    /// option set, and resumes it into syscall-stop mode. Returns the
    /// supervisor and the initial pid.
    pub fn launch(target: &str, args: &[String], options: Options) -> Result<(Self, Pid), Error> {
        Self::launch_with_rng(target, args, options, StdRng::seed_from_u64(wallclock_seed()))
    }

    /// Like [`Supervisor::launch`], with a caller-provided random source so
    /// injection decisions can be made deterministic.
    pub fn launch_with_rng(
        target: &str,
        args: &[String],
        options: Options,
        rng: StdRng,
    ) -> Result<(Self, Pid), Error> {
        assert!(!options.strategies.is_empty(), "no strategies enabled");

        let child = unsafe {
            Command::new(target)
                .args(args)
                .pre_exec(|| {
                    trace::traceme()
                        .map_err(|err| io::Error::from_raw_os_error(err.into_raw()))
                })
                .spawn()
        }
        .map_err(Error::SpawnFailed)?;
        let pid = Pid::from_raw(child.id() as i32);

        // The traceme child stops with a SIGTRAP once execve lands.
        match Running::new(pid).wait()? {
            Wait::Stopped(stopped, Event::Signal(Signal::SIGTRAP)) => {
                // Hand the tracee back to the kernel stopped, then seize it:
                // group-stops only get listen semantics under PTRACE_SEIZE.
                stopped.detach(Signal::SIGSTOP)?;
            }
            wait => return Err(Error::UnexpectedInitialStop(wait.to_string())),
        }
        let running = Running::seize(pid, attach_options())
            .map_err(|err| Error::AttachFailed { pid, source: err.into() })?;

        // Consume the synthetic stop left over from the reattach, suppressing
        // the SIGSTOP we injected above.
        match running.wait()? {
            Wait::Stopped(stopped, Event::Stop | Event::Signal(Signal::SIGSTOP | Signal::SIGTRAP)) => {
                stopped.syscall(None)?;
            }
            wait => return Err(Error::UnexpectedInitialStop(wait.to_string())),
        }

        let options = Arc::new(options);
        let mut tracees = HashMap::new();
        tracees.insert(pid, Tracee::new(pid, Arc::clone(&options)));

        Ok((
            Supervisor {
                options,
                tracees,
                rng,
            },
            pid,
        ))
    }

    /// Number of live tracees in the registry.
    pub fn tracee_count(&self) -> usize {
        self.tracees.len()
    }

    /// Waits for any tracee to stop, classifies the stop, and dispatches it.
    /// Returns [`Error::FinishedTrace`] once the registry drains; any other
    /// error is specific to this step and the loop may continue.
    pub fn step(&mut self) -> Result<Step, Error> {
        let wait = trace::wait_all()?.ok_or(Error::FinishedTrace)?;
        let pid = wait.pid();
        let mut status = Status::default();

        // A pid we haven't met is a fresh thread or child from clone/fork.
        // Register it and let its own next stop drive it through the state
        // machine.
        if !self.tracees.contains_key(&pid) {
            tracing::info!("[{}] new tracee (tracing enabled)", pid);
            self.tracees.insert(pid, Tracee::new(pid, Arc::clone(&self.options)));
            let stopped = match wait {
                Wait::Stopped(stopped, _) => Some(stopped),
                Wait::Exited(..) => None,
            };
            return Ok(Step { pid, status, stopped });
        }

        match wait {
            Wait::Exited(pid, exit_status) => {
                tracing::info!("[{}] {}", pid, exit_status);
                if let Some(mut tracee) = self.tracees.remove(&pid) {
                    tracee.mark_exited();
                }
                if self.tracees.is_empty() {
                    return Err(Error::FinishedTrace);
                }
                Ok(Step {
                    pid,
                    status,
                    stopped: None,
                })
            }
            Wait::Stopped(mut stopped, event) => {
                match event {
                    Event::Syscall => {
                        let tracee = self.tracees.get_mut(&pid).expect("tracee registered above");
                        if let Err(err) = tracee.on_syscall_stop(&mut stopped, &mut self.rng) {
                            tracing::warn!("[{}] interception failed: {}", pid, err);
                        }
                    }
                    Event::Stop => {
                        tracing::info!("[{}] received group stop", pid);
                        status.group_stop = true;
                    }
                    Event::Signal(Signal::SIGTRAP) => {
                        tracing::info!("[{}] spurious trap", pid);
                    }
                    Event::Signal(sig) => {
                        tracing::info!("[{}] received signal '{}'", pid, sig);
                        status.sig = Some(sig);
                    }
                    Event::NewChild(op, child) => {
                        tracing::info!("[{}] called {}() = {}", pid, op, child);
                    }
                    Event::Exec(former) => {
                        // The old image is gone; drop its bookkeeping. The
                        // attach options don't ask for exec events, so this
                        // is latent unless that changes.
                        tracing::info!("[{}] called exec() (formerly {})", pid, former);
                        if let Some(mut tracee) = self.tracees.remove(&pid) {
                            tracee.mark_exited();
                        }
                    }
                    Event::Exit => {
                        tracing::info!("[{}] exiting", pid);
                    }
                }
                Ok(Step {
                    pid,
                    status,
                    stopped: Some(stopped),
                })
            }
        }
    }

    /// Resumes the tracee from `step` in syscall-stop mode, replaying any
    /// pending signal, or listens if the stop was a group-stop. A tracee that
    /// left the registry is not resumed.
    pub fn resume(&mut self, step: Step) -> Result<(), Error> {
        let Step {
            pid,
            status,
            stopped,
        } = step;

        let Some(stopped) = stopped else {
            return Ok(());
        };
        if !self.tracees.contains_key(&pid) {
            return Ok(());
        }

        if status.group_stop {
            stopped.listen()?;
        } else {
            stopped.syscall(status.sig)?;
        }
        Ok(())
    }
}
