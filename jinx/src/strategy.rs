/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;
use std::str::FromStr;

use jinx_ptrace::Regs;
use jinx_ptrace::Stopped;
use rand::Rng;
use syscalls::Sysno;

use crate::error::Error;
use crate::range::Range;
use crate::tracee::PendingExit;

/// An I/O perturbation strategy.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Strategy {
    /// Suppress the syscall but report full success to the caller.
    Silence,

    /// Scribble random bytes over the I/O buffer before the syscall runs.
    RandomBuffer,

    /// Seek the file descriptor by a random delta, then replay the original
    /// syscall.
    RandomOffset,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Silence => write!(f, "silence"),
            Self::RandomBuffer => write!(f, "randomize buffer"),
            Self::RandomOffset => write!(f, "randomize file offset"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "silence" => Ok(Self::Silence),
            "randbuf" => Ok(Self::RandomBuffer),
            "randoff" => Ok(Self::RandomOffset),
            _ => Err(Error::UnknownStrategy(s.to_string())),
        }
    }
}

impl Strategy {
    /// Parses a comma-separated strategy list, e.g. `"silence,randoff"`.
    /// The list must name at least one strategy.
    pub fn parse_list(s: &str) -> Result<Vec<Strategy>, Error> {
        let mut strategies = Vec::new();
        for name in s.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            strategies.push(name.parse()?);
        }
        if strategies.is_empty() {
            return Err(Error::UnknownStrategy(s.to_string()));
        }
        Ok(strategies)
    }
}

// A syscall number no kernel will ever implement. Entering a syscall with
// this in the number register makes the kernel do nothing but schedule the
// exit stop.
const SUPPRESSED_SYSCALL: u64 = u64::MAX;

/// Cancels the syscall described by `regs`, pretending at exit that the full
/// transfer of `regs.rdx` bytes succeeded.
pub(crate) fn silence(task: &Stopped, regs: &Regs) -> Result<PendingExit, Error> {
    let mut faked = *regs;
    faked.orig_rax = SUPPRESSED_SYSCALL;
    task.setregs(&faked).map_err(Error::RegisterAccessFailed)?;
    Ok(PendingExit::ForceReturn { value: regs.rdx })
}

/// Overwrites a sample of byte positions in the tracee buffer at
/// `addr..addr+len` with random values, in place. The write goes through the
/// poke primitive so read-only pages are mutated too.
pub(crate) fn random_buffer<R: Rng>(
    task: &mut Stopped,
    addr: u64,
    len: u64,
    mutations: &Range,
    rng: &mut R,
) -> Result<(), Error> {
    if addr == 0 || len == 0 {
        return Ok(());
    }

    let mut data = vec![0u8; len as usize];
    let got = task
        .read_mem(addr, &mut data)
        .map_err(|source| Error::MemoryReadFailed { addr, source })?;
    if got != data.len() {
        return Err(Error::ShortRead {
            wanted: data.len(),
            got,
        });
    }

    for _ in 0..mutations.sample(rng).max(0) {
        let pos = rng.gen_range(0..data.len());
        data[pos] = rng.gen();
    }

    task.poke_mem(addr, &data)
        .map_err(|source| Error::MemoryWriteFailed { addr, source })
}

/// Rewrites the syscall in place to `lseek(fd, delta, SEEK_CUR)`. The exit
/// handler restores the saved registers and rewinds the instruction pointer
/// so the original syscall is re-executed on resume.
pub(crate) fn random_offset<R: Rng>(
    task: &Stopped,
    regs: &Regs,
    offsets: &Range,
    rng: &mut R,
) -> Result<PendingExit, Error> {
    let mut lseek = *regs;
    lseek.orig_rax = Sysno::lseek as u64;
    lseek.rax = Sysno::lseek as u64;
    lseek.rdi = regs.rdi;
    lseek.rsi = offsets.sample(rng) as u64;
    lseek.rdx = libc::SEEK_CUR as u64;
    lseek.r10 = 0;
    lseek.r8 = 0;
    lseek.r9 = 0;
    task.setregs(&lseek).map_err(Error::RegisterAccessFailed)?;
    Ok(PendingExit::RestoreAndRewind { regs: *regs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for (name, strategy) in [
            ("silence", Strategy::Silence),
            ("randbuf", Strategy::RandomBuffer),
            ("randoff", Strategy::RandomOffset),
        ] {
            assert_eq!(name.parse::<Strategy>().unwrap(), strategy);
        }
        assert!(matches!(
            "quiet".parse::<Strategy>(),
            Err(Error::UnknownStrategy(_))
        ));
    }

    #[test]
    fn display_is_human_readable() {
        assert_eq!(Strategy::Silence.to_string(), "silence");
        assert_eq!(Strategy::RandomBuffer.to_string(), "randomize buffer");
        assert_eq!(Strategy::RandomOffset.to_string(), "randomize file offset");
    }

    #[test]
    fn parses_lists() {
        assert_eq!(
            Strategy::parse_list("silence,randoff").unwrap(),
            vec![Strategy::Silence, Strategy::RandomOffset]
        );
        assert_eq!(
            Strategy::parse_list(" randbuf ").unwrap(),
            vec![Strategy::RandomBuffer]
        );
        assert!(Strategy::parse_list("").is_err());
        assert!(Strategy::parse_list("silence,bogus").is_err());
    }
}
