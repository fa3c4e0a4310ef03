/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use core::ffi::c_void;
use core::mem;

use nix::sys::ptrace;
use syscalls::Errno;

use crate::Error;
use crate::Stopped;

const WORD_SIZE: usize = mem::size_of::<libc::c_long>();

impl Stopped {
    /// Reads a single word of tracee memory via `PTRACE_PEEKDATA`.
    fn peek_word(&self, addr: u64) -> Result<u64, Error> {
        ptrace::read(self.pid(), addr as *mut c_void)
            .map(|word| word as u64)
            .map_err(|err| self.map_nix_err(err))
    }

    /// Writes a single word of tracee memory via `PTRACE_POKEDATA`. Unlike
    /// `process_vm_writev`, this goes through the kernel's access_vm path and
    /// succeeds even on pages the tracee has mapped read-only.
    fn poke_word(&mut self, addr: u64, word: u64) -> Result<(), Error> {
        unsafe { ptrace::write(self.pid(), addr as *mut c_void, word as *mut c_void) }
            .map_err(|err| self.map_nix_err(err))
    }

    /// Does a single vectored read from the remote address space, returning
    /// the number of bytes read. Page faults are treated as an EOF. See
    /// `man 2 process_vm_readv` for partial-transfer behavior.
    fn read_chunk(&self, addr: u64, buf: &mut [u8]) -> Result<usize, Error> {
        let remote = libc::iovec {
            iov_base: addr as *mut c_void,
            iov_len: buf.len(),
        };
        let local = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: buf.len(),
        };
        Errno::result(unsafe {
            libc::process_vm_readv(self.pid().as_raw(), &local, 1, &remote, 1, 0)
        })
        .map(|n| n as usize)
        .or_else(|err| {
            if err == Errno::EFAULT {
                Ok(0)
            } else {
                Err(self.map_err(err))
            }
        })
    }

    /// Reads from the tracee's address space starting at `addr`. Returns the
    /// number of bytes read, which is less than `buf.len()` only if an
    /// unmapped page was hit.
    ///
    /// A partial transfer at a page boundary is not an EOF, so this keeps
    /// reading until no progress is made.
    pub fn read_mem(&self, addr: u64, buf: &mut [u8]) -> Result<usize, Error> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read_chunk(addr + total as u64, &mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Writes `data` into the tracee's address space at `addr` using the poke
    /// primitive, so the write lands even on write-protected pages.
    ///
    /// Writes are word-sized; a trailing partial word is merged with the
    /// tracee's existing memory so the bytes past the end survive.
    pub fn poke_mem(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        let mut offset = 0;
        while offset < data.len() {
            let cur = addr + offset as u64;
            let remaining = &data[offset..];
            let word = if remaining.len() >= WORD_SIZE {
                u64::from_ne_bytes(remaining[..WORD_SIZE].try_into().unwrap())
            } else {
                let mut bytes = self.peek_word(cur)?.to_ne_bytes();
                bytes[..remaining.len()].copy_from_slice(remaining);
                u64::from_ne_bytes(bytes)
            };
            self.poke_word(cur, word)?;
            offset += WORD_SIZE;
        }
        Ok(())
    }

    /// Reads a NUL-terminated string out of the tracee's address space.
    pub fn read_cstring(&self, addr: u64) -> Result<String, Error> {
        let mut bytes = Vec::new();
        let mut cur = addr;
        loop {
            let word = self.peek_word(cur)?.to_ne_bytes();
            match word.iter().position(|&b| b == 0) {
                Some(nul) => {
                    bytes.extend_from_slice(&word[..nul]);
                    break;
                }
                None => {
                    bytes.extend_from_slice(&word);
                    cur += WORD_SIZE as u64;
                }
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod test {
    use std::ffi::CString;

    use quickcheck::QuickCheck;
    use quickcheck_macros::quickcheck;

    use crate::test::trace_with;

    fn prop_read_roundtrip(buf: Vec<u8>) -> bool {
        trace_with(
            buf,
            |_| {},
            |stopped, buf| {
                let copied = buf.clone();

                // Zero our copy to show the bytes really come from the child.
                for byte in buf.iter_mut() {
                    *byte = 0;
                }

                let n = stopped.read_mem(copied.as_ptr() as u64, buf).unwrap();
                n == copied.len() && *buf == copied
            },
        )
    }

    fn prop_poke_roundtrip(buf: Vec<u8>) -> bool {
        trace_with(
            buf,
            |buf| {
                // The child zeroes its copy before stopping so that only a
                // working poke can restore the contents.
                for byte in buf.iter_mut() {
                    *byte = 0;
                }
            },
            |mut stopped, buf| {
                let addr = buf.as_ptr() as u64;
                stopped.poke_mem(addr, buf).unwrap();

                let mut readback = vec![0u8; buf.len()];
                let n = stopped.read_mem(addr, &mut readback).unwrap();
                n == buf.len() && readback == *buf
            },
        )
    }

    #[test]
    fn remote_memory() {
        // Cover multi-page transfers, not just the default tiny vectors.
        let mut qc = QuickCheck::new().gen(quickcheck::Gen::new(0x4000));

        qc.quickcheck(prop_read_roundtrip as fn(Vec<u8>) -> bool);
        qc.quickcheck(prop_poke_roundtrip as fn(Vec<u8>) -> bool);

        // Small and word-straddling sizes that random generation may miss.
        for len in [0, 1, 2, 7, 8, 9, 15, 16, 17] {
            let buf: Vec<u8> = (0..len).map(|i| i as u8 | 1).collect();
            assert!(prop_read_roundtrip(buf.clone()));
            assert!(prop_poke_roundtrip(buf));
        }
    }

    #[quickcheck]
    fn prop_remote_cstring(s: String) -> bool {
        // quickcheck doesn't support CString :-(
        let s = CString::new(
            s.into_bytes()
                .into_iter()
                .filter(|&b| b != 0)
                .collect::<Vec<_>>(),
        )
        .unwrap();

        trace_with(
            s,
            |_| {},
            |stopped, s| {
                let read = stopped.read_cstring(s.as_ptr() as u64).unwrap();
                read.as_bytes() == s.as_bytes()
            },
        )
    }

    #[test]
    fn remote_cstring() {
        // A known case longer than one word, straddling the peek loop.
        let s = CString::new("/etc/hosts").unwrap();
        assert!(trace_with(
            s,
            |_| {},
            |stopped, s| {
                let read = stopped.read_cstring(s.as_ptr() as u64).unwrap();
                read.as_bytes() == s.as_bytes()
            },
        ));
    }
}
