/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

/// The general purpose registers of a stopped tracee. The x86-64 layout is
/// assumed throughout; in particular the syscall number lives in `orig_rax`
/// and arguments in `rdi`, `rsi`, `rdx`, `r10`, `r8`, `r9`.
pub use libc::user_regs_struct as Regs;
