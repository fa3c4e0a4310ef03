/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashMap;

/// A per-process map from file descriptor to the path it was opened with.
///
/// This only knows about opens and closes observed while tracing; descriptors
/// inherited from before the trace started (or passed over a socket) resolve
/// to the empty path.
#[derive(Debug, Default, Clone)]
pub struct FdTable {
    paths: HashMap<i32, String>,
}

impl FdTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful open, overwriting any prior mapping for `fd`.
    pub fn record_open(&mut self, fd: i32, path: String) {
        self.paths.insert(fd, path);
    }

    /// Forgets `fd`. Closing an untracked fd is not an error.
    pub fn record_close(&mut self, fd: i32) {
        self.paths.remove(&fd);
    }

    /// Returns the path `fd` was opened with, or `""` if we never saw it.
    pub fn path_of(&self, fd: i32) -> &str {
        self.paths.get(&fd).map(String::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_open_and_close() {
        let mut fds = FdTable::new();
        assert_eq!(fds.path_of(3), "");

        fds.record_open(3, "/tmp/data".to_string());
        assert_eq!(fds.path_of(3), "/tmp/data");

        // The kernel reuses descriptor numbers; the last open wins.
        fds.record_open(3, "/tmp/other".to_string());
        assert_eq!(fds.path_of(3), "/tmp/other");

        fds.record_close(3);
        assert_eq!(fds.path_of(3), "");

        // Closing twice is fine.
        fds.record_close(3);
    }
}
