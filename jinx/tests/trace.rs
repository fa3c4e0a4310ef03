/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! End-to-end traces of real binaries with `unpredictability = 0`, i.e. with
//! interception wired up but no perturbation, so outcomes are deterministic.

use std::collections::HashSet;

use jinx::Error;
use jinx::Options;
use jinx::Supervisor;

fn quiet() -> Options {
    Options {
        unpredictability: 0.0,
        ..Options::default()
    }
}

/// Runs the supervisor loop to completion and returns every pid that was
/// observed stopping.
fn drain(mut supervisor: Supervisor) -> HashSet<i32> {
    let mut pids = HashSet::new();
    loop {
        match supervisor.step() {
            Ok(step) => {
                pids.insert(step.pid.as_raw());
                // A tracee may die between its stop and the resume; the next
                // step observes the exit, so resume errors are not fatal.
                let _ = supervisor.resume(step);
            }
            Err(Error::FinishedTrace) => break,
            Err(err) => panic!("step failed: {}", err),
        }
    }
    assert_eq!(supervisor.tracee_count(), 0, "registry must drain");
    pids
}

// The scenarios share the process-wide wildcard wait, so they run one after
// another inside a single test body; parallel test threads would reap each
// other's tracees.
#[test]
fn end_to_end() {
    echo_runs_unperturbed();
    forks_are_followed();
    spawn_failure_is_reported();
}

fn echo_runs_unperturbed() {
    let (supervisor, pid) =
        Supervisor::launch("/bin/echo", &["hi".to_string()], quiet()).unwrap();
    let pids = drain(supervisor);
    assert!(pids.contains(&pid.as_raw()));
}

fn forks_are_followed() {
    // Two commands force the shell to fork at least once.
    let args = vec!["-c".to_string(), "/bin/true && /bin/true".to_string()];
    let (supervisor, pid) = Supervisor::launch("/bin/sh", &args, quiet()).unwrap();
    let pids = drain(supervisor);
    assert!(pids.contains(&pid.as_raw()));
    assert!(
        pids.len() >= 2,
        "expected the shell and at least one child, saw {:?}",
        pids
    );
}

fn spawn_failure_is_reported() {
    let err = Supervisor::launch("/nonexistent/no-such-binary", &[], quiet()).unwrap_err();
    assert!(matches!(err, Error::SpawnFailed(_)), "got {:?}", err);
}
