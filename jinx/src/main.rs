/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::process;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use jinx::Error;
use jinx::Options;
use jinx::Range;
use jinx::Strategy;
use jinx::Supervisor;

/// Runs a command with a fraction of its system calls perturbed, simulating
/// unreliable I/O, network jitter, and scheduling drift.
#[derive(Debug, Parser)]
#[command(name = "jinx", arg_required_else_help = true)]
struct Args {
    /// Fraction of calls where unpredictability is applied.
    #[arg(
        short = 'u',
        long,
        value_name = "FRACTION",
        default_value_t = 0.2
    )]
    unpredictability: f64,

    /// Comma-separated list of I/O strategies to use (silence, randbuf,
    /// randoff). Defaults to all of them.
    #[arg(short = 's', long = "iostrats", value_name = "LIST")]
    iostrats: Option<String>,

    /// Number of bytes to randomly modify per buffer randomization.
    #[arg(
        short = 'b',
        long = "bufrange",
        value_name = "RANGE",
        default_value = "5,15"
    )]
    bufrange: Range,

    /// Range for seeking from the current file position.
    #[arg(
        short = 'f',
        long = "fprange",
        value_name = "RANGE",
        default_value = "-10,10",
        allow_hyphen_values = true
    )]
    fprange: Range,

    /// Range of time to add to intercepted sleeps (microseconds).
    #[arg(
        short = 'w',
        long = "waitrange",
        value_name = "RANGE",
        default_value = "1000"
    )]
    waitrange: Range,

    /// Show verbose debug information.
    #[arg(short = 'V', long)]
    verbose: bool,

    /// Path of the program to trace.
    #[arg(value_name = "TARGET", required = true)]
    target: String,

    /// Arguments to the program to trace.
    #[arg(
        value_name = "TARGET_ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    target_args: Vec<String>,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("jinx=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jinx=warn"))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("unable to set global default subscriber");
}

fn run(args: Args) -> anyhow::Result<()> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&args.unpredictability),
        "unpredictability must be within [0, 1], got {}",
        args.unpredictability
    );

    let strategies = match &args.iostrats {
        Some(list) => Strategy::parse_list(list)?,
        None => Options::default().strategies,
    };

    let options = Options {
        unpredictability: args.unpredictability,
        rand_buf: args.bufrange,
        rand_fp: args.fprange,
        wait: args.waitrange,
        strategies,
    };

    let (mut supervisor, pid) = Supervisor::launch(&args.target, &args.target_args, options)
        .with_context(|| format!("failed to trace {}", args.target))?;
    tracing::debug!("[{}] tracing {}", pid, args.target);

    loop {
        let step = match supervisor.step() {
            Ok(step) => step,
            Err(Error::FinishedTrace) => break,
            Err(err) => return Err(err).context("tracing failed"),
        };

        let pid = step.pid;
        if let Err(err) = supervisor.resume(step) {
            tracing::warn!("[{}] failed to resume: {}", pid, err);
        }
    }

    Ok(())
}

fn main() {
    let args = Args::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => process::exit(0),
            _ => process::exit(1),
        }
    });

    init_tracing(args.verbose);

    if let Err(err) = run(args) {
        eprintln!("jinx: {:#}", err);
        process::exit(1);
    }
}
