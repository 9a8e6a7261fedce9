//! landlock-stress - stress the Linux Landlock LSM
//!
//! Forks N workers. Each one sweeps the filesystem building rulesets in a
//! background child while forking short-lived children that restrict
//! themselves with one access mask at a time and probe a scratch file.

mod config;
mod error;
mod explorer;
mod harness;
mod landlock;
mod probe;
mod process;
mod ruleset;
mod stressor;
#[cfg(test)]
mod testing;
mod trial;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{info, info_span, warn};

use crate::config::Config;
use crate::landlock::Syscalls;
use crate::process::RunBudget;

/// Failures after which a worker gives up
pub const MAX_FAILURES: u32 = 5;

/// Explorer recursion limit
pub const MAX_DEPTH: u32 = 30;

/// Immediate retries for a fork failing with EAGAIN/ENOMEM
pub const FORK_RETRIES: u32 = 64;

const STRESSOR_NAME: &str = "landlock";

#[derive(Debug, Parser)]
#[command(name = "landlock-stress", version, about = "Stress the Linux Landlock LSM")]
struct Cli {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start N workers stressing landlock file operations
    #[arg(short = 'n', long)]
    workers: Option<u32>,

    /// Stop each worker after N landlock bogo operations
    #[arg(long)]
    ops: Option<u64>,

    /// Stop each worker after N seconds (0 = no limit)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Directory for scratch files
    #[arg(long)]
    temp_path: Option<PathBuf>,

    /// Root of the tree swept by the explorer
    #[arg(long)]
    root: Option<PathBuf>,

    /// Do not run the background tree explorer
    #[arg(long)]
    no_explore: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(ops) = self.ops {
            config.ops = ops;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(ref path) = self.temp_path {
            config.temp_path = path.clone();
        }
        if let Some(ref root) = self.root {
            config.explorer_root = root.clone();
        }
        if self.no_explore {
            config.explore = false;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("loading config")?;
    cli.apply(&mut config);
    config.validate()?;

    process::install_signal_handlers().context("installing signal handlers")?;
    run_workers(&config);
    Ok(())
}

/// Fork one process per worker and wait for all of them.
fn run_workers(config: &Config) {
    let spawn_budget = RunBudget::new(0, config.timeout());
    let settings = config.settings();
    let mut workers: Vec<Pid> = Vec::new();

    for index in 0..config.workers {
        let mut attempt = 0;
        loop {
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    let span = info_span!("worker", index);
                    let _enter = span.enter();

                    process::arm_deadline(config.timeout().unwrap_or_default());
                    let budget = RunBudget::new(config.ops, config.timeout());
                    stressor::run_if_supported(STRESSOR_NAME, &Syscalls, &budget, &settings);
                    unsafe { libc::_exit(0) };
                }
                Ok(ForkResult::Parent { child }) => {
                    workers.push(child);
                    break;
                }
                Err(errno) if settings.fork_retry.should_retry(errno, attempt, &spawn_budget) => {
                    attempt += 1;
                }
                Err(errno) => {
                    warn!(%errno, index, "cannot fork worker");
                    break;
                }
            }
        }
    }

    info!(workers = workers.len(), "landlock workers started");
    reap_workers(workers);
}

fn reap_workers(mut workers: Vec<Pid>) {
    let mut forwarded = false;
    while let Some(&pid) = workers.last() {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(Errno::ECHILD) => {
                workers.pop();
            }
            Ok(_) => {}
            Err(Errno::EINTR) => {
                if process::interrupted() && !forwarded {
                    for &worker in &workers {
                        let _ = kill(worker, Signal::SIGTERM);
                    }
                    forwarded = true;
                }
            }
            Err(errno) => {
                warn!(%errno, %pid, "waitpid on worker failed");
                workers.pop();
            }
        }
    }
}
