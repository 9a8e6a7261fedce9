//! Fork a child per trial, wait for it, and account for failures.
//!
//! The scratch file is removed by the parent after every trial, whatever
//! happened to the child.

use std::fs;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult};
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::landlock::Landlock;
use crate::process::{self, ForkRetry, RunBudget};
use crate::trial::{SandboxTrial, TrialContext};

/// Count of trials whose child exited with a non-success status.
/// Only ever grows during a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FailureCounter(u32);

impl FailureCounter {
    pub fn record(&mut self) {
        self.0 += 1;
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// How a trial child ended, as seen by the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialExit {
    Exited(i32),
    Signaled(Signal),
    /// waitpid was interrupted; the child was killed and reaped.
    Interrupted,
    WaitFailed(Errno),
    ForkFailed(Errno),
    Abnormal,
}

/// Something that can run one trial for the orchestrator.
pub trait RunTrial {
    fn run_trial(&self, ctx: &TrialContext, failures: &mut FailureCounter) -> TrialExit;
}

pub struct TrialHarness<'a, L> {
    landlock: &'a L,
    budget: &'a RunBudget,
    fork_retry: ForkRetry,
}

impl<'a, L: Landlock> TrialHarness<'a, L> {
    pub fn new(landlock: &'a L, budget: &'a RunBudget, fork_retry: ForkRetry) -> Self {
        Self {
            landlock,
            budget,
            fork_retry,
        }
    }

    fn wait_child(&self, child: nix::unistd::Pid, failures: &mut FailureCounter) -> TrialExit {
        match waitpid(child, None) {
            Err(Errno::EINTR) => {
                // Most likely the deadline alarm; not an enforcement failure
                let _ = process::kill_and_wait(child);
                TrialExit::Interrupted
            }
            Err(errno) => {
                error!(error = %Error::Wait(errno), pid = %child, "trial wait failed");
                TrialExit::WaitFailed(errno)
            }
            Ok(WaitStatus::Exited(_, code)) => {
                if code != libc::EXIT_SUCCESS {
                    failures.record();
                }
                TrialExit::Exited(code)
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                debug!(?sig, "trial child killed by signal");
                TrialExit::Signaled(sig)
            }
            Ok(status) => {
                debug!(?status, "trial child ended abnormally");
                TrialExit::Abnormal
            }
        }
    }
}

impl<L: Landlock> RunTrial for TrialHarness<'_, L> {
    fn run_trial(&self, ctx: &TrialContext, failures: &mut FailureCounter) -> TrialExit {
        let mut attempt = 0;
        let child = loop {
            match unsafe { fork() } {
                Ok(ForkResult::Child) => run_child(self.landlock, ctx),
                Ok(ForkResult::Parent { child }) => break child,
                Err(errno) if self.fork_retry.should_retry(errno, attempt, self.budget) => {
                    attempt += 1;
                }
                Err(errno) => {
                    warn!(error = %Error::Fork(errno), "giving up on trial");
                    let _ = fs::remove_file(&ctx.scratch);
                    return TrialExit::ForkFailed(errno);
                }
            }
        };

        let exit = self.wait_child(child, failures);
        let _ = fs::remove_file(&ctx.scratch);
        exit
    }
}

/// Child side: run the trial and leave through _exit so nothing of the
/// parent's state (buffers, destructors, test harness) runs here.
fn run_child<L: Landlock>(landlock: &L, ctx: &TrialContext) -> ! {
    let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        SandboxTrial::new(landlock, ctx).run().exit_code()
    }))
    .unwrap_or(libc::EXIT_FAILURE);
    unsafe { libc::_exit(code) }
}
