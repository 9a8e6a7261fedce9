//! The landlock stressor: background tree explorer plus the trial loop.
//!
//! Each bogo-op runs three passes over `TRIAL_MASKS`: cumulative masks,
//! single masks, then the complement of the final cumulative mask. Trials
//! run strictly one at a time. The loop stops early once the failure
//! threshold is hit.

use std::path::PathBuf;

use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::explorer::{HostTree, TreeExplorer};
use crate::harness::{FailureCounter, RunTrial, TrialHarness};
use crate::landlock::{AccessFs, Landlock};
use crate::probe;
use crate::process::{self, ForkRetry, ProcState, RunBudget};
use crate::trial::TrialContext;

/// Canonical mask ordering for both passes.
pub const TRIAL_MASKS: [AccessFs; 15] = [
    AccessFs::EXECUTE,
    AccessFs::WRITE_FILE,
    AccessFs::READ_FILE,
    AccessFs::from_bits(AccessFs::WRITE_FILE.bits() | AccessFs::READ_FILE.bits()),
    AccessFs::READ_DIR,
    AccessFs::REMOVE_DIR,
    AccessFs::REMOVE_FILE,
    AccessFs::MAKE_CHAR,
    AccessFs::MAKE_DIR,
    AccessFs::MAKE_REG,
    AccessFs::MAKE_SOCK,
    AccessFs::MAKE_FIFO,
    AccessFs::MAKE_BLOCK,
    AccessFs::MAKE_SYM,
    AccessFs::NONE,
];

#[derive(Debug, Clone)]
pub struct Settings {
    /// Canonical scratch directory.
    pub temp_dir: PathBuf,
    /// Tree swept by the background explorer; `None` disables it.
    pub explorer_root: Option<PathBuf>,
    pub max_depth: u32,
    pub failure_threshold: u32,
    pub fork_retry: ForkRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub bogo_ops: u64,
    pub failures: u32,
    pub aborted: bool,
}

enum Flow {
    Continue,
    Stop,
}

pub struct Stressor<'a, L> {
    name: &'a str,
    landlock: &'a L,
    budget: &'a RunBudget,
    settings: &'a Settings,
}

impl<'a, L: Landlock> Stressor<'a, L> {
    pub fn new(name: &'a str, landlock: &'a L, budget: &'a RunBudget, settings: &'a Settings) -> Self {
        Self {
            name,
            landlock,
            budget,
            settings,
        }
    }

    pub fn run(&self) -> Summary {
        let harness = TrialHarness::new(self.landlock, self.budget, self.settings.fork_retry);
        self.run_with(&harness)
    }

    pub fn run_with<H: RunTrial>(&self, harness: &H) -> Summary {
        let explorer = self.spawn_explorer();

        process::set_proc_state(self.name, ProcState::Run);
        let mut failures = FailureCounter::default();
        let aborted = self.trial_loop(harness, &mut failures);

        if let Some(pid) = explorer {
            let _ = process::kill_and_wait(pid);
        }
        process::set_proc_state(self.name, ProcState::Deinit);

        if aborted {
            warn!(
                stressor = self.name,
                failures = failures.get(),
                "too many landlock failures, stopping early"
            );
        }

        Summary {
            bogo_ops: self.budget.bogo_ops(),
            failures: failures.get(),
            aborted,
        }
    }

    /// Returns true when stopped by the failure threshold.
    fn trial_loop<H: RunTrial>(&self, harness: &H, failures: &mut FailureCounter) -> bool {
        loop {
            // Cumulative masks, a mix of valid and invalid combinations
            let mut accumulated = AccessFs::NONE;
            for mask in TRIAL_MASKS {
                accumulated |= mask;
                if let Flow::Stop = self.trial(harness, accumulated, failures) {
                    return self.threshold_hit(*failures);
                }
            }

            for mask in TRIAL_MASKS {
                if let Flow::Stop = self.trial(harness, mask, failures) {
                    return self.threshold_hit(*failures);
                }
            }

            if let Flow::Stop = self.trial(harness, accumulated.complement(), failures) {
                return self.threshold_hit(*failures);
            }

            self.budget.bogo_inc();
            if !self.budget.keep_running() {
                return false;
            }
        }
    }

    fn trial<H: RunTrial>(&self, harness: &H, access: AccessFs, failures: &mut FailureCounter) -> Flow {
        if !self.budget.keep_running() {
            return Flow::Stop;
        }
        let ctx = TrialContext::new(&self.settings.temp_dir, access);
        let exit = harness.run_trial(&ctx, failures);
        debug!(access = %format_args!("{:#x}", access), ?exit, "trial finished");
        if self.threshold_hit(*failures) {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    fn threshold_hit(&self, failures: FailureCounter) -> bool {
        failures.get() >= self.settings.failure_threshold
    }

    fn spawn_explorer(&self) -> Option<Pid> {
        let root = self.settings.explorer_root.as_ref()?;

        let mut attempt = 0;
        loop {
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
                    let explorer = TreeExplorer::new(
                        self.landlock,
                        &HostTree,
                        self.budget,
                        self.settings.max_depth,
                    );
                    let stats = explorer.run(root);
                    debug!(
                        rulesets = stats.rulesets,
                        rules = stats.rules,
                        skipped = stats.skipped,
                        "tree explorer stopped"
                    );
                    unsafe { libc::_exit(0) };
                }
                Ok(ForkResult::Parent { child }) => return Some(child),
                Err(errno) if self.settings.fork_retry.should_retry(errno, attempt, self.budget) => {
                    attempt += 1;
                }
                Err(errno) => {
                    warn!(error = %Error::Fork(errno), "tree explorer not started");
                    return None;
                }
            }
        }
    }
}

/// Probe for landlock and run the stressor only when it is usable.
pub fn run_if_supported<L: Landlock>(
    name: &str,
    landlock: &L,
    budget: &RunBudget,
    settings: &Settings,
) -> Option<Summary> {
    if !probe::probe(landlock).is_supported() {
        return None;
    }
    let summary = Stressor::new(name, landlock, budget, settings).run();
    info!(
        stressor = name,
        bogo_ops = summary.bogo_ops,
        failures = summary.failures,
        "stressor finished"
    );
    Some(summary)
}
