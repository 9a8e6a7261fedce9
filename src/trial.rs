//! A single sandbox trial.
//!
//! Runs inside a disposable child: build a ruleset for one access mask,
//! restrict the process with it (irrevocable), then poke the scratch file
//! through the now-active restriction. The outcome is reported to the
//! parent only through the exit status.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::landlock::{AccessFs, Landlock};
use crate::ruleset::{self, Built};

/// Per-trial state, built by the parent before forking and read-only in
/// the child.
#[derive(Debug, Clone)]
pub struct TrialContext {
    pub access: AccessFs,
    /// Canonical scratch directory; the rule is bound here.
    pub dir: PathBuf,
    /// `<dir>/landlock-<pid>`.
    pub scratch: PathBuf,
}

impl TrialContext {
    pub fn new(dir: &Path, access: AccessFs) -> Self {
        let pid = nix::unistd::getpid();
        Self {
            access,
            dir: dir.to_path_buf(),
            scratch: dir.join(format!("landlock-{pid}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Restricted and probed.
    Passed,
    /// The kernel rejected this configuration before restriction.
    Skipped,
    /// A valid ruleset refused to attach.
    Failed,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Passed | Outcome::Skipped => libc::EXIT_SUCCESS,
            Outcome::Failed => libc::EXIT_FAILURE,
        }
    }
}

pub struct SandboxTrial<'a, L> {
    landlock: &'a L,
    ctx: &'a TrialContext,
}

impl<'a, L: Landlock> SandboxTrial<'a, L> {
    pub fn new(landlock: &'a L, ctx: &'a TrialContext) -> Self {
        Self { landlock, ctx }
    }

    /// Run the trial. After a `Passed` outcome the calling process is
    /// restricted for the rest of its life.
    pub fn run(&self) -> Outcome {
        let outcome = self.exercise();
        let _ = fs::remove_file(&self.ctx.scratch);
        outcome
    }

    fn exercise(&self) -> Outcome {
        let ctx = self.ctx;

        // Create the empty scratch file
        let _ = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&ctx.scratch);

        // Exercise the ABI version query; the answer is irrelevant
        let _ = self.landlock.abi_version();

        let ruleset = match ruleset::build(self.landlock, ctx.access, &ctx.dir) {
            Ok(Built::Ready(ruleset)) => ruleset,
            Ok(Built::RuleRejected(ruleset, e)) => {
                debug!(
                    access = %format_args!("{:#x}", ctx.access),
                    handled = %format_args!("{:#x}", ruleset.handled()),
                    error = %e,
                    "rule rejected"
                );
                return Outcome::Skipped;
            }
            Err(e) => {
                info!(error = %e, "ruleset rejected");
                return Outcome::Skipped;
            }
        };

        if let Err(errno) = self.landlock.set_no_new_privs() {
            debug!(error = %Error::NoNewPrivs(errno), "skipping trial");
            return Outcome::Skipped;
        }

        if let Err(e) = ruleset.restrict_self(self.landlock) {
            warn!(access = %format_args!("{:#x}", ctx.access), error = %e, "restrict failed");
            return Outcome::Failed;
        }
        drop(ruleset);

        // Restricted now; the opens may or may not be allowed for this mask
        probe_open(&ctx.scratch, OpenOptions::new().read(true));
        probe_open(&ctx.scratch, OpenOptions::new().write(true));
        probe_open(&ctx.scratch, OpenOptions::new().read(true).write(true));

        Outcome::Passed
    }
}

fn probe_open(path: &Path, options: &OpenOptions) {
    if let Ok(file) = options.open(path) {
        drop(file);
    }
}
