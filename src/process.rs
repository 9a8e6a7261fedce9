//! Process plumbing around the stressor.
//!
//! Run budget (cancellation predicate + bogo-op counter), async-safe
//! termination flag, fork retry policy, and kill-and-reap.
//!
//! Signal handlers are installed without SA_RESTART on purpose: a parent
//! blocked in waitpid() must see EINTR when the deadline alarm fires.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{self, kill, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::debug;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_terminate(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install SIGALRM/SIGINT/SIGTERM handlers that only raise the
/// termination flag. Handlers are inherited by forked children.
pub fn install_signal_handlers() -> Result<(), Errno> {
    let action = SigAction::new(
        SigHandler::Handler(on_terminate),
        SaFlags::empty(),
        SigSet::empty(),
    );

    for sig in [Signal::SIGALRM, Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only touches an atomic.
        unsafe { signal::sigaction(sig, &action)? };
    }
    Ok(())
}

/// True once a terminating signal (or the deadline alarm) arrived.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Arm SIGALRM for `timeout`. Alarms are not inherited across fork, so
/// each worker arms its own.
pub fn arm_deadline(timeout: Duration) {
    if timeout.is_zero() {
        return;
    }
    let secs = timeout.as_secs().clamp(1, u32::MAX as u64) as u32;
    nix::unistd::alarm::set(secs);
}

/// Cancellation predicate and bogo-op counter for one worker.
#[derive(Debug)]
pub struct RunBudget {
    deadline: Option<Instant>,
    max_ops: u64,
    ops: Cell<u64>,
}

impl RunBudget {
    /// `max_ops == 0` and `timeout == None` mean unbounded.
    pub fn new(max_ops: u64, timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            max_ops,
            ops: Cell::new(0),
        }
    }

    pub fn keep_running(&self) -> bool {
        if interrupted() {
            return false;
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return false;
        }
        self.max_ops == 0 || self.ops.get() < self.max_ops
    }

    pub fn bogo_inc(&self) {
        self.ops.set(self.ops.get() + 1);
    }

    pub fn bogo_ops(&self) -> u64 {
        self.ops.get()
    }
}

/// Decides whether a failed fork should be retried right away.
#[derive(Debug, Clone, Copy)]
pub struct ForkRetry {
    pub max_attempts: u32,
}

impl ForkRetry {
    pub fn should_retry(&self, errno: Errno, attempt: u32, budget: &RunBudget) -> bool {
        matches!(errno, Errno::EAGAIN | Errno::ENOMEM | Errno::EINTR)
            && attempt < self.max_attempts
            && budget.keep_running()
    }
}

/// SIGKILL `pid` and block until it is reaped.
pub fn kill_and_wait(pid: Pid) -> Result<WaitStatus, Errno> {
    let _ = kill(pid, Signal::SIGKILL);
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Run,
    Deinit,
}

/// Announce a stressor state transition.
pub fn set_proc_state(name: &str, state: ProcState) {
    debug!(stressor = name, ?state, "state change");
}
