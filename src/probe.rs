//! One-shot landlock availability check.

use nix::errno::Errno;
use tracing::info;

use crate::landlock::{AccessFs, Landlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    Supported,
    /// landlock_create_ruleset is not implemented by this kernel.
    NoSyscall,
    /// The syscall exists but the LSM is not enabled (lsm=landlock).
    Disabled,
}

impl Support {
    pub fn is_supported(self) -> bool {
        self == Support::Supported
    }
}

/// Try to create a ruleset handling only read-file and classify the result.
pub fn probe<L: Landlock>(landlock: &L) -> Support {
    match landlock.create_ruleset(AccessFs::READ_FILE) {
        Ok(fd) => {
            drop(fd);
            Support::Supported
        }
        Err(Errno::ENOSYS) => {
            info!("stressor will be skipped, landlock_create_ruleset system call is not supported");
            Support::NoSyscall
        }
        Err(errno) => {
            info!(%errno, "stressor will be skipped, perhaps lsm=landlock is not enabled");
            Support::Disabled
        }
    }
}
