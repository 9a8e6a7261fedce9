//! Programmable `Landlock` stub for tests.
//!
//! Rulesets are backed by /dev/null descriptors so ownership and close
//! behaviour match the real thing without touching the kernel's landlock
//! state. Nothing here ever restricts the test process.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::path::PathBuf;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{raise, Signal};

use crate::landlock::{AccessFs, Landlock};

/// What the stub does when asked to restrict itself.
#[derive(Debug, Clone, Copy)]
pub enum Restrict {
    Allow,
    Fail(Errno),
    /// SIGKILL the calling process, as if the kernel took it down.
    Kill,
    /// Block for this long, then allow.
    Stall(Duration),
}

#[derive(Debug)]
pub struct FakeLandlock {
    pub abi: Result<u32, Errno>,
    pub create: Option<Errno>,
    pub add: Option<Errno>,
    pub no_new_privs: Option<Errno>,
    pub restrict: Restrict,
    pub created: Cell<u32>,
    pub handled: RefCell<Vec<AccessFs>>,
    pub rules: RefCell<Vec<(PathBuf, AccessFs)>>,
}

impl Default for FakeLandlock {
    fn default() -> Self {
        Self {
            abi: Ok(1),
            create: None,
            add: None,
            no_new_privs: None,
            restrict: Restrict::Allow,
            created: Cell::new(0),
            handled: RefCell::new(Vec::new()),
            rules: RefCell::new(Vec::new()),
        }
    }
}

impl FakeLandlock {
    pub fn failing_create(errno: Errno) -> Self {
        Self {
            abi: Err(errno),
            create: Some(errno),
            ..Self::default()
        }
    }

    pub fn failing_restrict() -> Self {
        Self {
            restrict: Restrict::Fail(Errno::EPERM),
            ..Self::default()
        }
    }

    pub fn rule_paths(&self) -> Vec<PathBuf> {
        self.rules.borrow().iter().map(|(p, _)| p.clone()).collect()
    }
}

impl Landlock for FakeLandlock {
    fn abi_version(&self) -> Result<u32, Errno> {
        self.abi
    }

    fn create_ruleset(&self, handled: AccessFs) -> Result<OwnedFd, Errno> {
        if let Some(errno) = self.create {
            return Err(errno);
        }
        let file = File::open("/dev/null").map_err(|_| Errno::EMFILE)?;
        self.created.set(self.created.get() + 1);
        self.handled.borrow_mut().push(handled);
        Ok(file.into())
    }

    fn add_path_rule(
        &self,
        _ruleset: BorrowedFd<'_>,
        parent: BorrowedFd<'_>,
        allowed: AccessFs,
    ) -> Result<(), Errno> {
        if let Some(errno) = self.add {
            return Err(errno);
        }
        let path = std::fs::read_link(format!("/proc/self/fd/{}", parent.as_raw_fd()))
            .map_err(|_| Errno::EBADF)?;
        self.rules.borrow_mut().push((path, allowed));
        Ok(())
    }

    fn restrict_self(&self, _ruleset: BorrowedFd<'_>) -> Result<(), Errno> {
        match self.restrict {
            Restrict::Allow => Ok(()),
            Restrict::Fail(errno) => Err(errno),
            Restrict::Kill => {
                let _ = raise(Signal::SIGKILL);
                Err(Errno::EINTR)
            }
            Restrict::Stall(delay) => {
                std::thread::sleep(delay);
                Ok(())
            }
        }
    }

    fn set_no_new_privs(&self) -> Result<(), Errno> {
        match self.no_new_privs {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }
}

/// Number of descriptors open in the calling process.
pub fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd")
        .map(|dir| dir.count())
        .unwrap_or(0)
}

/// Run `f` in a forked single-threaded child and return its exit code.
///
/// Used for assertions that parallel test threads would disturb, such as
/// counting open descriptors.
pub fn in_child<F: FnOnce() -> bool>(f: F) -> i32 {
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};

    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            let ok = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).unwrap_or(false);
            unsafe { libc::_exit(if ok { 0 } else { 1 }) };
        }
        ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid") {
            WaitStatus::Exited(_, code) => code,
            other => panic!("child ended abnormally: {other:?}"),
        },
    }
}
