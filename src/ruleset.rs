//! Ruleset construction.
//!
//! A `Ruleset` owns its kernel descriptor; dropping it closes the fd in the
//! process that created it. Location handles (O_PATH) live only for the
//! duration of a single add-rule call.

use std::fs::OpenOptions;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::landlock::{AccessFs, Landlock};

/// How a location handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Path,
    /// O_PATH | O_NONBLOCK, used while sweeping arbitrary trees where an
    /// entry may be a fifo or device.
    PathNonBlocking,
}

/// Open `path` as a location-only handle. No read or write access is
/// requested on the descriptor itself.
pub fn open_location(path: &Path, mode: Location) -> Result<OwnedFd> {
    let mut flags = libc::O_PATH | libc::O_CLOEXEC;
    if mode == Location::PathNonBlocking {
        flags |= libc::O_NONBLOCK;
    }

    let file = OpenOptions::new()
        .read(true)
        .custom_flags(flags)
        .open(path)
        .map_err(|source| Error::OpenPath {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(file.into())
}

#[derive(Debug)]
pub struct Ruleset {
    fd: OwnedFd,
    handled: AccessFs,
}

impl Ruleset {
    pub fn create<L: Landlock>(landlock: &L, handled: AccessFs) -> Result<Self> {
        let fd = landlock
            .create_ruleset(handled)
            .map_err(|errno| Error::CreateRuleset {
                handled: handled.bits(),
                errno,
            })?;
        Ok(Self { fd, handled })
    }

    pub fn handled(&self) -> AccessFs {
        self.handled
    }

    /// Add a path-beneath rule granting `allowed` on `path`.
    ///
    /// The location handle is closed before returning, on success and on
    /// failure alike.
    pub fn add_path<L: Landlock>(
        &self,
        landlock: &L,
        path: &Path,
        allowed: AccessFs,
        mode: Location,
    ) -> Result<()> {
        let location = open_location(path, mode)?;
        let ret = landlock.add_path_rule(self.fd.as_fd(), location.as_fd(), allowed);
        drop(location);
        ret.map_err(Error::AddRule)
    }

    pub fn restrict_self<L: Landlock>(&self, landlock: &L) -> Result<()> {
        landlock
            .restrict_self(self.fd.as_fd())
            .map_err(Error::RestrictSelf)
    }
}

impl AsFd for Ruleset {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Result of a build whose ruleset was created.
///
/// The ruleset comes back in both variants; when the rule was rejected the
/// caller still owns (and drops) the handle.
#[derive(Debug)]
pub enum Built {
    Ready(Ruleset),
    RuleRejected(Ruleset, Error),
}

/// Create a ruleset handling every right and grant `rights` beneath
/// `target`.
///
/// Handled rights are deliberately broad while the rule is narrow. `Err`
/// means the ruleset itself could not be created and no handle exists.
pub fn build<L: Landlock>(landlock: &L, rights: AccessFs, target: &Path) -> Result<Built> {
    let ruleset = Ruleset::create(landlock, AccessFs::ALL)?;
    match ruleset.add_path(landlock, target, rights, Location::Path) {
        Ok(()) => Ok(Built::Ready(ruleset)),
        Err(e) => Ok(Built::RuleRejected(ruleset, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landlock::Syscalls;
    use crate::testing::{in_child, open_fd_count, FakeLandlock};
    use nix::errno::Errno;

    #[test]
    fn create_failure_reports_handled_mask() {
        let ll = FakeLandlock::failing_create(Errno::EINVAL);
        let dir = tempfile::tempdir().unwrap();
        match build(&ll, AccessFs::READ_FILE, dir.path()) {
            Err(Error::CreateRuleset { handled, errno }) => {
                assert_eq!(handled, AccessFs::ALL.bits());
                assert_eq!(errno, Errno::EINVAL);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn ruleset_handles_full_superset_and_rule_carries_rights() {
        let ll = FakeLandlock::default();
        let dir = tempfile::tempdir().unwrap();
        let built = build(&ll, AccessFs::MAKE_DIR, dir.path()).unwrap();
        let ruleset = match built {
            Built::Ready(r) => r,
            Built::RuleRejected(_, e) => panic!("rule rejected: {e}"),
        };
        assert_eq!(ruleset.handled(), AccessFs::ALL);

        let rules = ll.rules.borrow();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].0, dir.path().canonicalize().unwrap());
        assert_eq!(rules[0].1, AccessFs::MAKE_DIR);
    }

    #[test]
    fn add_rule_failure_returns_the_ruleset() {
        let ll = FakeLandlock {
            add: Some(Errno::EINVAL),
            ..FakeLandlock::default()
        };
        let dir = tempfile::tempdir().unwrap();
        match build(&ll, AccessFs::NONE, dir.path()).unwrap() {
            Built::RuleRejected(ruleset, Error::AddRule(errno)) => {
                assert_eq!(errno, Errno::EINVAL);
                assert_eq!(ruleset.handled(), AccessFs::ALL);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn missing_target_is_rejected_not_fatal() {
        let ll = FakeLandlock::default();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        assert!(matches!(
            build(&ll, AccessFs::READ_FILE, &missing).unwrap(),
            Built::RuleRejected(_, Error::OpenPath { .. })
        ));
        assert!(ll.rules.borrow().is_empty());
    }

    #[test]
    fn builds_do_not_leak_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let code = in_child(move || {
            let fake = FakeLandlock {
                add: Some(Errno::EINVAL),
                ..FakeLandlock::default()
            };
            let before = open_fd_count();
            for _ in 0..32 {
                let _ = build(&Syscalls, AccessFs::READ_FILE, &path);
                let _ = build(&fake, AccessFs::READ_FILE, &path);
                let _ = build(&fake, AccessFs::READ_FILE, &path.join("absent"));
            }
            open_fd_count() == before
        });
        assert_eq!(code, 0);
    }
}
