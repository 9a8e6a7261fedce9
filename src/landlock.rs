//! Raw landlock syscall shim.
//!
//! Issues landlock_create_ruleset / landlock_add_rule / landlock_restrict_self
//! by syscall number via libc::syscall(), so no library binding or kernel
//! header is needed. Kernels without the calls answer ENOSYS, which callers
//! see as an ordinary `Errno`.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;

// landlock constants
const LANDLOCK_CREATE_RULESET_VERSION: u32 = 1 << 0;
const LANDLOCK_RULE_PATH_BENEATH: u32 = 1;

/// Filesystem access rights (ABI v1).
///
/// Rights combine with `|`. The empty set is a valid value: a rule or
/// ruleset carrying no rights is something the kernel has to handle too.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFs(u64);

impl AccessFs {
    pub const NONE: Self = Self(0);
    pub const EXECUTE: Self = Self(1 << 0);
    pub const WRITE_FILE: Self = Self(1 << 1);
    pub const READ_FILE: Self = Self(1 << 2);
    pub const READ_DIR: Self = Self(1 << 3);
    pub const REMOVE_DIR: Self = Self(1 << 4);
    pub const REMOVE_FILE: Self = Self(1 << 5);
    pub const MAKE_CHAR: Self = Self(1 << 6);
    pub const MAKE_DIR: Self = Self(1 << 7);
    pub const MAKE_REG: Self = Self(1 << 8);
    pub const MAKE_SOCK: Self = Self(1 << 9);
    pub const MAKE_FIFO: Self = Self(1 << 10);
    pub const MAKE_BLOCK: Self = Self(1 << 11);
    pub const MAKE_SYM: Self = Self(1 << 12);

    pub const ALL: Self = Self(
        Self::EXECUTE.0
            | Self::WRITE_FILE.0
            | Self::READ_FILE.0
            | Self::READ_DIR.0
            | Self::REMOVE_DIR.0
            | Self::REMOVE_FILE.0
            | Self::MAKE_CHAR.0
            | Self::MAKE_DIR.0
            | Self::MAKE_REG.0
            | Self::MAKE_SOCK.0
            | Self::MAKE_FIFO.0
            | Self::MAKE_BLOCK.0
            | Self::MAKE_SYM.0,
    );

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Bitwise complement over 32 bits. Trial masks are 32-bit quantities
    /// widened into the 64-bit rule field, so the upper word stays clear.
    pub const fn complement(self) -> Self {
        Self(!self.0 & u32::MAX as u64)
    }
}

impl BitOr for AccessFs {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessFs {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for AccessFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessFs({:#x})", self.0)
    }
}

impl fmt::LowerHex for AccessFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[repr(C)]
struct RulesetAttr {
    handled_access_fs: u64,
    handled_access_net: u64,
}

#[repr(C, packed)]
struct PathBeneathAttr {
    allowed_access: u64,
    parent_fd: i32,
}

/// Kernel operations the stressor drives.
///
/// `Syscalls` talks to the running kernel; tests substitute stubs to force
/// individual calls to fail.
pub trait Landlock {
    /// Query the landlock ABI version.
    fn abi_version(&self) -> Result<u32, Errno>;

    /// Create a ruleset handling `handled`. The returned fd is owned by the
    /// calling process and closes on drop.
    fn create_ruleset(&self, handled: AccessFs) -> Result<OwnedFd, Errno>;

    /// Bind `allowed` to the location referenced by `parent`.
    fn add_path_rule(
        &self,
        ruleset: BorrowedFd<'_>,
        parent: BorrowedFd<'_>,
        allowed: AccessFs,
    ) -> Result<(), Errno>;

    /// Irrevocably apply `ruleset` to the calling process.
    fn restrict_self(&self, ruleset: BorrowedFd<'_>) -> Result<(), Errno>;

    /// prctl(PR_SET_NO_NEW_PRIVS, 1). Required before an unprivileged
    /// restrict_self.
    fn set_no_new_privs(&self) -> Result<(), Errno>;
}

/// The real kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct Syscalls;

impl Landlock for Syscalls {
    fn abi_version(&self) -> Result<u32, Errno> {
        let ret = unsafe {
            libc::syscall(
                libc::SYS_landlock_create_ruleset,
                std::ptr::null::<RulesetAttr>(),
                0usize,
                LANDLOCK_CREATE_RULESET_VERSION,
            )
        };
        Errno::result(ret).map(|v| v as u32)
    }

    fn create_ruleset(&self, handled: AccessFs) -> Result<OwnedFd, Errno> {
        let attr = RulesetAttr {
            handled_access_fs: handled.bits(),
            handled_access_net: 0,
        };

        let ret = unsafe {
            libc::syscall(
                libc::SYS_landlock_create_ruleset,
                &attr as *const RulesetAttr,
                std::mem::size_of::<RulesetAttr>(),
                0u32,
            )
        };
        let fd = Errno::result(ret)?;
        // SAFETY: on success the kernel hands back a fresh descriptor we own.
        Ok(unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
    }

    fn add_path_rule(
        &self,
        ruleset: BorrowedFd<'_>,
        parent: BorrowedFd<'_>,
        allowed: AccessFs,
    ) -> Result<(), Errno> {
        let rule = PathBeneathAttr {
            allowed_access: allowed.bits(),
            parent_fd: parent.as_raw_fd(),
        };

        let ret = unsafe {
            libc::syscall(
                libc::SYS_landlock_add_rule,
                ruleset.as_raw_fd(),
                LANDLOCK_RULE_PATH_BENEATH,
                &rule as *const PathBeneathAttr,
                0u32,
            )
        };
        Errno::result(ret).map(drop)
    }

    fn restrict_self(&self, ruleset: BorrowedFd<'_>) -> Result<(), Errno> {
        let ret = unsafe {
            libc::syscall(libc::SYS_landlock_restrict_self, ruleset.as_raw_fd(), 0u32)
        };
        Errno::result(ret).map(drop)
    }

    fn set_no_new_privs(&self) -> Result<(), Errno> {
        let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
        Errno::result(ret).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_covers_thirteen_abi_v1_rights() {
        assert_eq!(AccessFs::ALL.bits(), 0x1fff);
        assert_eq!(AccessFs::ALL.bits().count_ones(), 13);
    }

    #[test]
    fn complement_stays_within_32_bits() {
        assert_eq!(AccessFs::ALL.complement().bits(), 0xffff_e000);
        assert_eq!(AccessFs::NONE.complement().bits(), 0xffff_ffff);
        assert_eq!(AccessFs::ALL.complement().complement(), AccessFs::ALL);
    }

    #[test]
    fn rights_combine_with_or() {
        let mut access = AccessFs::NONE;
        assert_eq!(access.bits(), 0);
        access |= AccessFs::READ_FILE;
        access |= AccessFs::WRITE_FILE;
        assert_eq!(access, AccessFs::READ_FILE | AccessFs::WRITE_FILE);
        assert_eq!(format!("{access:?}"), "AccessFs(0x6)");
        assert_eq!(format!("{access:#x}"), "0x6");
    }

    #[test]
    fn abi_query_does_not_panic() {
        // Either a version or an errno, depending on the host kernel.
        match Syscalls.abi_version() {
            Ok(v) => assert!(v >= 1),
            Err(errno) => assert_ne!(errno, Errno::UnknownErrno),
        }
    }

    #[test]
    fn path_beneath_attr_matches_kernel_layout() {
        assert_eq!(std::mem::size_of::<PathBeneathAttr>(), 12);
        assert_eq!(std::mem::size_of::<RulesetAttr>(), 16);
    }
}
