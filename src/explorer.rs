//! Recursive ruleset churn over a directory tree.
//!
//! One ruleset handling every right is created per directory visited and a
//! read-file rule is added for each regular file or symlink in it. Entries
//! whose canonical path differs from the path composed during traversal
//! (symlink escapes, `..` tricks) are skipped, so rules only ever bind
//! inside the walked hierarchy.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::landlock::{AccessFs, Landlock};
use crate::process::RunBudget;
use crate::ruleset::{Location, Ruleset};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Symlink,
    Dir,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: OsString,
    pub kind: EntryKind,
}

/// Read access to a directory tree.
pub trait Tree {
    /// Entries of `dir` without `.`/`..`, sorted by name. The kind is that
    /// of the entry itself; symlinks are not followed.
    fn list(&self, dir: &Path) -> io::Result<Vec<Entry>>;

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostTree;

impl Tree for HostTree {
    fn list(&self, dir: &Path) -> io::Result<Vec<Entry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let Ok(entry) = entry else { continue };
            let kind = match entry.file_type() {
                Ok(t) if t.is_file() => EntryKind::File,
                Ok(t) if t.is_symlink() => EntryKind::Symlink,
                Ok(t) if t.is_dir() => EntryKind::Dir,
                _ => EntryKind::Other,
            };
            entries.push(Entry {
                name: entry.file_name(),
                kind,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkStats {
    pub rulesets: u64,
    pub rules: u64,
    pub skipped: u64,
}

pub struct TreeExplorer<'a, L, T> {
    landlock: &'a L,
    tree: &'a T,
    budget: &'a RunBudget,
    max_depth: u32,
}

impl<'a, L: Landlock, T: Tree> TreeExplorer<'a, L, T> {
    pub fn new(landlock: &'a L, tree: &'a T, budget: &'a RunBudget, max_depth: u32) -> Self {
        Self {
            landlock,
            tree,
            budget,
            max_depth,
        }
    }

    /// Sweep `root` repeatedly until the budget runs out. Always sweeps at
    /// least once.
    pub fn run(&self, root: &Path) -> WalkStats {
        let mut stats = WalkStats::default();
        loop {
            self.walk(root, 0, &mut stats);
            if !self.budget.keep_running() {
                break;
            }
        }
        stats
    }

    pub fn walk(&self, dir: &Path, depth: u32, stats: &mut WalkStats) {
        let ruleset = match Ruleset::create(self.landlock, AccessFs::ALL) {
            Ok(r) => r,
            Err(e) => {
                info!(error = %e, dir = %dir.display(), "explorer ruleset rejected");
                return;
            }
        };
        stats.rulesets += 1;

        let entries = match self.tree.list(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, dir = %dir.display(), "cannot list");
                return;
            }
        };

        for entry in entries {
            if !self.budget.keep_running() {
                break;
            }

            let composed = dir.join(&entry.name);
            let Ok(resolved) = self.tree.canonicalize(&composed) else {
                continue;
            };
            if resolved != composed {
                stats.skipped += 1;
                continue;
            }

            match entry.kind {
                EntryKind::File | EntryKind::Symlink => {
                    let added = ruleset.add_path(
                        self.landlock,
                        &resolved,
                        AccessFs::READ_FILE,
                        Location::PathNonBlocking,
                    );
                    if let Err(e) = added {
                        // Give up on this directory's ruleset, keep walking elsewhere
                        debug!(error = %e, path = %resolved.display(), "explorer rule rejected");
                        break;
                    }
                    stats.rules += 1;
                }
                EntryKind::Dir if depth < self.max_depth => {
                    self.walk(&resolved, depth + 1, stats);
                }
                _ => {}
            }
        }
    }
}
