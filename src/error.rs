//! Error type shared by the stressor modules.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("landlock_create_ruleset failed: {errno} (handled_access_fs = {handled:#x})")]
    CreateRuleset { handled: u64, errno: Errno },

    #[error("failed to open {}: {source}", path.display())]
    OpenPath { path: PathBuf, source: io::Error },

    #[error("landlock_add_rule failed: {0}")]
    AddRule(Errno),

    #[error("landlock_restrict_self failed: {0}")]
    RestrictSelf(Errno),

    #[error("prctl(PR_SET_NO_NEW_PRIVS) failed: {0}")]
    NoNewPrivs(Errno),

    #[error("fork failed: {0}")]
    Fork(Errno),

    #[error("waitpid failed: {0}")]
    Wait(Errno),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
