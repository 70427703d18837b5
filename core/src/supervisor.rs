//! Restart-on-change supervision.
//!
//! A [`RestartGuard`] remembers a file's modification time at startup. The
//! filesystem adapter checks it whenever something changes next to the file;
//! any difference, or any error while looking, asks for a restart.
//!
//! [`run`] is the outer loop: each pass builds a fresh [`Daemon`] from the
//! configuration file, runs it, and tears it down completely before the next
//! pass, so handlers never mix bindings from two configurations.

use std::fmt;
use std::fs;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use log::info;

use crate::cli::Options;
use crate::config::Config;
use crate::daemon::{Daemon, Outcome};
use crate::error::{CrankdError, Result};
use crate::platform::EventPlatform;
use crate::plugins::Catalog;
use crate::signals::Signals;

/// What a guarded file is, which decides how a change is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    /// Re-read in process.
    Config,
    /// The running executable; only a fresh process image picks it up.
    Executable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    Changed { path: PathBuf, kind: GuardKind },
    CheckFailed { path: PathBuf, error: String },
    Hangup,
}

impl RestartReason {
    /// Whether the process image has to be replaced to apply the change.
    pub fn needs_exec(&self) -> bool {
        matches!(
            self,
            RestartReason::Changed {
                kind: GuardKind::Executable,
                ..
            }
        )
    }
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::Changed {
                path,
                kind: GuardKind::Config,
            } => write!(f, "Configuration file {} changed", path.display()),
            RestartReason::Changed {
                path,
                kind: GuardKind::Executable,
            } => write!(f, "{} was updated", path.display()),
            RestartReason::CheckFailed { path, error } => {
                write!(f, "Exception while checking {}: {error}", path.display())
            }
            RestartReason::Hangup => write!(f, "SIGHUP received"),
        }
    }
}

/// A (path, modification time) baseline captured at startup.
#[derive(Debug, Clone)]
pub struct RestartGuard {
    path: PathBuf,
    modified: SystemTime,
    kind: GuardKind,
}

impl RestartGuard {
    /// Capture the current mtime of `path`, or of its nearest existing
    /// ancestor if the file itself is missing.
    pub fn capture(path: &Path, kind: GuardKind) -> Result<Self> {
        let mut path = path.to_path_buf();
        while !path.exists() {
            match path.parent() {
                Some(parent) => path = parent.to_path_buf(),
                None => break,
            }
        }
        let path = fs::canonicalize(&path).unwrap_or(path);

        let modified = modified(&path).map_err(|e| {
            CrankdError::Platform(format!("unable to stat {}: {e}", path.display()))
        })?;
        Ok(Self {
            path,
            modified,
            kind,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` while the file is unchanged.
    pub fn check(&self) -> Option<RestartReason> {
        match modified(&self.path) {
            Ok(current) if current == self.modified => None,
            Ok(_) => Some(RestartReason::Changed {
                path: self.path.clone(),
                kind: self.kind,
            }),
            Err(e) => Some(RestartReason::CheckFailed {
                path: self.path.clone(),
                error: e.to_string(),
            }),
        }
    }
}

fn modified(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// Run daemons until an interrupt arrives. Only returns early with an error.
pub fn run<P: EventPlatform>(
    options: &Options,
    catalog: &Catalog,
    platform: &mut P,
    signals: &Signals,
    example: impl Fn() -> Config,
) -> Result<()> {
    loop {
        let config = Config::load_or_init(&options.config_file, &example)?;
        let mut daemon = Daemon::start(options, &config, catalog, platform)?;

        match daemon.run(platform, signals) {
            Outcome::Exit => {
                info!("Interrupt received, exiting");
                return Ok(());
            }
            Outcome::Restart(reason) => {
                info!("Restarting: {reason}");
                drop(daemon);
                if reason.needs_exec() {
                    return Err(exec(options));
                }
            }
        }
    }
}

/// Replace the process image with a fresh copy of ourselves. Only returns on failure.
fn exec(options: &Options) -> CrankdError {
    let Some((program, args)) = options.argv.split_first() else {
        return CrankdError::Restart(io::Error::new(io::ErrorKind::InvalidInput, "empty argv"));
    };
    CrankdError::Restart(Command::new(program).args(args).exec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn touch(path: &Path, offset: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(offset))
            .unwrap();
    }

    #[test]
    fn unchanged_file_does_not_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crankd.toml");
        fs::write(&path, "").unwrap();

        let guard = RestartGuard::capture(&path, GuardKind::Config).unwrap();
        assert_eq!(guard.check(), None);
        assert_eq!(guard.check(), None);
    }

    #[test]
    fn changed_mtime_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crankd.toml");
        fs::write(&path, "").unwrap();

        let guard = RestartGuard::capture(&path, GuardKind::Config).unwrap();
        touch(&path, 60);

        match guard.check() {
            Some(RestartReason::Changed { kind, .. }) => assert_eq!(kind, GuardKind::Config),
            other => panic!("expected a change, got {other:?}"),
        }
    }

    #[test]
    fn vanished_file_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crankd.toml");
        fs::write(&path, "").unwrap();

        let guard = RestartGuard::capture(&path, GuardKind::Executable).unwrap();
        fs::remove_file(&path).unwrap();

        assert!(matches!(
            guard.check(),
            Some(RestartReason::CheckFailed { .. })
        ));
    }

    #[test]
    fn missing_file_guards_its_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-yet").join("crankd.toml");

        let guard = RestartGuard::capture(&path, GuardKind::Config).unwrap();
        assert_eq!(guard.path(), fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn only_executable_changes_need_exec() {
        let changed = |kind| RestartReason::Changed {
            path: PathBuf::from("/x"),
            kind,
        };
        assert!(changed(GuardKind::Executable).needs_exec());
        assert!(!changed(GuardKind::Config).needs_exec());
        assert!(!RestartReason::Hangup.needs_exec());
    }
}
