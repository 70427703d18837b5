//! Command line handling shared by the platform binaries.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser};

use crate::error::{CrankdError, Result};
use crate::platform::{AppPaths, EventPlatform};

#[derive(Parser, Debug)]
#[command(
    name = "crankd",
    version,
    about = "Run handlers in response to workspace, configuration-store and filesystem events"
)]
pub struct Cli {
    /// Configuration file to load
    #[arg(short = 'f', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// List the events which can be monitored and exit
    #[arg(short, long)]
    pub list_events: bool,

    /// Log debugging messages; repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    pub debug: u8,
}

/// Settings derived from the command line, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct Options {
    pub config_file: PathBuf,
    /// Arguments used to re-execute ourselves, starting with the executable.
    pub argv: Vec<OsString>,
    pub debug: u8,
    pub list_events: bool,
}

impl Options {
    pub fn from_cli(cli: Cli, paths: &impl AppPaths) -> Result<Self> {
        let config_file = match cli.config {
            Some(path) => path,
            None => paths.config_path(is_privileged()),
        };
        let config_file = std::path::absolute(&config_file).map_err(|e| {
            CrankdError::config(format!("invalid configuration path {}: {e}", config_file.display()))
        })?;

        let exe = std::env::current_exe()
            .and_then(|exe| exe.canonicalize())
            .map_err(|e| CrankdError::Platform(format!("unable to locate our executable: {e}")))?;

        Ok(Self {
            argv: restart_argv(&exe, cli.debug, &config_file),
            config_file,
            debug: cli.debug,
            list_events: cli.list_events,
        })
    }
}

/// `[exe, --debug..., --config <file>]`.
pub fn restart_argv(exe: &Path, debug: u8, config_file: &Path) -> Vec<OsString> {
    let mut argv = vec![exe.as_os_str().to_owned()];
    argv.extend((0..debug).map(|_| OsString::from("--debug")));
    argv.push("--config".into());
    argv.push(config_file.as_os_str().to_owned());
    argv
}

pub fn is_privileged() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Print what can be subscribed to on this machine.
pub fn list_events(platform: &mut impl EventPlatform, out: &mut impl Write) -> Result<()> {
    let write_err = |e: std::io::Error| CrankdError::Platform(format!("unable to write: {e}"));
    let mut listed = false;

    match platform.config_store_keys() {
        Ok(mut keys) => {
            keys.sort();
            writeln!(out, "SystemConfiguration keys:").map_err(write_err)?;
            for key in keys {
                writeln!(out, "\t{key}").map_err(write_err)?;
            }
            listed = true;
        }
        Err(CrankdError::Unsupported(_)) => {}
        Err(e) => return Err(e),
    }

    let notifications = platform.workspace_notifications();
    if !notifications.is_empty() {
        if listed {
            writeln!(out).map_err(write_err)?;
        }
        writeln!(out, "Standard NSWorkspace Notification messages:").map_err(write_err)?;
        for name in notifications {
            writeln!(out, "\t{name}").map_err(write_err)?;
        }
        listed = true;
    }

    if !listed {
        writeln!(
            out,
            "No native event sources on this platform; only FSEvents entries can be configured."
        )
        .map_err(write_err)?;
    }
    Ok(())
}
