//! crankd for macOS.
//!
//! Runs handlers for NSWorkspace notifications, SystemConfiguration key
//! changes and filesystem events, as configured in `crankd.toml`.

#[cfg(target_os = "macos")]
mod dynamic_store;
#[cfg(target_os = "macos")]
mod logger;
#[cfg(target_os = "macos")]
mod paths;
#[cfg(target_os = "macos")]
mod platform;
#[cfg(target_os = "macos")]
mod workspace;

use std::process::ExitCode;

#[cfg(target_os = "macos")]
fn main() -> ExitCode {
    use clap::Parser;
    use crankd_core::cli::Cli;
    use crankd_core::logging;
    use log::error;

    let cli = Cli::parse();
    if let Err(e) = logger::init_logger(logging::level_for(cli.debug)) {
        eprintln!("crankd: unable to set up logging: {e}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(target_os = "macos")]
fn run(cli: crankd_core::cli::Cli) -> crankd_core::Result<()> {
    use std::io;

    use crankd_core::cli::{self, Options};
    use crankd_core::config::Config;
    use crankd_core::plugins::Catalog;
    use crankd_core::signals::Signals;
    use crankd_core::{CrankdError, supervisor};
    use log::info;
    use objc2::MainThreadMarker;

    use crate::paths::MacPaths;
    use crate::platform::MacPlatform;

    let options = Options::from_cli(cli, &MacPaths)?;
    let mtm = MainThreadMarker::new()
        .ok_or_else(|| CrankdError::Platform("crankd must run on the main thread".into()))?;
    let mut platform = MacPlatform::new(mtm);

    if options.list_events {
        return cli::list_events(&mut platform, &mut io::stdout().lock());
    }

    let signals = Signals::install()?;
    info!("starting crankd, pid {}", std::process::id());

    supervisor::run(&options, &Catalog::new(), &mut platform, &signals, || {
        Config::example(true, true)
    })
}

#[cfg(not(target_os = "macos"))]
fn main() -> ExitCode {
    eprintln!("this crankd build only runs on macOS; use crankd-linux on other systems");
    ExitCode::FAILURE
}
