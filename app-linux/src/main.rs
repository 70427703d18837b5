//! Linux shell for crankd.
//! Only filesystem watches exist here; a configuration naming workspace or
//! configuration-store events is rejected at startup.

mod paths;

use std::io;
use std::process::ExitCode;

use clap::Parser;
use crankd_core::cli::{self, Cli, Options};
use crankd_core::config::Config;
use crankd_core::platform::EventPlatform;
use crankd_core::plugins::Catalog;
use crankd_core::signals::Signals;
use crankd_core::{Result, logging, supervisor};
use log::{error, info};

use crate::paths::LinuxPaths;

/// No native sources: every event platform hook keeps its default.
struct LinuxPlatform;

impl EventPlatform for LinuxPlatform {}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(logging::level_for(cli.debug))
        .parse_default_env()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let options = Options::from_cli(cli, &LinuxPaths)?;
    let mut platform = LinuxPlatform;

    if options.list_events {
        return cli::list_events(&mut platform, &mut io::stdout().lock());
    }

    let signals = Signals::install()?;
    info!("starting crankd (linux), pid {}", std::process::id());

    supervisor::run(&options, &Catalog::new(), &mut platform, &signals, || {
        Config::example(false, false)
    })
}
