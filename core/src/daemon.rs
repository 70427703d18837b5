//! One run of the daemon: subscriptions built from a configuration, and the
//! single-threaded loop that feeds queued events to their handlers.

use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use chrono::Local;
use log::{debug, info, warn};

use crate::cli::Options;
use crate::config::Config;
use crate::config_store::ConfigStoreAdapter;
use crate::error::Result;
use crate::event::{self, Event, EventReceiver, EventSender};
use crate::fsevents::FsAdapter;
use crate::handler::HandlerRegistry;
use crate::platform::{EventPlatform, Registration};
use crate::plugins::Catalog;
use crate::shell::ShellSettings;
use crate::signals::Signals;
use crate::supervisor::{GuardKind, RestartGuard, RestartReason};
use crate::workspace::WorkspaceAdapter;

/// Upper bound on one wait for events; a heartbeat is logged at this rate.
pub const TICK: Duration = Duration::from_secs(2);

/// Longest stretch spent inside a native run loop before the queue is drained.
const PUMP_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Exit,
    Restart(RestartReason),
}

pub struct Daemon {
    // Native subscriptions go first so they are torn down before the adapters.
    registrations: Vec<Registration>,
    workspace: Option<WorkspaceAdapter>,
    config_store: Option<ConfigStoreAdapter>,
    fs: FsAdapter,
    // Keeps the queue open while no native source holds a sender.
    _tx: EventSender,
    rx: EventReceiver,
    last_tick: Instant,
}

impl Daemon {
    /// Resolve every handler and subscribe to every configured source.
    /// Nothing is delivered until [`Daemon::run`] or [`Daemon::turn`] is called.
    pub fn start(
        options: &Options,
        config: &Config,
        catalog: &Catalog,
        platform: &mut impl EventPlatform,
    ) -> Result<Self> {
        Self::start_with(options, config, catalog, platform, FsAdapter::new())
    }

    /// Like [`Daemon::start`], using `fs` for filesystem watches.
    pub fn start_with(
        options: &Options,
        config: &Config,
        catalog: &Catalog,
        platform: &mut impl EventPlatform,
        mut fs: FsAdapter,
    ) -> Result<Self> {
        let (tx, rx) = event::channel();
        let mut registry = HandlerRegistry::new(ShellSettings {
            path: config.get_path().map(str::to_string),
        });
        catalog.register(&mut registry, &config.imports)?;

        let mut registrations = Vec::new();

        let workspace = match &config.workspace {
            Some(specs) => {
                let adapter = WorkspaceAdapter::new(specs, &mut registry)?;
                registrations.push(platform.watch_workspace(adapter.names(), tx.clone())?);
                adapter.log_subscriptions();
                Some(adapter)
            }
            None => None,
        };

        let config_store = match &config.config_store {
            Some(specs) => {
                let adapter =
                    ConfigStoreAdapter::new(specs, &mut registry, config.key_pattern_fallback)?;
                registrations.push(platform.watch_config_store(adapter.keys(), tx.clone())?);
                adapter.log_subscriptions();
                Some(adapter)
            }
            None => None,
        };

        if let Some(specs) = &config.fs_events {
            fs.add_specs(specs, &mut registry)?;
        }
        fs.add_guard(RestartGuard::capture(&options.config_file, GuardKind::Config)?);
        match std::env::current_exe() {
            Ok(exe) => fs.add_guard(RestartGuard::capture(&exe, GuardKind::Executable)?),
            Err(e) => warn!("Not watching our own executable for updates: {e}"),
        }
        fs.start(tx.clone())?;
        fs.log_subscriptions();

        info!("Started with {}", options.config_file.display());
        Ok(Self {
            registrations,
            workspace,
            config_store,
            fs,
            _tx: tx,
            rx,
            last_tick: Instant::now(),
        })
    }

    /// Loop until a signal or a restart guard ends this run.
    pub fn run(&mut self, platform: &mut impl EventPlatform, signals: &Signals) -> Outcome {
        loop {
            if let Some(outcome) = self.turn(platform, signals) {
                return outcome;
            }
        }
    }

    /// Wait for events at most until the next tick or coalescing deadline,
    /// then dispatch everything queued.
    pub fn turn(&mut self, platform: &mut impl EventPlatform, signals: &Signals) -> Option<Outcome> {
        if let Some(outcome) = signals.poll() {
            return Some(outcome);
        }

        let next_tick = self.last_tick + TICK;
        let deadline = self
            .fs
            .deadline()
            .map_or(next_tick, |pending| pending.min(next_tick));
        let wait = deadline.saturating_duration_since(Instant::now());

        if !platform.pump(wait.min(PUMP_SLICE)) {
            match self.rx.recv_timeout(wait) {
                Ok(event) => self.dispatch(event),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
            }
        }
        while let Ok(event) = self.rx.try_recv() {
            self.dispatch(event);
        }

        if let Some(reason) = self.fs.flush(Instant::now()) {
            return Some(Outcome::Restart(reason));
        }

        if self.last_tick.elapsed() >= TICK {
            debug!("Tick: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
            self.last_tick = Instant::now();
        }

        signals.poll()
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Workspace(event) => match &self.workspace {
                Some(adapter) => adapter.dispatch(event),
                None => debug!("Ignoring NSWorkspace notification {}", event.name),
            },
            Event::ConfigStore(event) => match &self.config_store {
                Some(adapter) => adapter.dispatch(event),
                None => debug!("Ignoring {} SystemConfiguration changes", event.changed.len()),
            },
            Event::Fs(event) => self.fs.record(event, Instant::now()),
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        debug!(
            "Stopping: releasing {} native subscriptions",
            self.registrations.len()
        );
    }
}
