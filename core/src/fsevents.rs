//! Filesystem change adapter.
//!
//! Watches are kept per canonical directory. A change is reported at the
//! granularity of its containing directory and fires every registration whose
//! directory is a prefix of it. Raw events are held for a short coalescing
//! window so an editor save or a burst of writes runs each handler once.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{Level, debug, error, info, warn};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::EventSpec;
use crate::error::{CrankdError, Result};
use crate::event::{Event, EventSender, FsEvent};
use crate::handler::{Callback, HandlerRegistry, Payload};
use crate::logging::log_list;
use crate::supervisor::{RestartGuard, RestartReason};

/// How long raw events are collected before handlers run.
pub const LATENCY: Duration = Duration::from_secs(1);

/// Expand a leading `~`, resolve symlinks, and fall back to the containing
/// directory when `path` is not a directory.
pub fn canonical_watch_dir(path: &str) -> Result<PathBuf> {
    let expanded = expand_home(path);
    let canonical = fs::canonicalize(&expanded).map_err(|e| {
        CrankdError::config(format!(
            "Cannot add an FSEvent notification: {} does not exist! ({e})",
            expanded.display()
        ))
    })?;

    if canonical.is_dir() {
        return Ok(canonical);
    }
    canonical.parent().map(Path::to_path_buf).ok_or_else(|| {
        CrankdError::config(format!("{} has no containing directory", canonical.display()))
    })
}

fn expand_home(path: &str) -> PathBuf {
    let home = dirs::home_dir();
    match (path, home) {
        ("~", Some(home)) => home,
        (p, Some(home)) if p.starts_with("~/") => home.join(&p[2..]),
        (p, _) => PathBuf::from(p),
    }
}

/// What to do when a watched directory changes.
#[derive(Debug)]
pub enum WatchAction {
    Handler(Callback),
    Guard(RestartGuard),
}

/// Canonical directory -> actions registered on it, in registration order.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    watches: BTreeMap<PathBuf, Vec<WatchAction>>,
}

impl WatchRegistry {
    pub fn add(&mut self, dir: PathBuf, action: WatchAction) {
        self.watches.entry(dir).or_default().push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.watches.keys()
    }

    /// Registered directories that do not sit inside another registered one.
    /// A recursive watch on each of these covers everything.
    pub fn roots(&self) -> Vec<&PathBuf> {
        let mut roots: Vec<&PathBuf> = Vec::new();
        // BTreeMap order puts every ancestor before its descendants.
        for dir in self.watches.keys() {
            if !roots.iter().any(|root| dir.starts_with(root)) {
                roots.push(dir);
            }
        }
        roots
    }

    /// Registrations whose directory is `changed` or one of its ancestors.
    pub fn matching<'a>(
        &'a self,
        changed: &'a Path,
    ) -> impl Iterator<Item = (&'a PathBuf, &'a [WatchAction])> + 'a {
        self.watches
            .iter()
            .filter(move |(dir, _)| changed.starts_with(dir))
            .map(|(dir, actions)| (dir, actions.as_slice()))
    }
}

/// Collects changed directories for one coalescing window.
#[derive(Debug)]
pub struct Coalescer {
    window: Duration,
    opened: Option<Instant>,
    pending: BTreeMap<PathBuf, bool>,
}

impl Coalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            opened: None,
            pending: BTreeMap::new(),
        }
    }

    /// Note that `dir` changed. `rescan` sticks once set for a directory.
    pub fn record(&mut self, dir: PathBuf, rescan: bool, now: Instant) {
        *self.pending.entry(dir).or_insert(false) |= rescan;
        self.opened.get_or_insert(now);
    }

    /// When the current window closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened.map(|opened| opened + self.window)
    }

    /// Take the pending directories once the window has closed.
    pub fn take_ready(&mut self, now: Instant) -> Option<BTreeMap<PathBuf, bool>> {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.opened = None;
                Some(std::mem::take(&mut self.pending))
            }
            _ => None,
        }
    }
}

/// One firing of a registration for a flushed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub registered: PathBuf,
    pub changed: PathBuf,
    pub recursive: bool,
}

/// Fold a batch into at most one firing per registration. Several matching
/// directories collapse into their common ancestor and count as recursive.
pub fn plan(registry: &WatchRegistry, batch: &BTreeMap<PathBuf, bool>) -> Vec<Firing> {
    let mut firings: BTreeMap<&PathBuf, (PathBuf, bool)> = BTreeMap::new();
    for (changed, rescan) in batch {
        for (registered, _) in registry.matching(changed) {
            firings
                .entry(registered)
                .and_modify(|(folded, recursive)| {
                    *folded = common_ancestor(folded, changed);
                    *recursive = true;
                })
                .or_insert_with(|| (changed.clone(), *rescan));
        }
    }

    firings
        .into_iter()
        .map(|(registered, (changed, recursive))| Firing {
            registered: registered.clone(),
            changed,
            recursive,
        })
        .collect()
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

pub struct FsAdapter {
    registry: WatchRegistry,
    coalescer: Coalescer,
    watcher: Option<RecommendedWatcher>,
}

impl FsAdapter {
    pub fn new() -> Self {
        Self::with_latency(LATENCY)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            registry: WatchRegistry::default(),
            coalescer: Coalescer::new(latency),
            watcher: None,
        }
    }

    /// Resolve and register every `FSEvents` entry.
    pub fn add_specs(&mut self, specs: &[EventSpec], registry: &mut HandlerRegistry) -> Result<()> {
        for spec in specs {
            let dir = canonical_watch_dir(&spec.name)?;
            let callback = registry.resolve(&spec.name, spec, &format!("FSEvent: {}", spec.name))?;
            debug!("Watching {} for {}", dir.display(), spec.name);
            self.registry.add(dir, WatchAction::Handler(callback));
        }
        Ok(())
    }

    /// Restart when `guard`'s file changes.
    pub fn add_guard(&mut self, guard: RestartGuard) {
        let dir = if guard.path().is_dir() {
            guard.path().to_path_buf()
        } else {
            guard
                .path()
                .parent()
                .map_or_else(|| guard.path().to_path_buf(), Path::to_path_buf)
        };
        self.registry.add(dir, WatchAction::Guard(guard));
    }

    /// Create the watch stream for every registered directory.
    pub fn start(&mut self, tx: EventSender) -> Result<()> {
        if self.registry.is_empty() {
            return Ok(());
        }

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            forward(&tx, res)
        })?;

        let roots = self.registry.roots();
        for root in &roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
        }
        info!(
            "Filesystem watch started for {} paths in {} trees",
            self.registry.watches.len(),
            roots.len()
        );

        self.watcher = Some(watcher);
        Ok(())
    }

    pub fn log_subscriptions(&self) {
        let dirs: Vec<String> = self
            .registry
            .dirs()
            .map(|dir| dir.display().to_string())
            .collect();
        log_list(Level::Info, "Watching these paths for changes: ", &dirs);
    }

    /// Record a raw event from the backend.
    pub fn record(&mut self, event: FsEvent, now: Instant) {
        if event.paths.is_empty() && event.rescan {
            // Nothing says where events were lost, so every registration,
            // nested ones and guards included, has to look again.
            for dir in self.registry.dirs() {
                self.coalescer.record(dir.clone(), true, now);
            }
            return;
        }

        for path in event.paths {
            // A rescan names the directory that has to be walked again.
            let dir = if event.rescan && path.is_dir() {
                path
            } else {
                path.parent().map_or_else(|| path.clone(), Path::to_path_buf)
            };
            self.coalescer.record(dir, event.rescan, now);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.coalescer.deadline()
    }

    /// Run handlers for a closed window. Returns a restart request as soon as a
    /// guard trips; remaining handlers of the batch are skipped.
    pub fn flush(&mut self, now: Instant) -> Option<RestartReason> {
        let batch = self.coalescer.take_ready(now)?;

        for firing in plan(&self.registry, &batch) {
            let actions = self
                .registry
                .watches
                .get(&firing.registered)
                .map(Vec::as_slice)
                .unwrap_or_default();
            debug!(
                "FSEvent: {}: processing {} callback(s) for path {}",
                firing.registered.display(),
                actions.len(),
                firing.changed.display()
            );

            let payload = Payload::Fs {
                path: firing.changed.clone(),
                recursive: firing.recursive,
            };
            for action in actions {
                match action {
                    WatchAction::Handler(callback) => {
                        if let Err(e) = callback.invoke(&payload) {
                            error!("{}: handler failed: {e}", callback.context());
                        }
                    }
                    WatchAction::Guard(guard) => {
                        if let Some(reason) = guard.check() {
                            return Some(reason);
                        }
                    }
                }
            }
        }
        None
    }
}

/// Queue one backend notification for the dispatcher.
fn forward(tx: &EventSender, res: notify::Result<notify::Event>) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!("Filesystem watch error: {e}");
            return;
        }
    };
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }

    let rescan = event.need_rescan();
    if rescan {
        error!("Filesystem events were dropped; treating watched trees as dirty");
    }
    let event = Event::Fs(FsEvent {
        paths: event.paths,
        rescan,
    });
    if tx.send(event).is_err() {
        warn!("Dropping filesystem event: dispatcher is gone");
    }
}

impl Default for FsAdapter {
    fn default() -> Self {
        Self::new()
    }
}
