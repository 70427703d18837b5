//! Events delivered by the native sources to the dispatch loop.
//!
//! Platform callbacks (Cocoa observers, SCDynamicStore callouts, the `notify`
//! backend thread) never call handlers directly. They push one of these onto
//! the queue and the dispatch loop invokes handlers on its own thread.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc;

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Workspace(WorkspaceEvent),
    ConfigStore(ConfigStoreEvent),
    Fs(FsEvent),
}

/// A desktop-session notification such as `NSWorkspaceDidWakeNotification`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceEvent {
    pub name: String,
    /// The notification's user-info dictionary, values rendered as strings.
    pub user_info: BTreeMap<String, String>,
}

/// One batch of configuration-store keys that changed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStoreEvent {
    pub changed: Vec<ChangedKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedKey {
    pub key: String,
    /// Description of the key's current value, if the store has one.
    pub info: Option<String>,
}

/// Raw filesystem change as reported by the watcher backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub paths: Vec<PathBuf>,
    /// The backend lost events (subtree rescan, user or kernel queue overflow).
    pub rescan: bool,
}

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::channel()
}
