// src/platform.rs
//
// Native event sources for the dispatch core, driven from the main run loop.

use std::time::Duration;

use core_foundation::runloop::{CFRunLoop, CFRunLoopRunResult, kCFRunLoopDefaultMode};
use crankd_core::Result;
use crankd_core::event::EventSender;
use crankd_core::platform::{EventPlatform, Registration};
use crankd_core::workspace::STANDARD_NOTIFICATIONS;
use objc2::MainThreadMarker;

use crate::dynamic_store::{self, ConfigStoreSession};
use crate::workspace;

pub struct MacPlatform {
    mtm: MainThreadMarker,
}

impl MacPlatform {
    /// Workspace observers are main-thread only, so this is too.
    pub fn new(mtm: MainThreadMarker) -> Self {
        Self { mtm }
    }
}

impl EventPlatform for MacPlatform {
    fn watch_workspace(&mut self, names: &[String], tx: EventSender) -> Result<Registration> {
        Ok(Box::new(workspace::subscribe(names, tx, self.mtm)))
    }

    fn watch_config_store(&mut self, keys: &[String], tx: EventSender) -> Result<Registration> {
        Ok(Box::new(ConfigStoreSession::watch(keys, tx)?))
    }

    fn config_store_keys(&mut self) -> Result<Vec<String>> {
        dynamic_store::key_list()
    }

    fn workspace_notifications(&self) -> &'static [&'static str] {
        STANDARD_NOTIFICATIONS
    }

    fn pump(&mut self, max_wait: Duration) -> bool {
        // SAFETY: kCFRunLoopDefaultMode is a constant CFString.
        let mode = unsafe { kCFRunLoopDefaultMode };
        // With no sources scheduled the run loop returns at once; let the
        // dispatcher block on its queue instead of spinning.
        !matches!(
            CFRunLoop::run_in_mode(mode, max_wait, true),
            CFRunLoopRunResult::Finished
        )
    }
}
