pub mod cli;
pub mod config;
pub mod config_store;
pub mod daemon;
pub mod error;
pub mod event;
pub mod fsevents;
pub mod handler;
pub mod logging;
pub mod plugins;
pub mod shell;
pub mod signals;
pub mod supervisor;
pub mod workspace;

pub use error::{CrankdError, HandlerError, Result};

/// Interfaces that platform shells implement to plug native event sources
/// into the core without pulling platform-specific dependencies in here.
pub mod platform {
    use std::any::Any;
    use std::time::Duration;

    use crate::error::{CrankdError, Result};
    use crate::event::EventSender;

    /// Keeps a native subscription alive. Dropping it unsubscribes.
    pub type Registration = Box<dyn Any>;

    /// Trait for platform-correct config paths.
    pub trait AppPaths {
        /// Default configuration file; `privileged` is true when running as root.
        fn config_path(&self, privileged: bool) -> std::path::PathBuf;
    }

    /// Native event sources that only exist on some platforms.
    ///
    /// Every method has a default that reports the source as unavailable, so a
    /// shell only implements what its OS offers.
    pub trait EventPlatform {
        /// Subscribe to the named desktop-session notifications. Each delivery
        /// must be pushed onto `tx` as [`crate::event::Event::Workspace`].
        fn watch_workspace(&mut self, names: &[String], tx: EventSender) -> Result<Registration> {
            let _ = (names, tx);
            Err(CrankdError::Unsupported("NSWorkspace"))
        }

        /// Open a configuration-store session interested in `keys`. Changes
        /// are pushed as [`crate::event::Event::ConfigStore`].
        fn watch_config_store(&mut self, keys: &[String], tx: EventSender) -> Result<Registration> {
            let _ = (keys, tx);
            Err(CrankdError::Unsupported("SystemConfiguration"))
        }

        /// Every key currently present in the configuration store.
        fn config_store_keys(&mut self) -> Result<Vec<String>> {
            Err(CrankdError::Unsupported("SystemConfiguration"))
        }

        /// Notification names worth listing for `--list-events`.
        fn workspace_notifications(&self) -> &'static [&'static str] {
            &[]
        }

        /// Run the native run loop for at most `max_wait`.
        ///
        /// Returns `false` when the platform has no run loop to drive, in which
        /// case the dispatcher blocks on its own queue instead.
        fn pump(&mut self, max_wait: Duration) -> bool {
            let _ = max_wait;
            false
        }
    }
}
