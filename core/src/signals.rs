//! Process signals the daemon reacts to.
//!
//! Ctrl-C / SIGINT / SIGTERM stop the daemon; SIGHUP restarts it in process.
//! Handlers only flip flags; the dispatch loop polls them once per turn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::daemon::Outcome;
use crate::error::{CrankdError, Result};
use crate::supervisor::RestartReason;

static INSTALLED: OnceLock<Signals> = OnceLock::new();
static HANGUP: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[derive(Debug, Clone, Default)]
pub struct Signals {
    interrupted: Arc<AtomicBool>,
    hangup: Arc<AtomicBool>,
}

impl Signals {
    /// Flags that nothing but the caller sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the process-wide handlers. Later calls return the same flags.
    pub fn install() -> Result<Self> {
        if let Some(signals) = INSTALLED.get() {
            return Ok(signals.clone());
        }

        let signals = Self::new();
        let interrupted = signals.interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst)).map_err(|e| {
            CrankdError::Platform(format!("unable to install the interrupt handler: {e}"))
        })?;

        let _ = HANGUP.set(signals.hangup.clone());
        let handler = on_hangup as extern "C" fn(libc::c_int);
        // SAFETY: the handler only performs an atomic store.
        let previous = unsafe { libc::signal(libc::SIGHUP, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(CrankdError::Platform(format!(
                "unable to install the SIGHUP handler: {}",
                std::io::Error::last_os_error()
            )));
        }

        Ok(INSTALLED.get_or_init(|| signals).clone())
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn hangup(&self) {
        self.hangup.store(true, Ordering::SeqCst);
    }

    /// What the dispatch loop should do because of a pending signal.
    /// A hangup is consumed; an interrupt stays set.
    pub fn poll(&self) -> Option<Outcome> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Some(Outcome::Exit);
        }
        if self.hangup.swap(false, Ordering::SeqCst) {
            return Some(Outcome::Restart(RestartReason::Hangup));
        }
        None
    }
}

extern "C" fn on_hangup(_: libc::c_int) {
    if let Some(flag) = HANGUP.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_until_signalled() {
        let signals = Signals::new();
        assert_eq!(signals.poll(), None);
    }

    #[test]
    fn hangup_restarts_once() {
        let signals = Signals::new();
        signals.hangup();
        assert_eq!(
            signals.poll(),
            Some(Outcome::Restart(RestartReason::Hangup))
        );
        assert_eq!(signals.poll(), None);
    }

    #[test]
    fn interrupt_wins_and_sticks() {
        let signals = Signals::new();
        signals.hangup();
        signals.interrupt();
        assert_eq!(signals.poll(), Some(Outcome::Exit));
        assert_eq!(signals.poll(), Some(Outcome::Exit));
    }
}
