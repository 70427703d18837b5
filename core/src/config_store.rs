//! Configuration-store change adapter (SystemConfiguration dynamic store).
//!
//! The store may report a child key rather than the exact key that was
//! registered. With `key_pattern_fallback` on, a changed key without an exact
//! handler is retried against every registered key used as a regex anchored
//! at the start, the way the store itself interprets notification patterns.

use std::collections::HashMap;

use log::{Level, debug, error, warn};
use regex::Regex;

use crate::config::EventSpec;
use crate::error::Result;
use crate::event::{ChangedKey, ConfigStoreEvent};
use crate::handler::{Callback, HandlerRegistry, Payload};
use crate::logging::log_list;

pub struct ConfigStoreAdapter {
    keys: Vec<String>,
    handlers: Vec<Callback>,
    exact: HashMap<String, usize>,
    /// Present only when the fallback is enabled.
    patterns: Option<Vec<(Regex, usize)>>,
}

impl ConfigStoreAdapter {
    /// Resolve every key before anything is registered with the store.
    pub fn new(
        specs: &[EventSpec],
        registry: &mut HandlerRegistry,
        key_pattern_fallback: bool,
    ) -> Result<Self> {
        let mut keys = Vec::with_capacity(specs.len());
        let mut handlers = Vec::with_capacity(specs.len());
        let mut exact = HashMap::with_capacity(specs.len());

        for spec in specs {
            let context = format!("SystemConfiguration: {}", spec.name);
            let callback = registry.resolve(&spec.name, spec, &context)?;
            exact.insert(spec.name.clone(), handlers.len());
            keys.push(spec.name.clone());
            handlers.push(callback);
        }

        if !key_pattern_fallback {
            for key in keys.iter().filter(|key| looks_like_pattern(key)) {
                warn!(
                    "{key} looks like a pattern; changes the store reports for keys it matches \
                     are dropped unless key_pattern_fallback is enabled"
                );
            }
        }

        let patterns = key_pattern_fallback.then(|| {
            keys.iter()
                .enumerate()
                .filter_map(|(index, key)| match Regex::new(&format!("^(?:{key})")) {
                    Ok(re) => Some((re, index)),
                    Err(e) => {
                        warn!("{key} is not usable as a key pattern: {e}");
                        None
                    }
                })
                .collect()
        });

        Ok(Self {
            keys,
            handlers,
            exact,
            patterns,
        })
    }

    /// Keys to register with the store, in configuration order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn log_subscriptions(&self) {
        log_list(
            Level::Info,
            "Listening for these SystemConfiguration events: ",
            &self.keys,
        );
    }

    /// Callbacks that should run for `key`.
    pub fn matching(&self, key: &str) -> Vec<&Callback> {
        if let Some(&index) = self.exact.get(key) {
            return vec![&self.handlers[index]];
        }

        match &self.patterns {
            Some(patterns) => patterns
                .iter()
                .filter(|(re, _)| re.is_match(key))
                .map(|(_, index)| &self.handlers[*index])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Run handlers for every key in the batch, in the store's order.
    pub fn dispatch(&self, event: ConfigStoreEvent) {
        for ChangedKey { key, info } in event.changed {
            let callbacks = self.matching(&key);
            if callbacks.is_empty() {
                debug!("No handler for SystemConfiguration key {key}");
                continue;
            }

            let payload = Payload::ConfigStore { key, info };
            for callback in callbacks {
                if let Err(e) = callback.invoke(&payload) {
                    error!("{}: handler failed: {e}", callback.context());
                }
            }
        }
    }
}

/// Whether the store would match `key` against anything but itself.
fn looks_like_pattern(key: &str) -> bool {
    key.contains(['\\', '.', '+', '*', '?', '(', ')', '|', '[', ']', '{', '}', '^', '$'])
}
