//! Workspace notification adapter.
//!
//! Binds `NSWorkspace` section entries to callbacks. The platform shell owns
//! the actual observer; it forwards each delivery as an
//! [`Event::Workspace`](crate::event::Event::Workspace).

use std::collections::HashMap;

use log::{Level, debug, error, warn};

use crate::config::{EventSpec, HandlerSpec};
use crate::error::Result;
use crate::event::WorkspaceEvent;
use crate::handler::{Callback, HandlerRegistry, Payload};
use crate::logging::log_list;

/// The notification names shown by `--list-events`.
pub const STANDARD_NOTIFICATIONS: &[&str] = &[
    "NSWorkspaceDidLaunchApplicationNotification",
    "NSWorkspaceDidMountNotification",
    "NSWorkspaceDidPerformFileOperationNotification",
    "NSWorkspaceDidTerminateApplicationNotification",
    "NSWorkspaceDidUnmountNotification",
    "NSWorkspaceDidWakeNotification",
    "NSWorkspaceSessionDidBecomeActiveNotification",
    "NSWorkspaceSessionDidResignActiveNotification",
    "NSWorkspaceWillLaunchApplicationNotification",
    "NSWorkspaceWillPowerOffNotification",
    "NSWorkspaceWillSleepNotification",
    "NSWorkspaceWillUnmountNotification",
];

/// Method a `class` handler must provide for `notification`.
pub fn handler_method(notification: &str) -> String {
    format!("on{notification}")
}

pub struct WorkspaceAdapter {
    names: Vec<String>,
    handlers: HashMap<String, Callback>,
}

impl WorkspaceAdapter {
    /// Resolve every entry; the first failure aborts the whole section.
    pub fn new(specs: &[EventSpec], registry: &mut HandlerRegistry) -> Result<Self> {
        let mut names = Vec::with_capacity(specs.len());
        let mut handlers = HashMap::with_capacity(specs.len());

        for spec in specs {
            let context = format!("NSWorkspace Notification {}", spec.name);
            let callback = match &spec.handler {
                HandlerSpec::Class(type_name) => registry.bind_method(
                    &spec.name,
                    spec,
                    &context,
                    type_name,
                    &handler_method(&spec.name),
                )?,
                _ => registry.resolve(&spec.name, spec, &context)?,
            };
            names.push(spec.name.clone());
            handlers.insert(spec.name.clone(), callback);
        }

        Ok(Self { names, handlers })
    }

    /// Subscribed notification names, in configuration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn log_subscriptions(&self) {
        log_list(
            Level::Info,
            "Listening for these NSWorkspace notifications: ",
            &self.names,
        );
    }

    pub fn dispatch(&self, event: WorkspaceEvent) {
        let Some(callback) = self.handlers.get(&event.name) else {
            warn!("No handler for NSWorkspace notification {}", event.name);
            return;
        };

        debug!("{}: dispatching", callback.context());
        let payload = Payload::Workspace {
            name: event.name,
            user_info: event.user_info,
        };
        if let Err(e) = callback.invoke(&payload) {
            error!("{}: handler failed: {e}", callback.context());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::Counter;
    use crate::plugins::Catalog;
    use crate::shell::ShellSettings;
    use std::cell::Cell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn spec(name: &str, body: &str) -> EventSpec {
        let value = toml::Value::Table(body.parse().unwrap());
        EventSpec::from_toml(name, &value).unwrap()
    }

    fn event(name: &str) -> WorkspaceEvent {
        WorkspaceEvent {
            name: name.to_string(),
            user_info: BTreeMap::from([("NSDevicePath".into(), "/Volumes/X".into())]),
        }
    }

    #[test]
    fn class_handler_requires_conventional_method() {
        let mut registry = HandlerRegistry::new(ShellSettings::default());
        Catalog::new()
            .register(&mut registry, &["mount_manager".to_string()])
            .unwrap();

        let ok = WorkspaceAdapter::new(
            &[spec("NSWorkspaceDidMountNotification", "class = \"MountManager\"")],
            &mut registry,
        );
        assert!(ok.is_ok());

        let err = WorkspaceAdapter::new(
            &[spec("NSWorkspaceDidWakeNotification", "class = \"MountManager\"")],
            &mut registry,
        )
        .err()
        .unwrap();
        assert!(
            err.to_string()
                .contains("must define a onNSWorkspaceDidWakeNotification method")
        );
    }

    #[test]
    fn dispatches_by_notification_name() {
        let seen = Rc::new(Cell::new(0));
        let mut registry = HandlerRegistry::new(ShellSettings::default());
        {
            let seen = seen.clone();
            registry.register_type("Counter", move || Box::new(Counter { seen: seen.clone() }));
        }

        let adapter = WorkspaceAdapter::new(
            &[
                spec(
                    "NSWorkspaceDidWakeNotification",
                    "method = [\"Counter\", \"count\"]",
                ),
                spec(
                    "NSWorkspaceWillSleepNotification",
                    "method = [\"Counter\", \"count\"]",
                ),
            ],
            &mut registry,
        )
        .unwrap();

        assert_eq!(
            adapter.names(),
            ["NSWorkspaceDidWakeNotification", "NSWorkspaceWillSleepNotification"]
        );

        adapter.dispatch(event("NSWorkspaceDidWakeNotification"));
        adapter.dispatch(event("NSWorkspaceDidMountNotification"));
        adapter.dispatch(event("NSWorkspaceWillSleepNotification"));
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn handler_method_follows_notification_name() {
        assert_eq!(
            handler_method("NSWorkspaceDidMountNotification"),
            "onNSWorkspaceDidMountNotification"
        );
    }
}
