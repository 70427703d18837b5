//! Plugins fill the handler registry with named functions and handler types.
//!
//! The `crankd` plugin is always registered. Others are registered when the
//! configuration lists them under `imports`.

use log::{debug, info};

use crate::error::{CrankdError, HandlerError, Result};
use crate::handler::{EventHandler, HandlerRegistry, Invocation, Payload};

/// A named registration step.
#[derive(Clone, Copy)]
pub struct Plugin {
    pub name: &'static str,
    pub register: fn(&mut HandlerRegistry),
}

/// Plugins that `imports` may name.
#[derive(Clone)]
pub struct Catalog {
    plugins: Vec<Plugin>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            plugins: vec![Plugin {
                name: "mount_manager",
                register: register_mount_manager,
            }],
        }
    }

    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.name == name)
    }

    /// Register the built-in plugin and then every import, in order.
    pub fn register(&self, registry: &mut HandlerRegistry, imports: &[String]) -> Result<()> {
        register_builtin(registry);

        for name in imports {
            let plugin = self.get(name).ok_or_else(|| {
                CrankdError::config(format!("Unable to import {name}: no such plugin"))
            })?;
            debug!("Importing plugin {name}");
            (plugin.register)(registry);
        }
        Ok(())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Functions available without any import.
pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry.register_function("crankd.log_event", log_event);
}

/// Log the event at info level. Handy while writing a configuration.
fn log_event(invocation: &Invocation<'_>) -> std::result::Result<(), HandlerError> {
    match invocation.payload {
        Payload::Workspace { name, user_info } => {
            info!("{}: {name} {user_info:?}", invocation.context)
        }
        Payload::ConfigStore { key, info } => {
            info!("{}: {key} changed: {}", invocation.context, info.as_deref().unwrap_or("-"))
        }
        Payload::Fs { path, recursive } => info!(
            "{}: {} changed (recursive: {recursive})",
            invocation.context,
            path.display()
        ),
    }
    Ok(())
}

fn register_mount_manager(registry: &mut HandlerRegistry) {
    registry.register_type("MountManager", || Box::new(MountManager::default()));
}

/// Logs volume mounts and unmounts and keeps track of what is mounted.
#[derive(Debug, Default)]
pub struct MountManager {
    mounted: Vec<String>,
}

impl MountManager {
    const ON_MOUNT: &'static str = "onNSWorkspaceDidMountNotification";
    const ON_UNMOUNT: &'static str = "onNSWorkspaceDidUnmountNotification";

    pub fn mounted(&self) -> &[String] {
        &self.mounted
    }

    fn device_path(invocation: &Invocation<'_>) -> std::result::Result<String, HandlerError> {
        match invocation.payload {
            Payload::Workspace { user_info, .. } => user_info
                .get("NSDevicePath")
                .cloned()
                .ok_or_else(|| HandlerError::Failed("notification has no NSDevicePath".into())),
            other => Err(HandlerError::Failed(format!(
                "MountManager only handles workspace notifications, got {other:?}"
            ))),
        }
    }
}

impl EventHandler for MountManager {
    fn responds_to(&self, method: &str) -> bool {
        method == Self::ON_MOUNT || method == Self::ON_UNMOUNT
    }

    fn call(
        &mut self,
        method: &str,
        invocation: &Invocation<'_>,
    ) -> std::result::Result<(), HandlerError> {
        let path = Self::device_path(invocation)?;
        if method == Self::ON_MOUNT {
            info!("Mount: {path}");
            self.mounted.push(path);
        } else {
            info!("Unmount: {path}");
            self.mounted.retain(|p| *p != path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::ShellSettings;
    use std::collections::BTreeMap;

    #[test]
    fn unknown_import_is_a_config_error() {
        let mut registry = HandlerRegistry::new(ShellSettings::default());
        let err = Catalog::new()
            .register(&mut registry, &["no_such_plugin".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("no_such_plugin"));
    }

    #[test]
    fn mount_manager_is_only_available_after_import() {
        let mut registry = HandlerRegistry::new(ShellSettings::default());
        Catalog::new().register(&mut registry, &[]).unwrap();
        assert!(registry.instance("MountManager").is_err());

        let mut registry = HandlerRegistry::new(ShellSettings::default());
        Catalog::new()
            .register(&mut registry, &["mount_manager".to_string()])
            .unwrap();
        assert!(registry.instance("MountManager").is_ok());
    }

    #[test]
    fn mount_manager_tracks_volumes() {
        let mut manager = MountManager::default();
        let config = toml::Table::new();
        let payload = |path: &str| Payload::Workspace {
            name: String::new(),
            user_info: BTreeMap::from([("NSDevicePath".to_string(), path.to_string())]),
        };

        let mounted = payload("/Volumes/Backup");
        let invocation = Invocation {
            key: "NSWorkspaceDidMountNotification",
            context: "test",
            config: &config,
            payload: &mounted,
        };
        manager
            .call("onNSWorkspaceDidMountNotification", &invocation)
            .unwrap();
        assert_eq!(manager.mounted(), ["/Volumes/Backup".to_string()]);

        let invocation = Invocation {
            key: "NSWorkspaceDidUnmountNotification",
            ..invocation
        };
        manager
            .call("onNSWorkspaceDidUnmountNotification", &invocation)
            .unwrap();
        assert!(manager.mounted().is_empty());
    }
}
