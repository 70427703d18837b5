//! Shell command handlers.
//!
//! Commands run synchronously through `/bin/sh -c`, so at most one command
//! runs at a time and the dispatch loop resumes only after it exits.

use std::os::unix::process::ExitStatusExt;
use std::process::Command;
use std::sync::LazyLock;

use log::{debug, error, info};
use regex::Regex;

use crate::handler::{Invocation, Payload};

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\W+").unwrap());
static UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_{2,}").unwrap());

/// Settings shared by every command handler.
#[derive(Debug, Clone, Default)]
pub struct ShellSettings {
    /// Replaces PATH in the child environment when set.
    pub path: Option<String>,
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellOutcome {
    Exited(i32),
    Signaled(i32),
    SpawnFailed,
}

/// Convert an identifier into shell environment style:
/// `NSApplicationBundleIdentifier` becomes `NSAPPLICATION_BUNDLE_IDENTIFIER`.
pub fn create_env_name(name: &str) -> String {
    let mut split = String::with_capacity(name.len() + 8);
    let mut previous_lower = false;
    for c in name.chars() {
        if previous_lower && c.is_ascii_uppercase() {
            split.push('_');
        }
        previous_lower = c.is_ascii_lowercase();
        split.push(c);
    }

    let split = NON_WORD.replace_all(&split, "_");
    let split = UNDERSCORES.replace_all(&split, "_");
    split.to_uppercase().trim_matches('_').to_string()
}

/// Variables added to the child environment for one invocation.
pub fn environment(invocation: &Invocation<'_>) -> Vec<(String, String)> {
    let mut env = vec![("CRANKD_CONTEXT".to_string(), invocation.context.to_string())];

    match invocation.payload {
        Payload::Workspace { user_info, .. } => {
            env.push(("CRANKD_KEY".into(), invocation.key.to_string()));
            for (key, value) in user_info {
                env.push((create_env_name(key), value.clone()));
            }
        }
        Payload::ConfigStore { key, info } => {
            env.push(("CRANKD_KEY".into(), key.clone()));
            if let Some(info) = info.as_ref().filter(|i| !i.is_empty()) {
                env.push(("CRANKD_INFO".into(), info.clone()));
            }
        }
        Payload::Fs { path, recursive } => {
            env.push(("CRANKD_KEY".into(), invocation.key.to_string()));
            env.push(("CRANKD_PATH".into(), path.display().to_string()));
            env.push((
                "CRANKD_RECURSIVE".into(),
                if *recursive { "1" } else { "0" }.into(),
            ));
        }
    }

    env
}

/// Run `command` for `invocation` and log how it ended. Never fails.
pub fn run(command: &str, invocation: &Invocation<'_>, settings: &ShellSettings) -> ShellOutcome {
    info!("{}: executing {}", invocation.context, command);

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command).envs(environment(invocation));
    if let Some(path) = &settings.path {
        debug!("Update PATH to: {path}");
        cmd.env("PATH", path);
    }

    match cmd.status() {
        Ok(status) => {
            if let Some(signal) = status.signal() {
                error!("`{command}` was terminated by signal {signal}");
                ShellOutcome::Signaled(signal)
            } else {
                let code = status.code().unwrap_or(-1);
                if code == 0 {
                    debug!("`{command}` returned {code}");
                } else {
                    error!("`{command}` returned {code}");
                }
                ShellOutcome::Exited(code)
            }
        }
        Err(e) => {
            error!("Got an error when executing {command}: {e}");
            ShellOutcome::SpawnFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn fs_invocation<'a>(config: &'a toml::Table, payload: &'a Payload) -> Invocation<'a> {
        Invocation {
            key: "~/watched",
            context: "FSEvent: ~/watched",
            config,
            payload,
        }
    }

    #[test]
    fn env_names_are_upper_snake_case() {
        assert_eq!(
            create_env_name("NSApplicationBundleIdentifier"),
            "NSAPPLICATION_BUNDLE_IDENTIFIER"
        );
        assert_eq!(
            create_env_name("NSApplicationBundleIdentifier-1234$foobar!"),
            "NSAPPLICATION_BUNDLE_IDENTIFIER_1234_FOOBAR"
        );
        assert_eq!(create_env_name("NSDevicePath"), "NSDEVICE_PATH");
        assert_eq!(create_env_name("__already__snake__"), "ALREADY_SNAKE");
    }

    #[test]
    fn workspace_user_info_is_exported() {
        let config = toml::Table::new();
        let mut user_info = BTreeMap::new();
        user_info.insert("NSDevicePath".to_string(), "/Volumes/Backup".to_string());
        let payload = Payload::Workspace {
            name: "NSWorkspaceDidMountNotification".into(),
            user_info,
        };
        let invocation = Invocation {
            key: "NSWorkspaceDidMountNotification",
            context: "NSWorkspace Notification NSWorkspaceDidMountNotification",
            config: &config,
            payload: &payload,
        };

        let env = environment(&invocation);
        assert!(env.contains(&("NSDEVICE_PATH".into(), "/Volumes/Backup".into())));
        assert!(env.contains(&(
            "CRANKD_KEY".into(),
            "NSWorkspaceDidMountNotification".into()
        )));
    }

    #[test]
    fn config_store_key_overrides_configured_pattern() {
        let config = toml::Table::new();
        let payload = Payload::ConfigStore {
            key: "State:/Network/Interface/en0/IPv4".into(),
            info: Some("{ Addresses = (10.0.1.2) }".into()),
        };
        let invocation = Invocation {
            key: "State:/Network/Interface/.*/IPv4",
            context: "SystemConfiguration: State:/Network/Interface/.*/IPv4",
            config: &config,
            payload: &payload,
        };

        let env = environment(&invocation);
        assert!(env.contains(&(
            "CRANKD_KEY".into(),
            "State:/Network/Interface/en0/IPv4".into()
        )));
        assert!(env.contains(&("CRANKD_INFO".into(), "{ Addresses = (10.0.1.2) }".into())));
    }

    #[test]
    fn command_outcomes_are_reported_not_raised() {
        let config = toml::Table::new();
        let payload = Payload::Fs {
            path: PathBuf::from("/tmp"),
            recursive: false,
        };
        let invocation = fs_invocation(&config, &payload);
        let settings = ShellSettings::default();

        assert_eq!(run("exit 0", &invocation, &settings), ShellOutcome::Exited(0));
        assert_eq!(run("exit 3", &invocation, &settings), ShellOutcome::Exited(3));
        assert_eq!(
            run("kill -9 $$", &invocation, &settings),
            ShellOutcome::Signaled(9)
        );
    }

    #[test]
    fn command_sees_crankd_variables() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env.txt");
        let config = toml::Table::new();
        let payload = Payload::Fs {
            path: PathBuf::from("/tmp/watched/sub"),
            recursive: true,
        };
        let invocation = fs_invocation(&config, &payload);
        let command = format!(
            "printf '%s|%s|%s|%s' \"$CRANKD_KEY\" \"$CRANKD_CONTEXT\" \"$CRANKD_PATH\" \"$CRANKD_RECURSIVE\" > '{}'",
            out.display()
        );

        assert_eq!(
            run(&command, &invocation, &ShellSettings::default()),
            ShellOutcome::Exited(0)
        );
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "~/watched|FSEvent: ~/watched|/tmp/watched/sub|1"
        );
    }

    #[test]
    fn configured_path_replaces_path() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("path.txt");
        let config = toml::Table::new();
        let payload = Payload::Fs {
            path: PathBuf::from("/tmp"),
            recursive: false,
        };
        let invocation = fs_invocation(&config, &payload);
        let settings = ShellSettings {
            path: Some("/opt/crankd/bin:/usr/bin:/bin".into()),
        };

        let command = format!("printf '%s' \"$PATH\" > '{}'", out.display());
        run(&command, &invocation, &settings);
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "/opt/crankd/bin:/usr/bin:/bin"
        );
    }
}
