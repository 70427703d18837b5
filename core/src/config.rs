//! Configuration loading and management.
//!
//! The file is TOML with one table per event source. Each entry maps an event
//! name to a table holding exactly one handler declaration:
//!
//! ```toml
//! [NSWorkspace.NSWorkspaceDidWakeNotification]
//! command = "/bin/echo woke"
//!
//! [SystemConfiguration."State:/Network/Global/IPv4"]
//! command = "/usr/local/bin/update-proxy"
//!
//! [FSEvents."~/Library/LaunchAgents"]
//! function = "crankd.log_event"
//! ```

use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::{CrankdError, Result};

pub const WORKSPACE_SECTION: &str = "NSWorkspace";
pub const CONFIG_STORE_SECTION: &str = "SystemConfiguration";
pub const FS_SECTION: &str = "FSEvents";

const HANDLER_KEYS: [&str; 4] = ["command", "function", "method", "class"];

/// Which handler an event is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerSpec {
    /// Shell command line run through `/bin/sh -c`.
    Command(String),
    /// Name of a function registered by a plugin.
    Function(String),
    /// Method on the singleton instance of a registered handler type.
    Method { type_name: String, method: String },
    /// Singleton handler type receiving `on<Notification>` calls. Workspace only.
    Class(String),
}

/// A named event-matching rule with exactly one handler.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSpec {
    pub name: String,
    pub handler: HandlerSpec,
    /// The raw table this spec was parsed from, passed to every invocation.
    pub config: toml::Table,
}

impl EventSpec {
    pub fn from_toml(name: &str, value: &toml::Value) -> Result<Self> {
        let table = value
            .as_table()
            .ok_or_else(|| CrankdError::config(format!("{name} must be a table")))?;

        let declared: Vec<&str> = HANDLER_KEYS
            .iter()
            .copied()
            .filter(|k| table.contains_key(*k))
            .collect();

        let kind = match declared.as_slice() {
            [kind] => *kind,
            [] => {
                return Err(CrankdError::config(format!(
                    "{name} must have a class, method, function or command"
                )));
            }
            _ => {
                return Err(CrankdError::config(format!(
                    "{name} declares more than one handler: {}",
                    declared.join(", ")
                )));
            }
        };

        let handler = match kind {
            "command" => HandlerSpec::Command(string_field(name, table, kind)?),
            "function" => HandlerSpec::Function(string_field(name, table, kind)?),
            "class" => HandlerSpec::Class(string_field(name, table, kind)?),
            _ => {
                let pair = table
                    .get("method")
                    .and_then(|v| v.as_array())
                    .map(|items| items.iter().map(|i| i.as_str()).collect::<Vec<_>>());
                match pair.as_deref() {
                    Some([Some(type_name), Some(method)]) => HandlerSpec::Method {
                        type_name: (*type_name).to_string(),
                        method: (*method).to_string(),
                    },
                    _ => {
                        return Err(CrankdError::config(format!(
                            "{name}: method must be a [type, method] pair of strings"
                        )));
                    }
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            handler,
            config: table.clone(),
        })
    }

    /// Spec running a shell command, with a matching raw table.
    pub fn command(name: &str, command: &str) -> Self {
        let mut config = toml::Table::new();
        config.insert("command".into(), toml::Value::String(command.into()));
        Self {
            name: name.to_string(),
            handler: HandlerSpec::Command(command.to_string()),
            config,
        }
    }
}

fn string_field(name: &str, table: &toml::Table, key: &str) -> Result<String> {
    table
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CrankdError::config(format!("{name}: {key} must be a string")))
}

// Helper struct for serialization to maintain TOML structure
#[derive(Serialize)]
struct ConfigForSerialization {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    imports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    key_pattern_fallback: bool,
    #[serde(rename = "NSWorkspace", skip_serializing_if = "Option::is_none")]
    workspace: Option<toml::Table>,
    #[serde(rename = "SystemConfiguration", skip_serializing_if = "Option::is_none")]
    config_store: Option<toml::Table>,
    #[serde(rename = "FSEvents", skip_serializing_if = "Option::is_none")]
    fs_events: Option<toml::Table>,
}

#[derive(Debug, Default, PartialEq)]
pub struct Config {
    /// `None` when the section is absent; the adapter is then not wired at all.
    pub workspace: Option<Vec<EventSpec>>,
    pub config_store: Option<Vec<EventSpec>>,
    pub fs_events: Option<Vec<EventSpec>>,
    /// Plugins to register before any handler is resolved.
    pub imports: Vec<String>,
    /// PATH given to shell command handlers.
    pub path: Option<String>,
    /// Retry unmatched configuration-store keys against every registered key
    /// used as a regular expression.
    pub key_pattern_fallback: bool,
}

impl Config {
    /// Load configuration from `config_path`, writing `example()` there first if
    /// the file does not exist yet.
    pub fn load_or_init(config_path: &Path, example: impl FnOnce() -> Config) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "{} does not exist - initializing with an example configuration",
                config_path.display()
            );
            eprintln!(
                "Creating {} with default options for you to customize",
                config_path.display()
            );
            eprintln!("crankd --list-events will list the events you can monitor on this system");
            example().save(config_path)?;
        }

        info!("Loading configuration from {}", config_path.display());
        let content = fs::read_to_string(config_path).map_err(|source| CrankdError::ReadConfig {
            path: config_path.to_path_buf(),
            source,
        })?;

        Self::parse(&content, config_path)
    }

    /// Parse file contents; `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        // Parse as toml::Table first to preserve order, then convert
        let table: toml::Table = content.parse().map_err(|source| CrankdError::ParseConfig {
            path: origin.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_table(&table)?;

        debug!(
            "Loaded {} workspace, {} configuration-store and {} filesystem events",
            config.workspace.as_ref().map_or(0, Vec::len),
            config.config_store.as_ref().map_or(0, Vec::len),
            config.fs_events.as_ref().map_or(0, Vec::len),
        );
        Ok(config)
    }

    fn from_toml_table(table: &toml::Table) -> Result<Self> {
        let imports = match table.get("imports") {
            None => Vec::new(),
            Some(value) => value
                .as_array()
                .and_then(|items| {
                    items
                        .iter()
                        .map(|i| i.as_str().map(String::from))
                        .collect::<Option<Vec<_>>>()
                })
                .ok_or_else(|| CrankdError::config("imports must be a list of plugin names"))?,
        };

        let path = match table.get("path") {
            None => None,
            Some(value) => Some(
                value
                    .as_str()
                    .map(String::from)
                    .ok_or_else(|| CrankdError::config("path must be a string"))?,
            ),
        };

        let key_pattern_fallback = match table.get("key_pattern_fallback") {
            None => false,
            Some(value) => value
                .as_bool()
                .ok_or_else(|| CrankdError::config("key_pattern_fallback must be true or false"))?,
        };

        for key in table.keys() {
            if !matches!(
                key.as_str(),
                "imports"
                    | "path"
                    | "key_pattern_fallback"
                    | WORKSPACE_SECTION
                    | CONFIG_STORE_SECTION
                    | FS_SECTION
            ) {
                warn!("Ignoring unknown configuration key {key:?}");
            }
        }

        Ok(Config {
            workspace: parse_section(table, WORKSPACE_SECTION, true)?,
            config_store: parse_section(table, CONFIG_STORE_SECTION, false)?,
            fs_events: parse_section(table, FS_SECTION, false)?,
            imports,
            path,
            key_pattern_fallback,
        })
    }

    /// Write this configuration to `config_path`, creating parent directories.
    pub fn save(&self, config_path: &Path) -> Result<()> {
        let write_error = |reason: String| CrankdError::WriteConfig {
            path: config_path.to_path_buf(),
            reason,
        };

        // Create the directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
        }

        let serializable_config = ConfigForSerialization {
            imports: self.imports.clone(),
            path: self.path.clone(),
            key_pattern_fallback: self.key_pattern_fallback,
            workspace: self.workspace.as_deref().map(section_table),
            config_store: self.config_store.as_deref().map(section_table),
            fs_events: self.fs_events.as_deref().map(section_table),
        };
        let content =
            toml::to_string_pretty(&serializable_config).map_err(|e| write_error(e.to_string()))?;
        fs::write(config_path, content).map_err(|e| write_error(e.to_string()))?;

        info!("Saved config to {}", config_path.display());
        Ok(())
    }

    /// Starter configuration covering the sources this platform supports.
    pub fn example(workspace: bool, config_store: bool) -> Self {
        let mut config = Config::default();

        if config_store {
            config.config_store = Some(vec![EventSpec::command(
                "State:/Network/Global/IPv4",
                "/bin/echo \"Global IPv4 config changed\"",
            )]);
        }

        if workspace {
            config.workspace = Some(vec![
                EventSpec::command(
                    "NSWorkspaceDidMountNotification",
                    "/bin/echo \"A new volume was mounted!\"",
                ),
                EventSpec::command(
                    "NSWorkspaceDidWakeNotification",
                    "/bin/echo \"The system woke from sleep!\"",
                ),
                EventSpec::command(
                    "NSWorkspaceWillSleepNotification",
                    "/bin/echo \"The system is about to go to sleep!\"",
                ),
            ]);
        }

        if !workspace && !config_store {
            config.fs_events = Some(vec![EventSpec::command(
                "/tmp",
                "/bin/echo \"Something changed in $CRANKD_PATH\"",
            )]);
        }

        config
    }

    /// PATH for shell commands: the configured one, if any.
    pub fn get_path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

fn parse_section(
    table: &toml::Table,
    section: &str,
    allow_class: bool,
) -> Result<Option<Vec<EventSpec>>> {
    let Some(value) = table.get(section) else {
        return Ok(None);
    };
    let entries = value
        .as_table()
        .ok_or_else(|| CrankdError::config(format!("{section} must be a table of events")))?;

    // With preserve_order feature, this iteration maintains order
    let mut specs = Vec::with_capacity(entries.len());
    for (name, entry) in entries {
        let spec = EventSpec::from_toml(name, entry)?;
        if !allow_class && matches!(spec.handler, HandlerSpec::Class(_)) {
            return Err(CrankdError::config(format!(
                "{section} {name}: class handlers are only supported for {WORKSPACE_SECTION} \
                 notifications; use method = [type, method]"
            )));
        }
        specs.push(spec);
    }
    Ok(Some(specs))
}

fn section_table(specs: &[EventSpec]) -> toml::Table {
    specs
        .iter()
        .map(|spec| (spec.name.clone(), toml::Value::Table(spec.config.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Config> {
        Config::parse(content, Path::new("test.toml"))
    }

    #[test]
    fn parses_each_handler_kind_in_order() {
        let config = parse(
            r#"
            imports = ["mount_manager"]
            path = "/usr/bin:/bin"

            [NSWorkspace.NSWorkspaceDidWakeNotification]
            command = "/bin/echo woke"

            [NSWorkspace.NSWorkspaceDidMountNotification]
            class = "MountManager"

            [SystemConfiguration."State:/Network/Global/IPv4"]
            function = "crankd.log_event"

            [FSEvents."/tmp"]
            method = ["MountManager", "onNSWorkspaceDidMountNotification"]
            "#,
        )
        .unwrap();

        assert_eq!(config.imports, vec!["mount_manager"]);
        assert_eq!(config.get_path(), Some("/usr/bin:/bin"));
        assert!(!config.key_pattern_fallback);

        let workspace = config.workspace.unwrap();
        assert_eq!(workspace[0].name, "NSWorkspaceDidWakeNotification");
        assert_eq!(
            workspace[0].handler,
            HandlerSpec::Command("/bin/echo woke".into())
        );
        assert_eq!(workspace[1].handler, HandlerSpec::Class("MountManager".into()));

        let store = config.config_store.unwrap();
        assert_eq!(
            store[0].handler,
            HandlerSpec::Function("crankd.log_event".into())
        );

        let fs_events = config.fs_events.unwrap();
        assert_eq!(
            fs_events[0].handler,
            HandlerSpec::Method {
                type_name: "MountManager".into(),
                method: "onNSWorkspaceDidMountNotification".into(),
            }
        );
    }

    #[test]
    fn absent_sections_stay_none() {
        let config = parse("[FSEvents]\n").unwrap();
        assert_eq!(config.workspace, None);
        assert_eq!(config.config_store, None);
        assert_eq!(config.fs_events, Some(Vec::new()));
    }

    #[test]
    fn rejects_entry_without_handler() {
        let err = parse("[FSEvents.\"/tmp\"]\nrecursive = true\n").unwrap_err();
        assert!(matches!(err, CrankdError::Config(_)));
        assert!(err.to_string().contains("must have a class, method, function or command"));
    }

    #[test]
    fn rejects_entry_with_two_handlers() {
        let err = parse(
            "[FSEvents.\"/tmp\"]\ncommand = \"/bin/true\"\nfunction = \"crankd.log_event\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than one handler"));
    }

    #[test]
    fn rejects_malformed_method_pair() {
        let err = parse("[FSEvents.\"/tmp\"]\nmethod = [\"OnlyType\"]\n").unwrap_err();
        assert!(err.to_string().contains("[type, method]"));
    }

    #[test]
    fn class_is_workspace_only() {
        let err = parse("[FSEvents.\"/tmp\"]\nclass = \"MountManager\"\n").unwrap_err();
        assert!(err.to_string().contains("only supported for NSWorkspace"));
    }

    #[test]
    fn rejects_bad_imports() {
        assert!(parse("imports = \"mount_manager\"\n").is_err());
        assert!(parse("imports = [1]\n").is_err());
    }

    #[test]
    fn rejects_mistyped_settings() {
        let err = parse("path = [\"/usr/bin\"]\n").unwrap_err();
        assert!(matches!(err, CrankdError::Config(_)));
        assert!(err.to_string().contains("path must be a string"));

        let err = parse("key_pattern_fallback = \"true\"\n").unwrap_err();
        assert!(matches!(err, CrankdError::Config(_)));
        assert!(err.to_string().contains("key_pattern_fallback"));

        assert!(parse("key_pattern_fallback = true\n").unwrap().key_pattern_fallback);
    }

    #[test]
    fn example_is_written_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("crankd.toml");

        let config = Config::load_or_init(&path, || Config::example(true, true)).unwrap();

        assert!(path.exists());
        assert_eq!(config, Config::example(true, true));
    }

    #[test]
    fn portable_example_watches_the_filesystem() {
        let example = Config::example(false, false);
        assert!(example.workspace.is_none());
        assert!(example.config_store.is_none());
        assert_eq!(example.fs_events.unwrap().len(), 1);
    }
}
