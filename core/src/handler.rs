//! Handler registry: turns an [`EventSpec`] into an invocable [`Callback`].
//!
//! Handlers are named in the configuration, so the registry keeps a table
//! from names to Rust code. Plugins fill the table at startup (see
//! [`crate::plugins`]); resolution happens once during setup so a typo in the
//! configuration stops the daemon before any event is delivered.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use log::debug;

use crate::config::{EventSpec, HandlerSpec};
use crate::error::{CrankdError, HandlerError, Result};
use crate::shell::{self, ShellSettings};

/// Per-event data handed to a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Workspace {
        name: String,
        user_info: BTreeMap<String, String>,
    },
    ConfigStore {
        key: String,
        info: Option<String>,
    },
    Fs {
        path: PathBuf,
        recursive: bool,
    },
}

/// Everything a handler sees when it is invoked.
#[derive(Debug)]
pub struct Invocation<'a> {
    /// The configured event name (notification, store key or watched path).
    pub key: &'a str,
    /// Human readable description of the source, e.g. `FSEvent: ~/watched`.
    pub context: &'a str,
    /// Raw configuration table of the event.
    pub config: &'a toml::Table,
    pub payload: &'a Payload,
}

pub type HandlerFn = dyn Fn(&Invocation<'_>) -> std::result::Result<(), HandlerError>;

/// Stateful handler type. One instance per type name lives for the whole
/// daemon run, so methods may keep state between events.
pub trait EventHandler {
    /// Whether `method` can be called on this handler.
    fn responds_to(&self, method: &str) -> bool;

    fn call(
        &mut self,
        method: &str,
        invocation: &Invocation<'_>,
    ) -> std::result::Result<(), HandlerError>;
}

pub type SharedHandler = Rc<RefCell<Box<dyn EventHandler>>>;
type Factory = Box<dyn Fn() -> Box<dyn EventHandler>>;

/// Static data bound into a callback when it is resolved.
#[derive(Debug)]
struct Binding {
    key: String,
    context: String,
    config: toml::Table,
}

#[derive(Clone)]
enum Target {
    Shell {
        command: String,
        settings: Rc<ShellSettings>,
    },
    Function(Rc<HandlerFn>),
    Method {
        object: SharedHandler,
        method: String,
    },
}

/// A resolved handler with its static context already bound.
#[derive(Clone)]
pub struct Callback {
    binding: Rc<Binding>,
    target: Target,
}

impl Callback {
    pub fn context(&self) -> &str {
        &self.binding.context
    }

    /// Invoke the handler with the variable part of the event.
    pub fn invoke(&self, payload: &Payload) -> std::result::Result<(), HandlerError> {
        let invocation = Invocation {
            key: &self.binding.key,
            context: &self.binding.context,
            config: &self.binding.config,
            payload,
        };

        match &self.target {
            Target::Shell { command, settings } => {
                shell::run(command, &invocation, settings);
                Ok(())
            }
            Target::Function(f) => f(&invocation),
            Target::Method { object, method } => object.borrow_mut().call(method, &invocation),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            Target::Shell { command, .. } => format!("command {command:?}"),
            Target::Function(_) => "function".to_string(),
            Target::Method { method, .. } => format!("method {method}"),
        };
        f.debug_struct("Callback")
            .field("key", &self.binding.key)
            .field("context", &self.binding.context)
            .field("target", &target)
            .finish()
    }
}

/// Registration table for functions and handler types, plus the cache of
/// handler singletons.
pub struct HandlerRegistry {
    functions: HashMap<String, Rc<HandlerFn>>,
    factories: HashMap<String, Factory>,
    instances: HashMap<String, SharedHandler>,
    shell: Rc<ShellSettings>,
}

impl HandlerRegistry {
    pub fn new(shell: ShellSettings) -> Self {
        Self {
            functions: HashMap::new(),
            factories: HashMap::new(),
            instances: HashMap::new(),
            shell: Rc::new(shell),
        }
    }

    /// Make `name` available to `function = "name"` entries.
    pub fn register_function<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&Invocation<'_>) -> std::result::Result<(), HandlerError> + 'static,
    {
        debug!("Registered function {name}");
        self.functions.insert(name.to_string(), Rc::new(f));
    }

    /// Make `type_name` available to `method` and `class` entries. The factory
    /// runs at most once, the first time the type is referenced.
    pub fn register_type<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn EventHandler> + 'static,
    {
        debug!("Registered handler type {type_name}");
        self.factories
            .insert(type_name.to_string(), Box::new(factory));
    }

    /// The singleton instance of `type_name`, created on first use.
    pub fn instance(&mut self, type_name: &str) -> Result<SharedHandler> {
        if let Some(existing) = self.instances.get(type_name) {
            return Ok(existing.clone());
        }

        let factory = self.factories.get(type_name).ok_or_else(|| {
            CrankdError::config(format!(
                "Unable to create a handler object for '{type_name}': no such handler type \
                 (is its plugin listed in imports?)"
            ))
        })?;

        debug!("Creating handler object {type_name}");
        let object: SharedHandler = Rc::new(RefCell::new(factory()));
        self.instances
            .insert(type_name.to_string(), object.clone());
        Ok(object)
    }

    /// Resolve `spec` into a callback bound to `name` and `context`.
    ///
    /// `class` specs are not handled here; the workspace adapter binds them to
    /// its per-notification method convention with [`Self::bind_method`].
    pub fn resolve(&mut self, name: &str, spec: &EventSpec, context: &str) -> Result<Callback> {
        match &spec.handler {
            HandlerSpec::Command(command) => Ok(self.bind(
                name,
                spec,
                context,
                Target::Shell {
                    command: command.clone(),
                    settings: self.shell.clone(),
                },
            )),
            HandlerSpec::Function(function) => {
                let f = self.functions.get(function).cloned().ok_or_else(|| {
                    CrankdError::config(format!(
                        "Unable to create a callable object for '{function}': no such function"
                    ))
                })?;
                Ok(self.bind(name, spec, context, Target::Function(f)))
            }
            HandlerSpec::Method { type_name, method } => {
                self.bind_method(name, spec, context, type_name, method)
            }
            HandlerSpec::Class(type_name) => Err(CrankdError::config(format!(
                "{name}: class {type_name} can only handle NSWorkspace notifications"
            ))),
        }
    }

    /// Bind `method` of the `type_name` singleton, failing if it does not exist.
    pub fn bind_method(
        &mut self,
        name: &str,
        spec: &EventSpec,
        context: &str,
        type_name: &str,
        method: &str,
    ) -> Result<Callback> {
        let object = self.instance(type_name)?;
        if !object.borrow().responds_to(method) {
            return Err(CrankdError::config(format!(
                "{name}: handler class {type_name} must define a {method} method"
            )));
        }
        Ok(self.bind(
            name,
            spec,
            context,
            Target::Method {
                object,
                method: method.to_string(),
            },
        ))
    }

    fn bind(&self, name: &str, spec: &EventSpec, context: &str, target: Target) -> Callback {
        Callback {
            binding: Rc::new(Binding {
                key: name.to_string(),
                context: context.to_string(),
                config: spec.config.clone(),
            }),
            target,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;

    /// Handler that counts calls to `count` in a cell shared with the test.
    pub(crate) struct Counter {
        pub(crate) seen: Rc<Cell<usize>>,
    }

    impl EventHandler for Counter {
        fn responds_to(&self, method: &str) -> bool {
            method == "count"
        }

        fn call(
            &mut self,
            _method: &str,
            _invocation: &Invocation<'_>,
        ) -> std::result::Result<(), HandlerError> {
            self.seen.set(self.seen.get() + 1);
            Ok(())
        }
    }

    /// Handler that counts with its own state, not shared with anyone.
    struct Tally {
        calls: usize,
        log: Rc<RefCell<Vec<usize>>>,
    }

    impl EventHandler for Tally {
        fn responds_to(&self, method: &str) -> bool {
            method == "bump"
        }

        fn call(
            &mut self,
            _method: &str,
            _invocation: &Invocation<'_>,
        ) -> std::result::Result<(), HandlerError> {
            self.calls += 1;
            self.log.borrow_mut().push(self.calls);
            Ok(())
        }
    }

    fn method_spec(name: &str, type_name: &str, method: &str) -> EventSpec {
        let source = format!("method = [\"{type_name}\", \"{method}\"]");
        let value: toml::Value = toml::Value::Table(source.parse().unwrap());
        EventSpec::from_toml(name, &value).unwrap()
    }

    fn payload() -> Payload {
        Payload::Fs {
            path: PathBuf::from("/tmp"),
            recursive: false,
        }
    }

    #[test]
    fn method_handlers_share_one_instance() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let created = Rc::new(Cell::new(0));

        let mut registry = HandlerRegistry::new(ShellSettings::default());
        {
            let log = log.clone();
            let created = created.clone();
            registry.register_type("Tally", move || {
                created.set(created.get() + 1);
                Box::new(Tally {
                    calls: 0,
                    log: log.clone(),
                })
            });
        }

        let first = registry
            .resolve("a", &method_spec("a", "Tally", "bump"), "test: a")
            .unwrap();
        let second = registry
            .resolve("b", &method_spec("b", "Tally", "bump"), "test: b")
            .unwrap();

        first.invoke(&payload()).unwrap();
        second.invoke(&payload()).unwrap();
        first.invoke(&payload()).unwrap();

        assert_eq!(created.get(), 1);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn unknown_function_fails_at_resolve_time() {
        let mut registry = HandlerRegistry::new(ShellSettings::default());
        let value: toml::Value = toml::Value::Table("function = \"nope\"".parse().unwrap());
        let spec = EventSpec::from_toml("x", &value).unwrap();

        let err = registry.resolve("x", &spec, "test").unwrap_err();
        assert!(matches!(err, CrankdError::Config(_)));
    }

    #[test]
    fn unknown_type_or_method_fails_at_resolve_time() {
        let mut registry = HandlerRegistry::new(ShellSettings::default());
        let seen = Rc::new(Cell::new(0));
        {
            let seen = seen.clone();
            registry.register_type("Counter", move || {
                Box::new(Counter { seen: seen.clone() })
            });
        }

        assert!(
            registry
                .resolve("x", &method_spec("x", "Missing", "count"), "test")
                .is_err()
        );
        let err = registry
            .resolve("x", &method_spec("x", "Counter", "explode"), "test")
            .unwrap_err();
        assert!(err.to_string().contains("must define a explode method"));
        assert_eq!(seen.get(), 0);
    }

    #[test]
    fn functions_receive_bound_context() {
        let seen: Rc<RefCell<Vec<(String, String, Payload)>>> = Rc::default();
        let mut registry = HandlerRegistry::new(ShellSettings::default());
        {
            let seen = seen.clone();
            registry.register_function("record", move |inv| {
                seen.borrow_mut().push((
                    inv.key.to_string(),
                    inv.context.to_string(),
                    inv.payload.clone(),
                ));
                Ok(())
            });
        }

        let value: toml::Value = toml::Value::Table("function = \"record\"".parse().unwrap());
        let spec = EventSpec::from_toml("State:/Network/Global/IPv4", &value).unwrap();
        let callback = registry
            .resolve(&spec.name, &spec, "SystemConfiguration: State:/Network/Global/IPv4")
            .unwrap();

        let event = Payload::ConfigStore {
            key: "State:/Network/Global/IPv4".into(),
            info: None,
        };
        callback.invoke(&event).unwrap();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "State:/Network/Global/IPv4");
        assert_eq!(seen[0].1, "SystemConfiguration: State:/Network/Global/IPv4");
        assert_eq!(seen[0].2, event);
    }

    #[test]
    fn handler_errors_are_returned_not_panicked() {
        let mut registry = HandlerRegistry::new(ShellSettings::default());
        registry.register_function("fail", |_| Err(HandlerError::Failed("boom".into())));
        let value: toml::Value = toml::Value::Table("function = \"fail\"".parse().unwrap());
        let spec = EventSpec::from_toml("x", &value).unwrap();

        let callback = registry.resolve("x", &spec, "test").unwrap();
        assert!(callback.invoke(&payload()).is_err());
    }
}
