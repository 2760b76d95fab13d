//! Plugin wiring.
//!
//! Plugins bind shared capabilities (`Arc<EngineConfig>`, `Arc<dyn Dictionary>`,
//! a prepared `Router`, ...) into a [`Binder`]. [`Bootstrap::init`] runs every
//! enabled plugin once and freezes the result into [`Services`]. A capability
//! bound by two plugins is a wiring error unless one of them disables the other,
//! so a misconfigured process fails before serving its first request.
//!
//! ```
//! use std::sync::Arc;
//! use frontline::bootstrap::{Binder, Bootstrap, BootstrapError, CorePlugin, Plugin};
//! use frontline::config::EngineConfig;
//! use frontline::context::DefaultContextFactory;
//! use frontline::dictionary::{DefaultDictionary, Dictionary, MessageKey};
//! use frontline::dispatch::Engine;
//!
//! struct FrenchMessages;
//!
//! impl Plugin for FrenchMessages {
//!     fn name(&self) -> &str { "french-messages" }
//!
//!     fn register(&self, binder: &mut Binder) -> Result<(), BootstrapError> {
//!         let dictionary = DefaultDictionary::new().with(MessageKey::RouteNotFound, "Introuvable");
//!         binder.bind::<dyn Dictionary>(Arc::new(dictionary))
//!     }
//! }
//!
//! let services = Bootstrap::new()
//!     .plugin(CorePlugin::new(EngineConfig::default()).without_dictionary())
//!     .plugin(FrenchMessages)
//!     .init()?;
//! let _engine = Engine::from_services(&services, DefaultContextFactory)?;
//! # Ok::<(), BootstrapError>(())
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, EngineConfig};
use crate::context::ContextFactory;
use crate::dictionary::{DefaultDictionary, Dictionary};
use crate::dispatch::Engine;
use crate::router::Router;

/// Errors raised while wiring plugins.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("plugin `{name}` is registered twice")]
    DuplicatePlugin { name: String },

    #[error("`{capability}` is bound by both `{first}` and `{second}`; disable one of them")]
    ConflictingBinding {
        capability: &'static str,
        first: String,
        second: String,
    },

    #[error("no plugin binds `{capability}`")]
    MissingCapability { capability: &'static str },

    #[error("plugin `{plugin}` failed: {message}")]
    Plugin { plugin: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A unit of wiring.
pub trait Plugin: Send + Sync {
    /// Unique name, also the key other plugins use to disable this one.
    fn name(&self) -> &str;

    /// Names of the plugins this one replaces.
    fn disabled_plugins(&self) -> Vec<String> {
        Vec::new()
    }

    fn register(&self, binder: &mut Binder) -> Result<(), BootstrapError>;
}

struct Binding {
    plugin: String,
    capability: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// Collects the bindings of the plugin being registered.
#[derive(Default)]
pub struct Binder {
    current: String,
    bindings: HashMap<TypeId, Binding>,
}

impl Binder {
    /// Binds `value` as the single implementation of `T`.
    ///
    /// # Errors
    ///
    /// [`BootstrapError::ConflictingBinding`] when another plugin already
    /// bound `T`.
    pub fn bind<T>(&mut self, value: Arc<T>) -> Result<(), BootstrapError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let capability = type_name::<T>();
        if let Some(existing) = self.bindings.get(&TypeId::of::<Arc<T>>()) {
            return Err(BootstrapError::ConflictingBinding {
                capability,
                first: existing.plugin.clone(),
                second: self.current.clone(),
            });
        }

        debug!(plugin = %self.current, capability, "capability bound");
        self.bindings.insert(
            TypeId::of::<Arc<T>>(),
            Binding {
                plugin: self.current.clone(),
                capability,
                value: Box::new(value),
            },
        );
        Ok(())
    }

    /// `true` when some plugin already bound `T`.
    pub fn is_bound<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.bindings.contains_key(&TypeId::of::<Arc<T>>())
    }
}

/// The capabilities bound at initialization, read-only from then on.
pub struct Services {
    bindings: HashMap<TypeId, Binding>,
}

impl Services {
    pub fn resolve<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.bindings
            .get(&TypeId::of::<Arc<T>>())
            .and_then(|binding| binding.value.downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub fn require<T>(&self) -> Result<Arc<T>, BootstrapError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.resolve().ok_or(BootstrapError::MissingCapability {
            capability: type_name::<T>(),
        })
    }

    /// The plugin that bound `T`.
    pub fn provider<T>(&self) -> Option<&str>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.bindings
            .get(&TypeId::of::<Arc<T>>())
            .map(|binding| binding.plugin.as_str())
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.bindings.values().map(|binding| binding.capability)
    }
}

/// Runs plugins in registration order.
#[derive(Default)]
pub struct Bootstrap {
    plugins: Vec<Box<dyn Plugin>>,
}

impl Bootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Registers every plugin no other plugin disables.
    pub fn init(self) -> Result<Services, BootstrapError> {
        let mut names = HashSet::new();
        for plugin in &self.plugins {
            if !names.insert(plugin.name().to_owned()) {
                return Err(BootstrapError::DuplicatePlugin {
                    name: plugin.name().to_owned(),
                });
            }
        }

        let disabled: HashSet<String> = self
            .plugins
            .iter()
            .flat_map(|plugin| plugin.disabled_plugins())
            .collect();

        let mut binder = Binder::default();
        for plugin in &self.plugins {
            let name = plugin.name();
            if disabled.contains(name) {
                info!(plugin = name, "plugin disabled");
                continue;
            }
            binder.current = name.to_owned();
            plugin.register(&mut binder)?;
            debug!(plugin = name, "plugin registered");
        }

        info!(bindings = binder.bindings.len(), "bootstrap complete");
        Ok(Services {
            bindings: binder.bindings,
        })
    }
}

/// Binds the engine configuration and, unless told otherwise, the default
/// dictionary.
pub struct CorePlugin {
    config: Arc<EngineConfig>,
    bind_dictionary: bool,
}

impl CorePlugin {
    pub const NAME: &'static str = "core";

    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            bind_dictionary: true,
        }
    }

    /// Reads the configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BootstrapError> {
        Ok(Self::new(EngineConfig::load(path)?))
    }

    /// Leaves `dyn Dictionary` to another plugin.
    #[must_use]
    pub fn without_dictionary(mut self) -> Self {
        self.bind_dictionary = false;
        self
    }
}

impl Plugin for CorePlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn register(&self, binder: &mut Binder) -> Result<(), BootstrapError> {
        binder.bind(Arc::clone(&self.config))?;
        if self.bind_dictionary {
            binder.bind::<dyn Dictionary>(Arc::new(DefaultDictionary::new()))?;
        }
        Ok(())
    }
}

impl<F: ContextFactory> Engine<F> {
    /// Builds an engine from bound capabilities.
    ///
    /// `EngineConfig` is required. A bound `Router` for the factory's context
    /// type is used as is, otherwise an empty one is created; a bound
    /// `dyn Dictionary` replaces the default messages.
    pub fn from_services(services: &Services, factory: F) -> Result<Self, BootstrapError> {
        let config = services.require::<EngineConfig>()?;
        let router = match services.resolve::<Router<F::Context>>() {
            Some(router) => router,
            None => Arc::new(Router::new(config)),
        };
        let engine = Engine::new(router, factory);
        Ok(match services.resolve::<dyn Dictionary>() {
            Some(dictionary) => engine.with_dictionary(dictionary),
            None => engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DefaultContext, DefaultContextFactory, RequestContext};
    use crate::dictionary::MessageKey;
    use crate::http::{BufferedExchange, Method};
    use crate::router::Flow;

    struct Messages {
        name: &'static str,
        not_found: &'static str,
        replaces: Vec<String>,
    }

    impl Messages {
        fn new(name: &'static str, not_found: &'static str) -> Self {
            Self {
                name,
                not_found,
                replaces: Vec::new(),
            }
        }
    }

    impl Plugin for Messages {
        fn name(&self) -> &str {
            self.name
        }

        fn disabled_plugins(&self) -> Vec<String> {
            self.replaces.clone()
        }

        fn register(&self, binder: &mut Binder) -> Result<(), BootstrapError> {
            let dictionary = DefaultDictionary::new().with(MessageKey::RouteNotFound, self.not_found);
            binder.bind::<dyn Dictionary>(Arc::new(dictionary))
        }
    }

    #[test]
    fn conflicting_bindings_fail_initialization() {
        let err = Bootstrap::new()
            .plugin(CorePlugin::new(EngineConfig::default()))
            .plugin(Messages::new("french", "Introuvable"))
            .init()
            .err()
            .unwrap();

        match err {
            BootstrapError::ConflictingBinding { first, second, .. } => {
                assert_eq!(first, "core");
                assert_eq!(second, "french");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn disabling_a_plugin_resolves_the_conflict() {
        let mut french = Messages::new("french", "Introuvable");
        french.replaces.push("german".to_owned());

        let services = Bootstrap::new()
            .plugin(CorePlugin::new(EngineConfig::default()).without_dictionary())
            .plugin(Messages::new("german", "Nicht gefunden"))
            .plugin(french)
            .init()
            .unwrap();

        let dictionary = services.require::<dyn Dictionary>().unwrap();
        assert_eq!(dictionary.message(MessageKey::RouteNotFound), "Introuvable");
        assert_eq!(services.provider::<dyn Dictionary>(), Some("french"));
        assert_eq!(services.provider::<EngineConfig>(), Some("core"));
    }

    #[test]
    fn duplicate_plugin_names_are_rejected() {
        let err = Bootstrap::new()
            .plugin(Messages::new("a", "x"))
            .plugin(Messages::new("a", "y"))
            .init()
            .err()
            .unwrap();
        assert!(matches!(err, BootstrapError::DuplicatePlugin { name } if name == "a"));
    }

    #[test]
    fn engine_requires_a_config() {
        let services = Bootstrap::new().init().unwrap();
        let err = Engine::from_services(&services, DefaultContextFactory).err().unwrap();
        assert!(matches!(err, BootstrapError::MissingCapability { .. }));
    }

    struct Routes;

    impl Plugin for Routes {
        fn name(&self) -> &str {
            "routes"
        }

        fn register(&self, binder: &mut Binder) -> Result<(), BootstrapError> {
            let router: Router<DefaultContext> = Router::new(Arc::new(EngineConfig::default()));
            router
                .get("/ping")
                .save(|ctx: &mut DefaultContext| {
                    ctx.response_mut().send_plain_text("pong");
                    Ok(Flow::Continue)
                })
                .map_err(|e| BootstrapError::Plugin {
                    plugin: "routes".to_owned(),
                    message: e.to_string(),
                })?;
            binder.bind(Arc::new(router))
        }
    }

    #[test]
    fn engine_uses_bound_router_and_dictionary() {
        let services = Bootstrap::new()
            .plugin(CorePlugin::new(EngineConfig::default()).without_dictionary())
            .plugin(Messages::new("french", "Introuvable"))
            .plugin(Routes)
            .init()
            .unwrap();
        let engine = Engine::from_services(&services, DefaultContextFactory).unwrap();

        let ping = Arc::new(BufferedExchange::new(Method::Get, "http://localhost/ping"));
        engine.handle(ping.clone()).unwrap();
        assert_eq!(ping.body_string(), "pong");

        let missing = Arc::new(BufferedExchange::new(Method::Get, "http://localhost/nope"));
        engine.handle(missing.clone()).unwrap();
        assert_eq!(missing.body_string(), "Introuvable");
    }
}
