//! Per-request context.
//!
//! The engine never knows the concrete context type. It only needs the
//! [`RequestContext`] capability, giving access to the request data, the
//! buffered response, the variables bag and a typed extension map. Applications
//! plug their own context type in through a [`ContextFactory`]:
//!
//! ```
//! use std::sync::Arc;
//! use frontline::context::{ContextCore, ContextError, ContextFactory, RequestContext};
//! use frontline::http::Exchange;
//!
//! struct AppContext {
//!     core: ContextCore<AppContext>,
//!     tenant: String,
//! }
//!
//! impl RequestContext for AppContext {
//!     fn core(&self) -> &ContextCore<Self> { &self.core }
//!     fn core_mut(&mut self) -> &mut ContextCore<Self> { &mut self.core }
//! }
//!
//! struct AppContextFactory;
//!
//! impl ContextFactory for AppContextFactory {
//!     type Context = AppContext;
//!
//!     fn create(&self, exchange: Arc<dyn Exchange>) -> Result<AppContext, ContextError> {
//!         let core = ContextCore::new(exchange)?;
//!         let tenant = core.request.header("x-tenant").unwrap_or("public").to_owned();
//!         Ok(AppContext { core, tenant })
//!     }
//! }
//! ```

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use thiserror::Error;

use crate::http::Exchange;

pub mod request;
pub mod response;
pub mod variables;

pub use request::RequestData;
pub use response::ResponseWriter;
pub use variables::{Variable, VariableKey, Variables};

/// Errors raised while building a context from an exchange.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid request URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to create the request context: {0}")]
    Custom(String),
}

/// Type-erased request extensions map, used to carry per-request state between
/// handlers that don't know each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Inserts a value, returning the previous one of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}

/// The facets every context carries.
pub struct ContextCore<C> {
    pub request: RequestData,
    pub response: ResponseWriter,
    pub variables: Variables<C>,
    pub extensions: Extensions,
}

impl<C> ContextCore<C> {
    /// Builds the facets of a new exchange.
    pub fn new(exchange: Arc<dyn Exchange>) -> Result<Self, ContextError> {
        let request = RequestData::from_exchange(exchange.as_ref())?;
        Ok(Self {
            request,
            response: ResponseWriter::new(exchange),
            variables: Variables::new(),
            extensions: Extensions::new(),
        })
    }
}

/// The capability set the engine requires from a context type.
pub trait RequestContext: Send + Sized + 'static {
    fn core(&self) -> &ContextCore<Self>;

    fn core_mut(&mut self) -> &mut ContextCore<Self>;

    fn request(&self) -> &RequestData {
        &self.core().request
    }

    fn request_mut(&mut self) -> &mut RequestData {
        &mut self.core_mut().request
    }

    fn response(&self) -> &ResponseWriter {
        &self.core().response
    }

    fn response_mut(&mut self) -> &mut ResponseWriter {
        &mut self.core_mut().response
    }

    fn variables(&self) -> &Variables<Self> {
        &self.core().variables
    }

    fn variables_mut(&mut self) -> &mut Variables<Self> {
        &mut self.core_mut().variables
    }

    fn extensions(&self) -> &Extensions {
        &self.core().extensions
    }

    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.core_mut().extensions
    }
}

/// Creates one context per exchange.
pub trait ContextFactory: Send + Sync + 'static {
    type Context: RequestContext;

    fn create(&self, exchange: Arc<dyn Exchange>) -> Result<Self::Context, ContextError>;
}

/// The context used when the application has no custom one.
pub struct DefaultContext {
    core: ContextCore<DefaultContext>,
}

impl RequestContext for DefaultContext {
    fn core(&self) -> &ContextCore<Self> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ContextCore<Self> {
        &mut self.core
    }
}

/// Factory for [`DefaultContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContextFactory;

impl ContextFactory for DefaultContextFactory {
    type Context = DefaultContext;

    fn create(&self, exchange: Arc<dyn Exchange>) -> Result<DefaultContext, ContextError> {
        Ok(DefaultContext {
            core: ContextCore::new(exchange)?,
        })
    }
}
