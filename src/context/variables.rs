//! Request-scoped variables.
//!
//! The engine and the handlers of one exchange share state through this bag.
//! Keys are a closed set so unrelated handlers can't collide on free-form names.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::router::{HandlerError, RouteHandlerMatch, RoutingResult};

/// The recognized variable keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKey {
    /// The routing result whose chain is running.
    RoutingResult,
    /// The routing result that was running when exception handling started.
    OriginalRoutingResult,
    /// The handler currently invoked.
    RouteHandlerMatch,
    /// The error being handled.
    Exception,
    /// `true` while a not-found chain runs.
    IsNotFoundRoute,
    /// `true` while an exception chain runs.
    IsExceptionHandling,
    /// How many times the exchange was forwarded.
    ForwardedCount,
    /// The message attached to the last forward.
    ForwardMessage,
    /// The URL of the last forward.
    ForwardUrl,
    /// Public message for the not-found handler.
    NotFoundPublicMessage,
}

/// A variable value.
pub enum Variable<C> {
    Routing(Arc<RoutingResult<C>>),
    HandlerMatch(Arc<RouteHandlerMatch<C>>),
    Error(Arc<HandlerError>),
    Flag(bool),
    Count(u32),
    Text(String),
}

impl<C> Clone for Variable<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Routing(value) => Self::Routing(Arc::clone(value)),
            Self::HandlerMatch(value) => Self::HandlerMatch(Arc::clone(value)),
            Self::Error(value) => Self::Error(Arc::clone(value)),
            Self::Flag(value) => Self::Flag(*value),
            Self::Count(value) => Self::Count(*value),
            Self::Text(value) => Self::Text(value.clone()),
        }
    }
}

impl<C> fmt::Debug for Variable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routing(value) => f.debug_tuple("Routing").field(&value.path()).finish(),
            Self::HandlerMatch(value) => f
                .debug_tuple("HandlerMatch")
                .field(&value.route_path())
                .finish(),
            Self::Error(value) => f.debug_tuple("Error").field(value).finish(),
            Self::Flag(value) => f.debug_tuple("Flag").field(value).finish(),
            Self::Count(value) => f.debug_tuple("Count").field(value).finish(),
            Self::Text(value) => f.debug_tuple("Text").field(value).finish(),
        }
    }
}

/// The per-exchange variable bag.
pub struct Variables<C> {
    map: HashMap<VariableKey, Variable<C>>,
}

impl<C> Default for Variables<C> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<C> fmt::Debug for Variables<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.map.iter()).finish()
    }
}

impl<C> Variables<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: VariableKey) -> Option<&Variable<C>> {
        self.map.get(&key)
    }

    pub fn set(&mut self, key: VariableKey, value: Variable<C>) {
        self.map.insert(key, value);
    }

    pub fn remove(&mut self, key: VariableKey) -> Option<Variable<C>> {
        self.map.remove(&key)
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn routing_result(&self) -> Option<&Arc<RoutingResult<C>>> {
        match self.get(VariableKey::RoutingResult) {
            Some(Variable::Routing(value)) => Some(value),
            _ => None,
        }
    }

    pub fn original_routing_result(&self) -> Option<&Arc<RoutingResult<C>>> {
        match self.get(VariableKey::OriginalRoutingResult) {
            Some(Variable::Routing(value)) => Some(value),
            _ => None,
        }
    }

    pub fn route_handler_match(&self) -> Option<&Arc<RouteHandlerMatch<C>>> {
        match self.get(VariableKey::RouteHandlerMatch) {
            Some(Variable::HandlerMatch(value)) => Some(value),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<&HandlerError> {
        match self.get(VariableKey::Exception) {
            Some(Variable::Error(value)) => Some(value),
            _ => None,
        }
    }

    pub fn is_not_found_route(&self) -> bool {
        self.flag(VariableKey::IsNotFoundRoute)
    }

    pub fn is_exception_handling(&self) -> bool {
        self.flag(VariableKey::IsExceptionHandling)
    }

    pub fn forwarded_count(&self) -> u32 {
        match self.get(VariableKey::ForwardedCount) {
            Some(Variable::Count(value)) => *value,
            _ => 0,
        }
    }

    pub fn forward_message(&self) -> Option<&str> {
        self.text(VariableKey::ForwardMessage)
    }

    pub fn forward_url(&self) -> Option<&str> {
        self.text(VariableKey::ForwardUrl)
    }

    pub fn not_found_message(&self) -> Option<&str> {
        self.text(VariableKey::NotFoundPublicMessage)
    }

    fn flag(&self, key: VariableKey) -> bool {
        matches!(self.get(key), Some(Variable::Flag(true)))
    }

    fn text(&self, key: VariableKey) -> Option<&str> {
        match self.get(key) {
            Some(Variable::Text(value)) => Some(value),
            _ => None,
        }
    }
}
