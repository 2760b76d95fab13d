//! Localized messages the engine shows to clients.

use std::collections::HashMap;

/// Keys of the messages the engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Body of the default not-found handler.
    RouteNotFound,
    /// Generic message replacing the details of a private error.
    ExceptionDefault,
}

/// Resolves a [`MessageKey`] to localized text.
pub trait Dictionary: Send + Sync {
    fn message(&self, key: MessageKey) -> String;
}

/// English messages, individually overridable.
///
/// ```
/// use frontline::dictionary::{DefaultDictionary, Dictionary, MessageKey};
///
/// let dictionary = DefaultDictionary::new().with(MessageKey::RouteNotFound, "Nothing here");
/// assert_eq!(dictionary.message(MessageKey::RouteNotFound), "Nothing here");
/// assert_eq!(dictionary.message(MessageKey::ExceptionDefault), "An error occurred.");
/// ```
#[derive(Debug, Clone, Default)]
pub struct DefaultDictionary {
    overrides: HashMap<MessageKey, String>,
}

impl DefaultDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the text of one message.
    #[must_use]
    pub fn with(mut self, key: MessageKey, text: impl Into<String>) -> Self {
        self.overrides.insert(key, text.into());
        self
    }
}

impl Dictionary for DefaultDictionary {
    fn message(&self, key: MessageKey) -> String {
        if let Some(text) = self.overrides.get(&key) {
            return text.clone();
        }
        match key {
            MessageKey::RouteNotFound => "Not found",
            MessageKey::ExceptionDefault => "An error occurred.",
        }
        .to_owned()
    }
}
