//! # Handler Registry
use std::sync::Arc;

use serde_json::Value;

use crate::core::context::JapiContext;
use crate::error::JapiError;

/// Prefix reserved for the built-in request names.
pub(crate) const RESERVED_PREFIX: &str = "japi_";

/// A request handler mutates the response data object based on the request
/// arguments. Handlers capture whatever shared state they need.
pub type RequestHandler = Arc<dyn Fn(&JapiContext, &Value, &mut Value) + Send + Sync>;

struct HandlerEntry {
    name: String,
    handler: RequestHandler,
}

/// Insertion-ordered mapping from request name to handler.
///
/// Names are unique under case-insensitive comparison and lookups scan the
/// list in registration order.
pub(crate) struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
}

impl HandlerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a handler under `name`.
    ///
    /// `reserved_prefix_locked` is false only while the built-in handlers
    /// are registered at context creation; afterwards names starting with
    /// the reserved prefix are rejected.
    pub(crate) fn register(
        &mut self,
        name: &str,
        handler: RequestHandler,
        reserved_prefix_locked: bool,
    ) -> Result<(), JapiError> {
        if name.is_empty() {
            return Err(JapiError::InvalidArgument("request name is empty".to_string()));
        }
        if self.lookup(name).is_some() {
            return Err(JapiError::Duplicate(name.to_string()));
        }
        if reserved_prefix_locked && name.starts_with(RESERVED_PREFIX) {
            return Err(JapiError::ReservedName(name.to_string()));
        }

        self.entries.push(HandlerEntry {
            name: name.to_string(),
            handler,
        });
        Ok(())
    }

    /// Linear scan over the registration-ordered list, case-insensitive.
    pub(crate) fn lookup(&self, name: &str) -> Option<RequestHandler> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| Arc::clone(&entry.handler))
    }

    /// Registered request names, in registration order.
    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }
}
