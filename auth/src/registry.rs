use std::collections::HashMap;
use std::sync::Arc;

use log::*;

use crate::handler::AuthHandler;

/// Authentication handlers keyed by scheme name.
#[derive(Default, Clone)]
pub struct Registry {
    handlers: HashMap<&'static str, Arc<dyn AuthHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. A later handler for the same scheme replaces the earlier one.
    pub fn with_handler(mut self, handler: Arc<dyn AuthHandler>) -> Self {
        let scheme = handler.scheme();
        if self.handlers.insert(scheme, handler).is_some() {
            warn!("Auth handler for scheme '{scheme}' registered twice, keeping the last one");
        } else {
            debug!("Registered auth handler for scheme '{scheme}'");
        }
        self
    }

    /// Looks up a handler, ignoring case of the scheme name.
    pub fn handler(&self, scheme: &str) -> Option<Arc<dyn AuthHandler>> {
        self.handlers.get(scheme.to_ascii_lowercase().as_str()).cloned()
    }

    pub fn schemes(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
