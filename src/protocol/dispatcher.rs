use crate::core::node::Node;
use crate::error::{constants, ProtocolError, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&Node) -> Result<()> + Send + Sync + 'static;

#[derive(Default)]
struct Route {
    by_kind: HashMap<Cow<'static, str>, Box<HandlerFn>>,
    fallback: Option<Box<HandlerFn>>,
}

/// Routes decoded nodes to application handlers by `(description, type)`.
///
/// A handler registered without a type catches every node with that
/// description that has no more specific handler.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RwLock<HashMap<Cow<'static, str>, Route>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, description: &str, kind: Option<&str>, handler: F) -> Result<()>
    where
        F: Fn(&Node) -> Result<()> + Send + Sync + 'static,
    {
        let mut routes = self.routes.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        let route = routes
            .entry(Cow::Owned(description.to_string()))
            .or_default();
        match kind {
            Some(kind) => {
                route
                    .by_kind
                    .insert(Cow::Owned(kind.to_string()), Box::new(handler));
            }
            None => route.fallback = Some(Box::new(handler)),
        }
        Ok(())
    }

    /// Run the handler for `node`. Returns `false` when nothing matched.
    pub fn dispatch(&self, node: &Node) -> Result<bool> {
        let routes = self.routes.read().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string())
        })?;

        let Some(route) = routes.get(node.description()) else {
            return Ok(false);
        };
        let handler = node
            .kind()
            .and_then(|kind| route.by_kind.get(kind))
            .or(route.fallback.as_ref());

        match handler {
            Some(handler) => handler(node).map(|_| true),
            None => Ok(false),
        }
    }
}
