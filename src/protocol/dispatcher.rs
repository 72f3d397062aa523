use crate::error::{constants, ProtocolError, Result};
use crate::protocol::event::Event;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Which peer a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    FromClient,
    FromServer,
}

impl Direction {
    pub fn is_from_server(self) -> bool {
        self == Direction::FromServer
    }

    /// Direction of the frame travelling the other way
    pub fn reverse(self) -> Self {
        match self {
            Direction::FromClient => Direction::FromServer,
            Direction::FromServer => Direction::FromClient,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::FromClient => "client->server",
            Direction::FromServer => "server->client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Forward nothing to either peer
    Drop,
    /// Forward the original wire bytes untouched
    Forward,
    /// Re-serialize this event and forward the result
    Rewrite(Event),
}

type HandlerFn = dyn Fn(&str, &Event, Direction) -> Verdict + Send + Sync + 'static;

/// Routes decoded messages to handlers by message name.
/// Statically named handlers are keyed without allocating.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, Box<HandlerFn>>>>,
    fallback: Option<Box<HandlerFn>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handler_count())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            fallback: None,
        }
    }

    /// Callback consulted for every message without a named handler
    pub fn with_fallback<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &Event, Direction) -> Verdict + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(handler));
        self
    }

    pub fn register<F>(&self, name: impl Into<Cow<'static, str>>, handler: F) -> Result<()>
    where
        F: Fn(&str, &Event, Direction) -> Verdict + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        handlers.insert(name.into(), Box::new(handler));
        Ok(())
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    /// Ask the handler for `name` what to do with `event`.
    /// Messages nobody handles are forwarded.
    pub fn dispatch(&self, name: &str, event: &Event, direction: Direction) -> Result<Verdict> {
        let handlers = self.handlers.read().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string())
        })?;

        let verdict = match (handlers.get(name), &self.fallback) {
            (Some(handler), _) => handler(name, event, direction),
            (None, Some(fallback)) => fallback(name, event, direction),
            (None, None) => Verdict::Forward,
        };
        trace!(name, %direction, ?verdict, "Dispatched");
        Ok(verdict)
    }
}
