//! Login-server handler that keeps the client on the relay.
//!
//! The server list gets a visible suffix on every entry, and the world
//! endpoints announced on world selection are swapped for local listeners.
//! Each swapped endpoint is reported on a channel so the service can start a
//! listener relaying to the real world server.

use crate::config::{ListenerConfig, RedirectConfig, WorldRoute};
use crate::error::Result;
use crate::protocol::dispatcher::{Direction, Dispatcher, Verdict};
use crate::protocol::event::{Event, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const SERVER_LIST: &str = "S_SERVER_LIST";
pub const SELECT_WORLD: &str = "S_SELECT_WORLD";

#[derive(Debug, Clone)]
pub struct LoginRedirect {
    suffix: String,
    worlds: Vec<WorldRoute>,
    spawner: Option<mpsc::UnboundedSender<ListenerConfig>>,
}

impl LoginRedirect {
    pub fn new(config: &RedirectConfig) -> Self {
        Self {
            suffix: config.server_name_suffix.clone(),
            worlds: config.worlds.clone(),
            spawner: None,
        }
    }

    /// Report redirected world endpoints on `spawner`
    pub fn with_spawner(mut self, spawner: mpsc::UnboundedSender<ListenerConfig>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Register for both login messages on `dispatcher`
    pub fn install(self, dispatcher: &Dispatcher) -> Result<()> {
        let this = Arc::new(self);
        let list = Arc::clone(&this);
        dispatcher.register(SERVER_LIST, move |_, event, direction| {
            list.server_list(event, direction)
        })?;
        dispatcher.register(SELECT_WORLD, move |_, event, direction| {
            this.select_world(event, direction)
        })?;
        Ok(())
    }

    pub fn server_list(&self, event: &Event, direction: Direction) -> Verdict {
        if !direction.is_from_server() {
            return Verdict::Forward;
        }

        let mut event = event.clone();
        let Some(servers) = event.get_mut("servers").and_then(Value::as_array_mut) else {
            warn!("Server list without servers");
            return Verdict::Forward;
        };
        for server in servers.iter_mut() {
            let name = format!("{}{}", server.get_str("name").unwrap_or_default(), self.suffix);
            server.insert("name", name);
        }
        Verdict::Rewrite(event)
    }

    pub fn select_world(&self, event: &Event, direction: Direction) -> Verdict {
        if !direction.is_from_server() || self.worlds.is_empty() {
            return Verdict::Forward;
        }

        let mut event = event.clone();
        let mut changed = false;
        for route in &self.worlds {
            let Some(remote) = event.get_str(&route.field).map(str::to_string) else {
                warn!(field = %route.field, "World address field missing");
                continue;
            };
            if remote == route.local_address {
                continue;
            }

            info!(field = %route.field, %remote, local = %route.local_address, "Redirecting world");
            event.insert(route.field.clone(), route.local_address.clone());
            changed = true;

            if let Some(ref spawner) = self.spawner {
                let listener = ListenerConfig::new(
                    format!("world:{}", route.field),
                    route.local_address.clone(),
                    remote,
                );
                if spawner.send(listener).is_err() {
                    warn!(field = %route.field, "World listener channel closed");
                }
            }
        }

        if changed {
            Verdict::Rewrite(event)
        } else {
            Verdict::Forward
        }
    }
}
