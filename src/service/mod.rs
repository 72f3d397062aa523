//! # Proxy Service
//!
//! Runs every configured relay listener against one shared
//! [`SessionContext`](crate::protocol::session::SessionContext), installs the
//! login redirect on the login listener and starts world listeners on demand.

pub mod proxy;

pub use proxy::{ProxyHandle, ProxyService};
