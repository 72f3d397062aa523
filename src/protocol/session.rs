//! # Session Context
//!
//! State every connection of one proxy service agrees on: the protocol version
//! detected from the version-check response, and the keystream table used for
//! XOR frames.
//!
//! One [`SessionContext`] is created per service and shared through an `Arc` by
//! the login listener and every world listener, so world connections decode
//! with the version the login exchange revealed.

use crate::core::obfuscation::{KeystreamProvider, KeystreamTable};
use crate::error::{constants, ProtocolError, Result};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

pub struct SessionContext {
    protocol_version: RwLock<Option<u32>>,
    keystream: RwLock<Option<Arc<KeystreamTable>>>,
    keystream_provider: Arc<dyn KeystreamProvider>,
    /// Pinned keystream table id; the protocol version is used when unset
    table_version: Option<u32>,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("protocol_version", &self.protocol_version())
            .field("keystream", &self.keystream().map(|t| t.version()))
            .field("table_version", &self.table_version)
            .finish()
    }
}

fn lock_error<T>(_: T) -> ProtocolError {
    ProtocolError::Custom(constants::ERR_SESSION_LOCK.to_string())
}

impl SessionContext {
    pub fn new(keystream_provider: Arc<dyn KeystreamProvider>) -> Self {
        Self {
            protocol_version: RwLock::new(None),
            keystream: RwLock::new(None),
            keystream_provider,
            table_version: None,
        }
    }

    /// Always use keystream table `table_version`, whatever protocol version is detected
    pub fn with_table_version(mut self, table_version: Option<u32>) -> Self {
        self.table_version = table_version;
        self
    }

    pub fn protocol_version(&self) -> Option<u32> {
        self.protocol_version.read().ok().and_then(|v| *v)
    }

    pub fn set_protocol_version(&self, version: u32) -> Result<()> {
        let mut current = self.protocol_version.write().map_err(lock_error)?;
        if *current != Some(version) {
            info!(protocol_version = version, previous = ?*current, "Protocol version detected");
        }
        *current = Some(version);
        Ok(())
    }

    /// Currently loaded keystream table
    pub fn keystream(&self) -> Option<Arc<KeystreamTable>> {
        self.keystream.read().ok().and_then(|t| t.clone())
    }

    /// Table id to load for `protocol_version`
    pub fn table_version_for(&self, protocol_version: u32) -> u32 {
        self.table_version.unwrap_or(protocol_version)
    }

    /// Load keystream table `table_version` unless it is already active
    pub fn init_keystream(&self, table_version: u32) -> Result<Arc<KeystreamTable>> {
        if let Some(active) = self.keystream() {
            if active.version() == table_version {
                debug!(table_version, "Keystream table already loaded");
                return Ok(active);
            }
        }

        let table = Arc::new(self.keystream_provider.load(table_version)?);
        *self.keystream.write().map_err(lock_error)? = Some(Arc::clone(&table));
        info!(table_version, "Keystream table loaded");
        Ok(table)
    }

    /// Record a detected protocol version and load its keystream table
    pub fn resolve(&self, protocol_version: u32) -> Result<Arc<KeystreamTable>> {
        self.set_protocol_version(protocol_version)?;
        self.init_keystream(self.table_version_for(protocol_version))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::obfuscation::{StaticKeystreamProvider, KEYSTREAM_LEN};

    fn provider() -> Arc<dyn KeystreamProvider> {
        Arc::new(
            StaticKeystreamProvider::new()
                .with_table(KeystreamTable::new(7, [7u8; KEYSTREAM_LEN]))
                .with_table(KeystreamTable::new(9, [9u8; KEYSTREAM_LEN])),
        )
    }

    #[test]
    fn test_resolve_uses_protocol_version_as_table_id() {
        let session = SessionContext::new(provider());
        assert_eq!(session.protocol_version(), None);
        let table = session.resolve(7).unwrap();
        assert_eq!(table.version(), 7);
        assert_eq!(session.protocol_version(), Some(7));
    }

    #[test]
    fn test_pinned_table_version_wins() {
        let session = SessionContext::new(provider()).with_table_version(Some(9));
        let table = session.resolve(7).unwrap();
        assert_eq!(table.version(), 9);
        assert_eq!(session.protocol_version(), Some(7));
    }

    #[test]
    fn test_init_keystream_reuses_active_table() {
        let session = SessionContext::new(provider());
        let first = session.init_keystream(7).unwrap();
        let second = session.init_keystream(7).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_table_keeps_previous() {
        let session = SessionContext::new(provider());
        session.init_keystream(9).unwrap();
        assert!(matches!(
            session.init_keystream(11),
            Err(ProtocolError::MissingKeystream(11))
        ));
        assert_eq!(session.keystream().unwrap().version(), 9);
    }
}
