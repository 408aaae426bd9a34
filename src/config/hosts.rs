//! Saved hosts and relay resolution
//!
//! The store is handed to callers explicitly. A host may name another saved
//! host as its relay; that reference is resolved into inline relay
//! credentials before the descriptor reaches the session core.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ssh::{AuthMode, ConnectionDescriptor, RelayConfig};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostStoreError {
    #[error("Host not found: {0}")]
    NotFound(String),

    #[error("Relay host not found: {0}")]
    RelayNotFound(String),

    #[error("Invalid host: {0}")]
    Invalid(String),
}

/// How a host reaches its relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayRef {
    Inline(RelayConfig),
    Stored { id: String },
}

/// One saved host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: String,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default)]
    pub auth_mode: AuthMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayRef>,
}

fn default_port() -> u16 {
    22
}

impl HostRecord {
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
    ) -> Self {
        let host = host.into();
        Self {
            id: id.into(),
            name: host.clone(),
            host,
            port,
            username: username.into(),
            password: None,
            private_key: None,
            auth_mode: AuthMode::Auto,
            relay: None,
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn relay(mut self, relay: RelayRef) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Host and username non-blank, port non-zero, inline relay complete
    pub fn validate(&self) -> Result<(), HostStoreError> {
        validate_endpoint(&self.host, self.port, &self.username, "host")?;
        if let Some(RelayRef::Inline(relay)) = &self.relay {
            validate_endpoint(&relay.host, relay.port, &relay.username, "relay")?;
        }
        Ok(())
    }
}

fn validate_endpoint(
    host: &str,
    port: u16,
    username: &str,
    what: &str,
) -> Result<(), HostStoreError> {
    if host.trim().is_empty() {
        return Err(HostStoreError::Invalid(format!("{} address is empty", what)));
    }
    if username.trim().is_empty() {
        return Err(HostStoreError::Invalid(format!("{} username is empty", what)));
    }
    if port == 0 {
        return Err(HostStoreError::Invalid(format!("{} port must be 1-65535", what)));
    }
    Ok(())
}

/// Lookup of saved hosts
pub trait HostStore: Send + Sync {
    fn get(&self, id: &str) -> Option<HostRecord>;

    fn list(&self) -> Vec<HostRecord>;
}

/// In-memory store
#[derive(Default)]
pub struct MemoryHostStore {
    hosts: RwLock<HashMap<String, HostRecord>>,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = HostRecord>) -> Self {
        let store = Self::new();
        {
            let mut hosts = store.hosts.write();
            for record in records {
                hosts.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Insert or replace after validation
    pub fn upsert(&self, record: HostRecord) -> Result<(), HostStoreError> {
        record.validate()?;
        self.hosts.write().insert(record.id.clone(), record);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Option<HostRecord> {
        self.hosts.write().remove(id)
    }
}

impl HostStore for MemoryHostStore {
    fn get(&self, id: &str) -> Option<HostRecord> {
        self.hosts.read().get(id).cloned()
    }

    fn list(&self) -> Vec<HostRecord> {
        let mut records: Vec<HostRecord> = self.hosts.read().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}

/// Build the descriptor for `record`, resolving a stored relay reference.
///
/// A reference to a host that no longer exists is an error; the relay is
/// never dropped silently.
pub fn resolve_descriptor(
    record: &HostRecord,
    store: &dyn HostStore,
) -> Result<ConnectionDescriptor, HostStoreError> {
    record.validate()?;

    let relay = match &record.relay {
        None => None,
        Some(RelayRef::Inline(relay)) => Some(relay.clone()),
        Some(RelayRef::Stored { id }) => {
            if id == &record.id {
                return Err(HostStoreError::Invalid("host cannot relay through itself".into()));
            }
            let jump = store
                .get(id)
                .ok_or_else(|| HostStoreError::RelayNotFound(id.clone()))?;
            validate_endpoint(&jump.host, jump.port, &jump.username, "relay")?;
            Some(RelayConfig::new(
                jump.host,
                jump.port,
                jump.username,
                jump.password,
            ))
        }
    };

    tracing::debug!(
        "Resolved host {} ({}@{}:{}, relay: {})",
        record.id,
        record.username,
        record.host,
        record.port,
        relay.is_some()
    );

    Ok(ConnectionDescriptor {
        host: record.host.clone(),
        port: record.port,
        username: record.username.clone(),
        password: record.password.clone(),
        private_key: record.private_key.clone(),
        auth_mode: record.auth_mode,
        relay,
    })
}

/// Resolve a saved host by id
pub fn resolve_by_id(
    id: &str,
    store: &dyn HostStore,
) -> Result<ConnectionDescriptor, HostStoreError> {
    let record = store
        .get(id)
        .ok_or_else(|| HostStoreError::NotFound(id.to_string()))?;
    resolve_descriptor(&record, store)
}
