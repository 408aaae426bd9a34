//! Configuration Management Module
//!
//! Client settings persisted as JSON, and the saved-host store that resolves
//! relay references into connection descriptors.

pub mod hosts;
pub mod settings;

pub use hosts::{
    resolve_by_id, resolve_descriptor, HostRecord, HostStore, HostStoreError, MemoryHostStore,
    RelayRef,
};
pub use settings::{
    config_dir, settings_file, ClientSettings, SettingsError, SettingsStorage, SETTINGS_VERSION,
};
