//! Session ownership and token persistence.
//!
//! This module provides:
//! - `Session`: the token and cached user record, kept in sync with a store
//! - `KeyValueStore`: memory, file and OS keychain backends
//! - `TokenClaims`: advisory, unverified expiry decoding of JWT tokens

pub mod claims;
pub mod session;
pub mod store;

use std::sync::Arc;

pub use claims::{token_status, ClaimsError, TokenClaims, TokenStatus};
pub use session::{Session, SessionError};
pub use store::{FileStore, KeyValueStore, KeyringStore, MemoryStore, TOKEN_KEY, USER_KEY};

use crate::config::{Config, ConfigError, StoreKind};

/// Build the store selected by the config.
pub fn open_store(config: &Config) -> Result<Arc<dyn KeyValueStore>, ConfigError> {
    let store: Arc<dyn KeyValueStore> = match config.token_store {
        StoreKind::File => Arc::new(FileStore::new(&config.data_dir()?)),
        StoreKind::Keyring => Arc::new(KeyringStore),
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}
