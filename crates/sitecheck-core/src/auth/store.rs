use std::collections::HashMap;
use std::sync::Mutex;

use keyring::Entry;

use super::AuthError;

/// Keyring service name scoping the credential pair to this installation
const SERVICE_NAME: &str = "sitecheck";

/// Keys under which the credential pair is persisted.
/// Expiries are millisecond-epoch values stored as strings.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const ACCESS_EXPIRY_KEY: &str = "access_expiry";
pub const REFRESH_EXPIRY_KEY: &str = "refresh_expiry";

/// Durable key-value persistence for the credential pair.
///
/// A successful `set` must be readable after the call returns. Failures are
/// `AuthError::Storage` and must propagate to the caller; they are never
/// retried here since retrying a broken store is unlikely to help.
pub trait TokenStore: Send + Sync {
    /// Returns the stored value, or `None` if the key was never set or
    /// has been deleted.
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;

    /// Stores a value, overwriting any prior value for the key.
    fn set(&self, key: &str, value: &str) -> Result<(), AuthError>;

    /// Removes an entry. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), AuthError>;
}

/// Token store backed by the OS keychain.
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Use a non-default service name (e.g. for side-by-side installs).
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, AuthError> {
        Entry::new(&self.service, key).map_err(AuthError::from)
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.entry(key)?.set_password(value).map_err(AuthError::from)
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-process token store.
///
/// Used by tests and as a fallback on hosts without a keychain; tokens do
/// not survive a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AuthError> {
        self.entries
            .lock()
            .map_err(|_| AuthError::Storage("token store mutex poisoned".to_string()))
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), AuthError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
