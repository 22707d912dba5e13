//! Persisted session storage.
//!
//! The session lives in an opaque key-value store that survives process
//! restarts, under three keys: `token`, `userid` and `refreshToken`.
//! [`Session`] wraps a [`SessionStore`] with typed accessors and broadcasts
//! [`SessionEvent`]s so screens can react to a forced logout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use regusto_core::UserId;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info};

use crate::error::ClientError;

/// Key holding the bearer token.
pub const TOKEN_KEY: &str = "token";
/// Key holding the signed-in user id.
pub const USER_ID_KEY: &str = "userid";
/// Key holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Durable key-value storage for session credentials.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, ClientError>;
    /// Write a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;
    /// Delete a value. Deleting a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), ClientError>;
}

/// Process-local session store, lost on exit.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Session store persisted as a JSON object in a single file.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<HashMap<String, String>, ClientError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| ClientError::Session(format!("corrupt session file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(ClientError::Session(e.to_string())),
        }
    }

    async fn save(&self, values: &HashMap<String, String>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ClientError::Session(e.to_string()))?;
        }
        let bytes = serde_json::to_vec(values)?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| ClientError::Session(e.to_string()))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values).await
    }

    async fn remove(&self, key: &str) -> Result<(), ClientError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        if values.remove(key).is_some() {
            self.save(&values).await?;
        }
        Ok(())
    }
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials were stored after a sign-in.
    SignedIn(UserId),
    /// The bearer token was replaced using the refresh token.
    Refreshed,
    /// Credentials were cleared; the user must sign in again.
    LoggedOut,
}

/// Bearer token plus the user it belongs to.
#[derive(Clone)]
pub struct Credentials {
    pub token: SecretString,
    pub user_id: UserId,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Typed view over the persisted session.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { store, events }
    }

    /// Subscribe to session lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The current bearer token.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Session` if no token is stored.
    pub async fn token(&self) -> Result<SecretString, ClientError> {
        self.store
            .get(TOKEN_KEY)
            .await?
            .map(SecretString::from)
            .ok_or_else(|| ClientError::Session("no token found".to_string()))
    }

    /// Token and user id together, as most user-scoped endpoints need both.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Session` if either is missing.
    pub async fn credentials(&self) -> Result<Credentials, ClientError> {
        let token = self.store.get(TOKEN_KEY).await?;
        let user_id = self.store.get(USER_ID_KEY).await?;
        match (token, user_id) {
            (Some(token), Some(user_id)) => Ok(Credentials {
                token: SecretString::from(token),
                user_id: UserId::new(user_id),
            }),
            _ => Err(ClientError::Session("no token or user id found".to_string())),
        }
    }

    /// The stored refresh token, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn refresh_token(&self) -> Result<Option<SecretString>, ClientError> {
        Ok(self
            .store
            .get(REFRESH_TOKEN_KEY)
            .await?
            .map(SecretString::from))
    }

    /// Whether a token is stored.
    pub async fn is_signed_in(&self) -> bool {
        matches!(self.store.get(TOKEN_KEY).await, Ok(Some(_)))
    }

    /// Persist credentials after a sign-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn store_sign_in(
        &self,
        token: &SecretString,
        refresh_token: Option<&SecretString>,
        user_id: &UserId,
    ) -> Result<(), ClientError> {
        self.store.set(TOKEN_KEY, token.expose_secret()).await?;
        self.store.set(USER_ID_KEY, user_id.as_str()).await?;
        match refresh_token {
            Some(refresh) => {
                self.store
                    .set(REFRESH_TOKEN_KEY, refresh.expose_secret())
                    .await?;
            }
            None => self.store.remove(REFRESH_TOKEN_KEY).await?,
        }
        info!(user_id = %user_id, "Session stored");
        let _ = self.events.send(SessionEvent::SignedIn(user_id.clone()));
        Ok(())
    }

    /// Replace the bearer (and optionally refresh) token after a refresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn store_refresh(
        &self,
        token: &SecretString,
        refresh_token: Option<&SecretString>,
    ) -> Result<(), ClientError> {
        self.store.set(TOKEN_KEY, token.expose_secret()).await?;
        if let Some(refresh) = refresh_token {
            self.store
                .set(REFRESH_TOKEN_KEY, refresh.expose_secret())
                .await?;
        }
        debug!("Session token refreshed");
        let _ = self.events.send(SessionEvent::Refreshed);
        Ok(())
    }

    /// Drop all credentials and broadcast `LoggedOut`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn clear(&self) -> Result<(), ClientError> {
        self.store.remove(TOKEN_KEY).await?;
        self.store.remove(USER_ID_KEY).await?;
        self.store.remove(REFRESH_TOKEN_KEY).await?;
        info!("Session cleared");
        let _ = self.events.send(SessionEvent::LoggedOut);
        Ok(())
    }
}
