//! Client context shared by every screen.
//!
//! Owns the process-wide singletons (session, gateway, query cache, mutation
//! engine and realtime adapter) and is passed explicitly to whoever needs
//! them. Cheap to clone.

use std::sync::Arc;

use regusto_core::UserId;
use secrecy::SecretString;
use tracing::{info, instrument, warn};

use crate::cache::QueryCache;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::gateway::Gateway;
use crate::mutation::MutationEngine;
use crate::realtime::{ChannelAdapter, PusherConnector, RealtimeConnector};
use crate::session::{FileSessionStore, MemorySessionStore, Session, SessionStore};

/// Everything the cache/sync core needs, wired together.
#[derive(Clone)]
pub struct ClientContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    gateway: Gateway,
    cache: QueryCache,
    mutations: MutationEngine,
    channels: Option<ChannelAdapter>,
}

impl ClientContext {
    /// Build a context from configuration.
    ///
    /// The session is kept in `config.session_file` when set, in memory
    /// otherwise. Realtime is enabled when `config.pusher` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let store: Arc<dyn SessionStore> = match &config.session_file {
            Some(path) => Arc::new(FileSessionStore::new(path)),
            None => Arc::new(MemorySessionStore::new()),
        };
        let connector = config.pusher.as_ref().map(|pusher| {
            Arc::new(PusherConnector::new(pusher, config.request_timeout))
                as Arc<dyn RealtimeConnector>
        });
        Self::with_parts(config, store, connector)
    }

    /// Build a context from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_parts(
        config: ClientConfig,
        store: Arc<dyn SessionStore>,
        connector: Option<Arc<dyn RealtimeConnector>>,
    ) -> Result<Self, ClientError> {
        let cache = QueryCache::from_config(&config);
        let mutations = MutationEngine::new(cache.clone());
        let channels = connector
            .map(|connector| ChannelAdapter::new(connector, cache.clone(), config.reconnect));
        let gateway = Gateway::new(config, Session::new(store))?;

        // A forced logout leaves nothing of the old session behind.
        gateway.on_forced_logout({
            let cache = cache.clone();
            let channels = channels.clone();
            move || {
                if let Some(channels) = &channels {
                    channels.close_all();
                }
                cache.clear();
            }
        });

        Ok(Self {
            inner: Arc::new(ContextInner {
                gateway,
                cache,
                mutations,
                channels,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        self.inner.gateway.config()
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        self.inner.gateway.session()
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.inner.gateway
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn mutations(&self) -> &MutationEngine {
        &self.inner.mutations
    }

    /// The realtime adapter.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Channel` when realtime is not configured.
    pub fn channels(&self) -> Result<&ChannelAdapter, ClientError> {
        self.inner
            .channels
            .as_ref()
            .ok_or_else(|| ClientError::Channel("realtime is not configured".to_string()))
    }

    /// Sign in, dropping anything cached for a previous user.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Auth` for rejected credentials, or the mapped
    /// transport error.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &SecretString) -> Result<UserId, ClientError> {
        let user_id = self.inner.gateway.sign_in(email, password).await?;
        self.inner.cache.clear();
        Ok(user_id)
    }

    /// Forget the session, every cached query and every open channel.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Session` if the session store cannot be cleared;
    /// the cache and channels are dropped regardless.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Result<(), ClientError> {
        if let Some(channels) = &self.inner.channels {
            channels.close_all();
        }
        self.inner.cache.clear();
        let cleared = self.session().clear().await;
        match &cleared {
            Ok(()) => info!("Signed out"),
            Err(e) => warn!(error = %e, "Session store not cleared on sign-out"),
        }
        cleared
    }
}
