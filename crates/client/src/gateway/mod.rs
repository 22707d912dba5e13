//! Remote resource gateway.
//!
//! A single typed entry point for every backend call. Each call attaches the
//! bearer token from the session, is bounded by the configured timeout and
//! maps the outcome onto [`ClientError`]. A 401 triggers exactly one token
//! refresh and one retry; a second 401 (or a failed refresh) clears the
//! session and surfaces [`ClientError::Auth`].

mod auth;
mod endpoints;

use std::sync::{Arc, OnceLock};

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::session::Session;

pub use endpoints::{CheckoutSession, PlacedOrder};

type LogoutHook = Box<dyn Fn() + Send + Sync>;

// =============================================================================
// ApiRequest
// =============================================================================

/// A backend call described independently of the transport.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    authenticated: bool,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            authenticated: true,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query-string parameter.
    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Send without a bearer token.
    #[must_use]
    pub const fn public(mut self) -> Self {
        self.authenticated = false;
        self
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// HTTP client for the marketplace backend.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    client: reqwest::Client,
    config: ClientConfig,
    session: Session,
    /// Held while a token refresh is in flight so concurrent 401s share it
    refresh_lock: Mutex<()>,
    logout_hook: OnceLock<LogoutHook>,
}

impl Gateway {
    /// Create a gateway for `config`, authenticating with `session`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Network` if the HTTP client cannot be built.
    pub fn new(config: ClientConfig, session: Session) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            inner: Arc::new(GatewayInner {
                client,
                config,
                session,
                refresh_lock: Mutex::new(()),
                logout_hook: OnceLock::new(),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Register a callback run after a forced logout. Only the first
    /// registration takes effect.
    pub fn on_forced_logout(&self, hook: impl Fn() + Send + Sync + 'static) {
        let _ = self.inner.logout_hook.set(Box::new(hook));
    }

    /// Send a request and decode the response body as `T`.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] for transport, status, or decode
    /// failures.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let value = self.send_value(request).await?;
        serde_json::from_value(value).map_err(|e| {
            error!(error = %e, "Failed to decode backend response");
            ClientError::Decode(e.to_string())
        })
    }

    /// Send a request whose response body is irrelevant.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] for transport or status failures.
    pub async fn send_unit(&self, request: ApiRequest) -> Result<(), ClientError> {
        self.send_value(request).await.map(|_| ())
    }

    /// Send a request and return the raw JSON body (`Null` when empty).
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] for transport or status failures.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send_value(&self, request: ApiRequest) -> Result<Value, ClientError> {
        if !request.authenticated {
            return self.execute(&request, None).await;
        }

        let token = self.inner.session.token().await?;
        match self.execute(&request, Some(&token)).await {
            Err(ClientError::Auth) => {
                debug!("Received 401, refreshing session");
                self.refresh_after(&token).await?;
                let token = self.inner.session.token().await.map_err(|_| ClientError::Auth)?;
                match self.execute(&request, Some(&token)).await {
                    Err(ClientError::Auth) => {
                        warn!("Still unauthorized after refresh, forcing logout");
                        self.force_logout().await;
                        Err(ClientError::Auth)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Perform one HTTP exchange without any auth recovery.
    async fn execute(
        &self,
        request: &ApiRequest,
        token: Option<&SecretString>,
    ) -> Result<Value, ClientError> {
        let url = self.inner.config.endpoint(&request.path);
        let mut builder = self.inner.client.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Auth);
        }

        // Get response body as text first for better error diagnostics
        let text = response.text().await.map_err(|e| self.transport_error(&e))?;

        if !status.is_success() {
            let message = if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("Unknown error").to_string()
            } else {
                text.chars().take(200).collect()
            };
            warn!(status = status.as_u16(), body = %message, "Backend returned non-success status");
            return Err(ClientError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|e| {
            debug!(
                error = %e,
                body = %text.chars().take(500).collect::<String>(),
                "Response body is not JSON, keeping it as a string"
            );
            Value::String(text)
        }))
    }

    fn transport_error(&self, e: &reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout(self.inner.config.request_timeout)
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }

    /// Refresh the token unless a concurrent caller already replaced `stale`.
    async fn refresh_after(&self, stale: &SecretString) -> Result<(), ClientError> {
        let _guard = self.inner.refresh_lock.lock().await;

        match self.inner.session.token().await {
            Ok(current) if current.expose_secret() != stale.expose_secret() => {
                debug!("Session already refreshed by a concurrent request");
                return Ok(());
            }
            Ok(_) => {}
            // Another request already gave up and logged out.
            Err(_) => return Err(ClientError::Auth),
        }

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Token refresh failed, forcing logout");
            self.force_logout().await;
            return Err(ClientError::Auth);
        }
        Ok(())
    }

    async fn force_logout(&self) {
        if let Err(e) = self.inner.session.clear().await {
            error!(error = %e, "Failed to clear session");
        }
        if let Some(hook) = self.inner.logout_hook.get() {
            hook();
        }
    }
}
