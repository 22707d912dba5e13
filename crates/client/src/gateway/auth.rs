//! Sign-in and token refresh.

use regusto_core::UserId;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use super::{ApiRequest, Gateway};
use crate::error::ClientError;

const SIGN_IN_PATH: &str = "/api/auth/signin";
const REFRESH_PATH: &str = "/api/auth/refresh";

/// Request body for email/password sign-in.
#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Response from the sign-in endpoint.
#[derive(Deserialize)]
struct SignInResponse {
    jwt: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    user: SignedInUser,
}

#[derive(Deserialize)]
struct SignedInUser {
    id: UserId,
}

/// Response from the refresh endpoint.
#[derive(Deserialize)]
struct RefreshResponse {
    jwt: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
}

impl Gateway {
    /// Authenticate with email and password and persist the session.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Auth` for rejected credentials, or the mapped
    /// transport error.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<UserId, ClientError> {
        let body = serde_json::to_value(SignInRequest {
            email,
            password: password.expose_secret(),
        })?;
        let response: SignInResponse = self
            .send(ApiRequest::post(SIGN_IN_PATH).json(body).public())
            .await?;

        let token = SecretString::from(response.jwt);
        let refresh = response.refresh_token.map(SecretString::from);
        self.inner
            .session
            .store_sign_in(&token, refresh.as_ref(), &response.user.id)
            .await?;

        info!(user_id = %response.user.id, "Signed in");
        Ok(response.user.id)
    }

    /// Exchange the stored refresh token for a new bearer token.
    pub(super) async fn refresh(&self) -> Result<(), ClientError> {
        let refresh_token = self
            .inner
            .session
            .refresh_token()
            .await?
            .ok_or(ClientError::Auth)?;

        let request = ApiRequest::post(REFRESH_PATH)
            .json(json!({ "refreshToken": refresh_token.expose_secret() }))
            .public();
        let value = self.execute(&request, None).await?;
        let response: RefreshResponse = serde_json::from_value(value)?;

        self.inner
            .session
            .store_refresh(
                &SecretString::from(response.jwt),
                response.refresh_token.map(SecretString::from).as_ref(),
            )
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::Value;

    use super::*;
    use crate::config::ClientConfig;
    use crate::session::{MemorySessionStore, Session};

    #[tokio::test]
    async fn test_sign_in_persists_session() {
        let router = Router::new().route(
            SIGN_IN_PATH,
            post(|axum::Json(body): axum::Json<Value>| async move {
                if body["password"] == "hunter22" {
                    (
                        StatusCode::OK,
                        axum::Json(json!({
                            "jwt": "token-1",
                            "refreshToken": "refresh-1",
                            "user": { "id": "u-9" }
                        })),
                    )
                } else {
                    (StatusCode::UNAUTHORIZED, axum::Json(json!({})))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let session = Session::new(Arc::new(MemorySessionStore::new()));
        let gateway =
            Gateway::new(ClientConfig::new(format!("http://{addr}")), session.clone()).unwrap();

        let err = gateway
            .sign_in("a@b.c", &SecretString::from("wrong"))
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert!(!session.is_signed_in().await);

        let user = gateway
            .sign_in("a@b.c", &SecretString::from("hunter22"))
            .await
            .unwrap();
        assert_eq!(user.as_str(), "u-9");
        let creds = session.credentials().await.unwrap();
        assert_eq!(creds.token.expose_secret(), "token-1");
        assert_eq!(
            session.refresh_token().await.unwrap().unwrap().expose_secret(),
            "refresh-1"
        );
    }
}
