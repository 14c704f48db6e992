//! Login, logout and password reset.
//!
//! A successful login installs the session through
//! [`SessionEvent::SignedIn`]; logout always dispatches
//! [`SessionEvent::SignedOut`], even when the server call fails.

use crate::client::HttpClient;
use crate::error::HttpError;
use crate::response::ApiOutcome;
use crate::session::{AuthToken, SessionContext, SessionEvent};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Email and password for the session-create endpoint.
#[derive(Clone, Serialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// The authenticated back office user.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "tenant_id")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub token: AuthToken,
    pub tenant_id: Option<String>,
    pub user: Option<CurrentUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginWire {
    token: String,
    #[serde(default, deserialize_with = "tenant_id")]
    tenant_id: Option<String>,
    #[serde(default)]
    user: Option<CurrentUser>,
}

/// Accept `tenantId` as a string or a number.
fn tenant_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) if !s.is_empty() => Some(s),
        Some(Raw::Number(n)) => Some(n.to_string()),
        Some(Raw::Text(_)) | None => None,
    })
}

#[derive(Serialize)]
struct ForgotPassword<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct ResetPassword<'a> {
    token: &'a str,
    password: &'a str,
}

/// Authentication endpoints on top of an [`HttpClient`].
///
/// Session events go to the client's session store; without one the calls
/// still work but nothing is installed or cleared.
#[derive(Debug, Clone)]
pub struct AuthApi {
    client: HttpClient,
}

impl AuthApi {
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    fn dispatch(&self, event: SessionEvent) {
        if let Some(store) = self.client.session_store() {
            store.dispatch(event);
        }
    }

    /// Create a session and install it.
    ///
    /// # Errors
    /// `HttpError::Api` with `InvalidCredentials` on a 401, any other
    /// classified failure, or the passed-through transport error.
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, HttpError> {
        let endpoint = self.client.endpoints().session.clone();
        let wire: LoginWire = self
            .client
            .post(&endpoint)
            .json(credentials)?
            .send()
            .await?
            .json()
            .await?;

        let token = AuthToken::new(wire.token);
        let session = SessionContext {
            tenant_id: wire.tenant_id.clone(),
            auth_token: Some(token.clone()),
        };
        tracing::info!(tenant = ?wire.tenant_id, "signed in");
        self.dispatch(SessionEvent::SignedIn(session));

        Ok(LoginResponse {
            token,
            tenant_id: wire.tenant_id,
            user: wire.user,
        })
    }

    /// Delete the session on the server and forget it locally.
    ///
    /// Local state is cleared whatever the server answers.
    ///
    /// # Errors
    /// The server or transport error, after local cleanup.
    pub async fn logout(&self) -> Result<(), HttpError> {
        let endpoint = self.client.endpoints().session.clone();
        let result = self.client.delete(&endpoint).send().await;

        self.dispatch(SessionEvent::SignedOut);
        tracing::info!("signed out");

        match result? {
            ApiOutcome::Response(_) => Ok(()),
            ApiOutcome::TransportError(e) => Err(e),
        }
    }

    /// # Errors
    /// Classified failure or transport error.
    pub async fn current_user(&self) -> Result<CurrentUser, HttpError> {
        let endpoint = &self.client.endpoints().current_user;
        self.client.get(endpoint).send().await?.json().await
    }

    /// Ask the server to mail a reset link to `email`.
    ///
    /// # Errors
    /// Classified failure or transport error.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), HttpError> {
        let endpoint = &self.client.endpoints().forgot_password;
        self.client
            .post(endpoint)
            .json(&ForgotPassword { email })?
            .send()
            .await?
            .into_response()
            .map(drop)
    }

    /// Confirm a reset with the mailed `token`.
    ///
    /// # Errors
    /// Classified failure or transport error.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), HttpError> {
        let endpoint = &self.client.endpoints().reset_password;
        let body = ResetPassword {
            token,
            password: new_password,
        };
        self.client
            .post(endpoint)
            .json(&body)?
            .send()
            .await?
            .into_response()
            .map(drop)
    }
}
