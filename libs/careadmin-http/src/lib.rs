#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Tenant-scoped HTTP client for the `CareAdmin` back office
//!
//! Every request the back office makes goes through one [`HttpClient`]:
//! - The interceptor stamps the `tenantid` header (session, then persisted
//!   storage, then the configured fallback) and the session's bearer token
//! - POST requests default to `Content-Type: application/json`
//! - Every response is classified: success statuses are handed back,
//!   failure statuses become [`ApiError`]s with a [`ApiErrorKind`]
//! - A 401 outside the login endpoint expires the session: the store gets
//!   `SessionTimeout` and then `StoreReset`
//! - Transport failures other than network errors are passed through
//!   untouched as [`ApiOutcome::TransportError`]
//!
//! # Example
//!
//! ```ignore
//! use careadmin_http::{HttpClient, InMemorySessionStore, MemoryStorage};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemorySessionStore::new(Arc::new(MemoryStorage::new())));
//! let client = HttpClient::builder()
//!     .base_url("https://api.careadmin.example/v1")
//!     .session_store(store.clone())
//!     .storage(store.storage())
//!     .build()?;
//!
//! let regions: Vec<Region> = client.get("/regions").send().await?.json().await?;
//! ```

pub mod api;
mod bootstrap;
mod builder;
mod classify;
mod client;
mod config;
mod error;
pub mod layers;
mod request;
mod response;
pub mod session;
pub mod storage;
mod tenant;
mod tls;

pub use api::{AuthApi, Credentials, CurrentUser, LoginResponse};
pub use bootstrap::fetch_current_user_on_startup;
pub use builder::HttpClientBuilder;
pub use classify::{
    ResponseClassifier, classify, classify_status, classify_transport_failure, is_success_status,
};
pub use client::HttpClient;
pub use config::{
    CLIENT_HEADER, ClientSettings, CredentialsMode, DEFAULT_CLIENT_TYPE, DEFAULT_TENANT_FALLBACK,
    DEFAULT_USER_AGENT, ENV_PREFIX, EndpointConfig, HttpClientConfig, TENANT_HEADER,
    TlsRootConfig, TransportSecurity,
};
pub use error::{ApiError, ApiErrorKind, HttpError, InvalidUriKind, NETWORK_ERROR_NAME};
pub use request::RequestBuilder;
pub use response::{ApiOutcome, ERROR_BODY_PREVIEW_LIMIT, HttpResponse, ResponseBody};
pub use session::{AuthToken, InMemorySessionStore, SessionContext, SessionEvent, SessionStore};
pub use storage::{FileStorage, MemoryStorage, PersistedStorage, StorageError, TENANT_ID_KEY};
pub use tenant::{TenantSource, resolve_tenant_id};
