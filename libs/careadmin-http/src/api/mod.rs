//! Typed wrappers over the back office endpoints.

pub mod auth;

pub use auth::{AuthApi, Credentials, CurrentUser, LoginResponse};
