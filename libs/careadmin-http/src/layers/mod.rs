//! Tower layers composing the client middleware stack
//!
//! - [`TraceLayer`] - `outgoing_http` tracing span per request
//! - [`SessionHeadersLayer`] - tenant and bearer token interceptor
//! - [`DefaultHeadersLayer`] - fixed `client` and `User-Agent` headers
//! - [`CredentialRedirectPolicy`] - bounded redirects that drop credentials off-origin

mod default_headers;
mod redirect;
mod session_headers;
mod trace;

pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
pub use redirect::CredentialRedirectPolicy;
pub use session_headers::{SessionHeadersLayer, SessionHeadersService};
pub use trace::{TraceLayer, TraceService};
