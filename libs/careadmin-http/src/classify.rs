//! Response classification.
//!
//! Every response is mapped to success or a typed [`ApiError`] by a fixed
//! status table. The only side effect is the session reset on an expired
//! session; there are no retries.

use crate::error::{ApiError, ApiErrorKind, HttpError};
use crate::response::{ApiOutcome, HttpResponse, read_body_limited};
use crate::session::{SessionEvent, SessionStore};
use bytes::Bytes;
use http::StatusCode;
use std::sync::Arc;

/// Statuses passed through to the caller.
#[must_use]
pub fn is_success_status(status: StatusCode) -> bool {
    match status.as_u16() {
        201 => true,
        code => code <= 205,
    }
}

/// The endpoint path without query, fragment or surrounding slashes.
fn endpoint_path(endpoint: &str) -> &str {
    endpoint
        .split(['?', '#'])
        .next()
        .unwrap_or(endpoint)
        .trim_matches('/')
}

/// Map a status to a failure kind; `None` means success.
///
/// A 401 from `session_endpoint` is a failed login, not an expired session.
/// `session` and `/session/` name the same endpoint.
#[must_use]
pub fn classify_status(
    status: StatusCode,
    endpoint: &str,
    session_endpoint: &str,
) -> Option<ApiErrorKind> {
    if is_success_status(status) {
        return None;
    }

    let kind = match status.as_u16() {
        500 | 502 => ApiErrorKind::ServerError,
        401 if endpoint_path(endpoint) == endpoint_path(session_endpoint) => ApiErrorKind::InvalidCredentials,
        401 => ApiErrorKind::SessionExpired,
        403 => ApiErrorKind::Forbidden,
        404 => ApiErrorKind::NotFound,
        code @ (400 | 406 | 408 | 409 | 412 | 432) => ApiErrorKind::RequestRejected(code),
        _ => ApiErrorKind::Generic,
    };
    Some(kind)
}

/// Classify a complete response without side effects.
///
/// # Errors
/// Returns the typed `ApiError` for every non-success status.
pub fn classify(
    status: StatusCode,
    endpoint: &str,
    payload: Bytes,
    session_endpoint: &str,
) -> Result<(), ApiError> {
    match classify_status(status, endpoint, session_endpoint) {
        None => Ok(()),
        Some(kind) => Err(ApiError::from_response(kind, status, payload, None)),
    }
}

/// Decide what a transport-level failure means to the caller.
///
/// A network error, or no error at all, becomes `Err` with a
/// [`ApiErrorKind::NetworkError`]. Anything else is handed back in `Ok`
/// unchanged.
///
/// # Errors
/// Returns `ApiError::network()` for network failures.
pub fn classify_transport_failure(err: Option<HttpError>) -> Result<HttpError, ApiError> {
    match err {
        Some(err) if !err.is_network_error() => Ok(err),
        Some(err) => {
            tracing::debug!(error = %err, "request failed before reaching the server");
            Err(ApiError::network())
        }
        None => Err(ApiError::network()),
    }
}

/// Applies the status table to live responses and drives the session
/// side effects.
pub struct ResponseClassifier {
    session_endpoint: String,
    session: Option<Arc<dyn SessionStore>>,
    preview_limit: usize,
}

impl ResponseClassifier {
    #[must_use]
    pub fn new(
        session_endpoint: impl Into<String>,
        session: Option<Arc<dyn SessionStore>>,
        preview_limit: usize,
    ) -> Self {
        Self {
            session_endpoint: session_endpoint.into(),
            session,
            preview_limit,
        }
    }

    #[must_use]
    pub fn session_endpoint(&self) -> &str {
        &self.session_endpoint
    }

    /// Classify `response` to `endpoint`, the request path relative to the
    /// base URL.
    ///
    /// The status alone decides the kind and the session side effects. The
    /// payload (up to the preview limit) is read on a best-effort basis and
    /// is empty if it is too large or the body fails mid-read.
    ///
    /// # Errors
    /// Returns `HttpError::Api` for non-success statuses.
    pub async fn classify_response(
        &self,
        endpoint: &str,
        response: HttpResponse,
    ) -> Result<ApiOutcome, HttpError> {
        let status = response.status();
        let Some(kind) = classify_status(status, endpoint, &self.session_endpoint) else {
            return Ok(ApiOutcome::Response(response));
        };

        let content_type = response.content_type().map(str::to_owned);
        let limit = response.max_body_size().min(self.preview_limit);
        let payload = match read_body_limited(response.into_inner(), limit).await {
            Ok(payload) => payload,
            Err(HttpError::BodyTooLarge { actual, .. }) => {
                tracing::debug!(limit, actual, "failure payload dropped, too large");
                Bytes::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "failure payload unreadable");
                Bytes::new()
            }
        };

        let error = ApiError::from_response(kind, status, payload, content_type);
        self.apply_side_effects(&error);
        Err(error.into())
    }

    fn apply_side_effects(&self, error: &ApiError) {
        if error.kind() != ApiErrorKind::SessionExpired {
            tracing::debug!(kind = ?error.kind(), status = ?error.status(), "request rejected");
            return;
        }

        tracing::warn!(reason = error.message(), "session expired, resetting session state");
        if let Some(store) = &self.session {
            store.dispatch(SessionEvent::SessionTimeout {
                message: error.message().to_owned(),
            });
            store.dispatch(SessionEvent::StoreReset);
        }
    }
}

impl std::fmt::Debug for ResponseClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseClassifier")
            .field("session_endpoint", &self.session_endpoint)
            .field("has_session", &self.session.is_some())
            .field("preview_limit", &self.preview_limit)
            .finish()
    }
}
