use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Message carried by transport failures that never reached the server.
///
/// A transport error is a network error exactly when it is
/// [`HttpError::Transport`]; [`ApiError::network`] uses this string as its
/// message so callers can match it for toast selection.
pub const NETWORK_ERROR_NAME: &str = "Network Error";

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
    /// Relative endpoint given but no base URL is configured
    MissingBaseUrl,
}

/// HTTP client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Single request attempt timed out
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Network-level failure (connection refused, DNS, reset, ...)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// JSON encoding or parsing error
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// Request buffer is full (fail-fast)
    #[error("Service overloaded: request buffer is full")]
    Overloaded,

    /// Internal service failure (buffer worker died, channel closed)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// Invalid URL
    ///
    /// Match on `kind`; `reason` is a diagnostic message for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    /// Client configuration could not be loaded or is invalid
    #[error("Invalid client configuration: {0}")]
    Config(String),

    /// The server answered with a non-success status, or the network failed
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl HttpError {
    /// Whether this error means the request never reached the server.
    #[must_use]
    pub fn is_network_error(&self) -> bool {
        matches!(self, HttpError::Transport(_))
    }

    /// Whether the request could not be built (bad header, URL or body).
    ///
    /// These are returned to the caller unchanged, never classified.
    #[must_use]
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            HttpError::RequestBuild(_)
                | HttpError::InvalidHeaderName(_)
                | HttpError::InvalidHeaderValue(_)
                | HttpError::Json(_)
                | HttpError::FormEncode(_)
                | HttpError::InvalidUri { .. }
                | HttpError::InvalidScheme { .. }
        )
    }

    /// Borrow the classified API error, if this is one.
    #[must_use]
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            HttpError::Api(err) => Some(err),
            _ => None,
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<figment::Error> for HttpError {
    fn from(err: figment::Error) -> Self {
        HttpError::Config(err.to_string())
    }
}

/// Why a request failed, as seen by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ApiErrorKind {
    /// 401 from the session-create endpoint
    InvalidCredentials,
    /// 401 from any other endpoint
    SessionExpired,
    /// 500 or 502
    ServerError,
    /// 403
    Forbidden,
    /// 404
    NotFound,
    /// 400, 406, 408, 409, 412 or 432; carries the code
    RequestRejected(u16),
    /// Any other non-success status
    Generic,
    /// The request never reached the server
    NetworkError,
}

impl ApiErrorKind {
    /// Default presentation message for the kind.
    #[must_use]
    pub fn default_message(self) -> &'static str {
        match self {
            ApiErrorKind::InvalidCredentials => "Invalid email or password",
            ApiErrorKind::SessionExpired => "Your session has expired, please sign in again",
            ApiErrorKind::ServerError => "The server encountered an error",
            ApiErrorKind::Forbidden => "You do not have permission to perform this action",
            ApiErrorKind::NotFound => "The requested resource was not found",
            ApiErrorKind::RequestRejected(_) => "The request was rejected by the server",
            ApiErrorKind::Generic => "Something went wrong",
            ApiErrorKind::NetworkError => NETWORK_ERROR_NAME,
        }
    }
}

/// Typed application error built once per failed response or request.
///
/// Immutable after construction. Keeps the original status and payload so
/// callers can pick user-facing messaging.
#[derive(Error, Debug, Clone)]
#[error("{kind:?} ({status:?}): {message}")]
pub struct ApiError {
    kind: ApiErrorKind,
    status: Option<StatusCode>,
    message: String,
    payload: Bytes,
    content_type: Option<String>,
}

impl ApiError {
    /// Build an error from a failed response.
    ///
    /// The message is taken from a top-level JSON `message` field of the
    /// payload when there is one.
    #[must_use]
    pub fn from_response(
        kind: ApiErrorKind,
        status: StatusCode,
        payload: Bytes,
        content_type: Option<String>,
    ) -> Self {
        let message = server_message(&payload)
            .unwrap_or_else(|| kind.default_message().to_owned());
        Self {
            kind,
            status: Some(status),
            message,
            payload,
            content_type,
        }
    }

    /// Build the error for a request that never reached the server.
    #[must_use]
    pub fn network() -> Self {
        Self {
            kind: ApiErrorKind::NetworkError,
            status: None,
            message: NETWORK_ERROR_NAME.to_owned(),
            payload: Bytes::new(),
            content_type: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    /// HTTP status, `None` for network errors.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Raw response payload, empty for network errors.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Decode the payload as JSON.
    ///
    /// # Errors
    /// Returns `serde_json::Error` if the payload is not valid JSON for `T`.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Message suitable for a toast or banner.
    #[must_use]
    pub fn user_message(&self) -> &str {
        if self.message.is_empty() {
            self.kind.default_message()
        } else {
            &self.message
        }
    }
}

fn server_message(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    value
        .get("message")
        .and_then(serde_json::Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = HttpError::Transport(Box::new(TestError("connection refused")));

        let source = err.source().unwrap();
        let downcast = source.downcast_ref::<TestError>().unwrap();
        assert_eq!(downcast.0, "connection refused");
    }

    #[test]
    fn test_only_transport_is_network_error() {
        assert!(HttpError::Transport(Box::new(TestError("reset"))).is_network_error());
        assert!(!HttpError::Timeout(std::time::Duration::from_secs(1)).is_network_error());
        assert!(!HttpError::Overloaded.is_network_error());
        assert!(!HttpError::Tls(Box::new(TestError("expired"))).is_network_error());
    }

    #[test]
    fn test_request_errors() {
        let bad_value = http::HeaderValue::from_str("a\nb").unwrap_err();
        assert!(HttpError::InvalidHeaderValue(bad_value).is_request_error());
        assert!(
            HttpError::InvalidUri {
                url: "x".to_owned(),
                kind: InvalidUriKind::MissingBaseUrl,
                reason: String::new(),
            }
            .is_request_error()
        );
        assert!(!HttpError::Overloaded.is_request_error());
        assert!(!HttpError::Transport(Box::new(TestError("reset"))).is_request_error());
    }

    #[test]
    fn test_message_taken_from_payload() {
        let err = ApiError::from_response(
            ApiErrorKind::RequestRejected(409),
            StatusCode::CONFLICT,
            Bytes::from_static(br#"{"message":"Region already exists"}"#),
            Some("application/json".to_owned()),
        );
        assert_eq!(err.message(), "Region already exists");
        assert_eq!(err.status(), Some(StatusCode::CONFLICT));
        assert_eq!(err.content_type(), Some("application/json"));
    }

    #[test]
    fn test_message_falls_back_to_kind_default() {
        let err = ApiError::from_response(
            ApiErrorKind::Forbidden,
            StatusCode::FORBIDDEN,
            Bytes::from_static(b"<html>nope</html>"),
            None,
        );
        assert_eq!(err.message(), ApiErrorKind::Forbidden.default_message());
        assert_eq!(&err.payload()[..], b"<html>nope</html>");
    }

    #[test]
    fn test_network_error_shape() {
        let err = ApiError::network();
        assert_eq!(err.kind(), ApiErrorKind::NetworkError);
        assert_eq!(err.status(), None);
        assert_eq!(err.message(), NETWORK_ERROR_NAME);
        assert!(err.payload().is_empty());
    }

    #[test]
    fn test_payload_json() {
        #[derive(serde::Deserialize)]
        struct Body {
            field: String,
        }

        let err = ApiError::from_response(
            ApiErrorKind::RequestRejected(400),
            StatusCode::BAD_REQUEST,
            Bytes::from_static(br#"{"field":"dosage"}"#),
            None,
        );
        let body: Body = err.payload_json().unwrap();
        assert_eq!(body.field, "dosage");
    }

    #[test]
    fn test_api_error_is_transparent_in_http_error() {
        let err: HttpError = ApiError::network().into();
        assert_eq!(err.to_string(), ApiError::network().to_string());
        assert_eq!(err.as_api().unwrap().kind(), ApiErrorKind::NetworkError);
    }
}
