use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

/// Maximum failure payload kept on an [`ApiError`](crate::ApiError) (8KB).
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Boxed response body after the decompression layer.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// A response the classifier accepted as successful
///
/// Body reads enforce the configured `max_body_size` on decompressed bytes.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// `Content-Type` header, if present and valid UTF-8.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.inner
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Read the body.
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit,
    /// `HttpError::Transport` if the connection fails mid-body.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner, self.max_body_size).await
    }

    /// Read the body and decode it as JSON.
    ///
    /// # Errors
    /// As [`bytes`](Self::bytes), plus `HttpError::Json` on invalid JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body = self.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Read the body as UTF-8, replacing invalid sequences.
    ///
    /// # Errors
    /// As [`bytes`](Self::bytes).
    pub async fn text(self) -> Result<String, HttpError> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Result of a request that was not classified as a failure.
///
/// Classified failures are `Err(HttpError::Api(..))` from
/// [`RequestBuilder::send`](crate::RequestBuilder::send). Transport errors
/// that are not network errors (timeouts, TLS, overload) are handed back
/// untouched as [`ApiOutcome::TransportError`] for the caller to decide.
#[derive(Debug)]
#[must_use]
pub enum ApiOutcome {
    Response(HttpResponse),
    TransportError(HttpError),
}

impl ApiOutcome {
    /// Treat a passed-through transport error as a failure.
    ///
    /// # Errors
    /// Returns the transport error of [`ApiOutcome::TransportError`].
    pub fn into_response(self) -> Result<HttpResponse, HttpError> {
        match self {
            ApiOutcome::Response(resp) => Ok(resp),
            ApiOutcome::TransportError(err) => Err(err),
        }
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, ApiOutcome::Response(_))
    }

    /// Shorthand for `into_response()?.json()`.
    ///
    /// # Errors
    /// See [`into_response`](Self::into_response) and [`HttpResponse::json`].
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        self.into_response()?.json().await
    }
}

/// Collect `response`'s body, failing once more than `limit` bytes arrive.
pub async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let mut body = std::pin::pin!(response.into_body());
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            let actual = collected.len() + chunk.len();
            if actual > limit {
                return Err(HttpError::BodyTooLarge { limit, actual });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
