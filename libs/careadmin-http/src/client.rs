use crate::builder::HttpClientBuilder;
use crate::classify::ResponseClassifier;
use crate::config::{EndpointConfig, TransportSecurity};
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::response::ResponseBody;
use crate::session::SessionStore;
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tower::Service;
use tower::buffer::Buffer;
use url::Url;

/// Future of the type-erased service stack
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// The service stack behind a `tower` buffer
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// Per-client state shared by every request builder.
pub struct ClientShared {
    pub(crate) base_url: Option<Url>,
    pub(crate) transport: TransportSecurity,
    pub(crate) max_body_size: usize,
    pub(crate) endpoints: EndpointConfig,
    pub(crate) session: Option<Arc<dyn SessionStore>>,
    pub(crate) classifier: ResponseClassifier,
}

/// Tenant-scoped HTTP client
///
/// Every request goes through the interceptor (tenant id, bearer token,
/// default headers) and every response through the classifier. Build one
/// with [`HttpClient::builder`].
///
/// `HttpClient` is `Clone + Send + Sync`; clones share the connection pool
/// and the session store. No external locking is needed.
///
/// ```ignore
/// let client = HttpClient::builder()
///     .base_url("https://api.careadmin.example/v1")
///     .session_store(store.clone())
///     .build()?;
///
/// let outcome = client.post("/regions").json(&new_region)?.send().await?;
/// ```
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) service: BufferedService,
    pub(crate) shared: Arc<ClientShared>,
}

impl HttpClient {
    /// Client with default configuration and no session store.
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Start a request with an arbitrary method.
    pub fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        RequestBuilder::new(
            self.service.clone(),
            Arc::clone(&self.shared),
            method,
            endpoint.to_owned(),
        )
    }

    pub fn get(&self, endpoint: &str) -> RequestBuilder {
        self.request(Method::GET, endpoint)
    }

    /// POST sends `Content-Type: application/json` unless the body or the
    /// caller says otherwise.
    pub fn post(&self, endpoint: &str) -> RequestBuilder {
        self.request(Method::POST, endpoint)
    }

    pub fn put(&self, endpoint: &str) -> RequestBuilder {
        self.request(Method::PUT, endpoint)
    }

    pub fn patch(&self, endpoint: &str) -> RequestBuilder {
        self.request(Method::PATCH, endpoint)
    }

    pub fn delete(&self, endpoint: &str) -> RequestBuilder {
        self.request(Method::DELETE, endpoint)
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&Url> {
        self.shared.base_url.as_ref()
    }

    #[must_use]
    pub fn endpoints(&self) -> &EndpointConfig {
        &self.shared.endpoints
    }

    /// The session store the client reads from and dispatches into.
    #[must_use]
    pub fn session_store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.shared.session.as_ref()
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.shared.base_url.as_ref().map(Url::as_str))
            .field("transport", &self.shared.transport)
            .field("classifier", &self.shared.classifier)
            .finish_non_exhaustive()
    }
}

/// Map buffer errors to `HttpError`
///
/// The buffer hands back the inner service's error boxed, or its own
/// error once the worker is gone.
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

/// Reserve a buffer slot without waiting.
///
/// A full buffer is `HttpError::Overloaded` rather than a queue.
pub async fn try_acquire_buffer_slot(service: &mut BufferedService) -> Result<(), HttpError> {
    use std::task::Poll;

    let polled = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match polled {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}
