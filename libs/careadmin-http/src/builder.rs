use crate::bootstrap::fetch_current_user_on_startup;
use crate::classify::ResponseClassifier;
use crate::client::{BufferedService, ClientShared, HttpClient};
use crate::config::{
    CredentialsMode, EndpointConfig, HttpClientConfig, TlsRootConfig, TransportSecurity,
};
use crate::error::HttpError;
use crate::layers::{
    CredentialRedirectPolicy, DefaultHeadersLayer, SessionHeadersLayer, TraceLayer,
};
use crate::response::{ERROR_BODY_PREVIEW_LIMIT, ResponseBody};
use crate::session::SessionStore;
use crate::storage::PersistedStorage;
use crate::tls;
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;
use tower_http::follow_redirect::FollowRedirectLayer;
use url::Url;

/// Path assumed for [`HttpClientBuilder::current_path`] when none is given.
const DEFAULT_CURRENT_PATH: &str = "/";

/// Builder for [`HttpClient`]
///
/// Configuration comes from an [`HttpClientConfig`] (see
/// [`HttpClientConfig::from_env`]) plus the session collaborators: the
/// store the interceptor reads and the classifier dispatches into, and the
/// persisted storage holding the fallback tenant id.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    session: Option<Arc<dyn SessionStore>>,
    storage: Option<Arc<dyn PersistedStorage>>,
    current_path: String,
    error: Option<HttpError>,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HttpClientConfig::default())
    }

    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            session: None,
            storage: None,
            current_path: DEFAULT_CURRENT_PATH.to_owned(),
            error: None,
        }
    }

    /// Set the base URL relative endpoints are joined onto.
    ///
    /// An unparsable URL fails [`build`](Self::build) with `HttpError::Config`.
    #[must_use]
    pub fn base_url(mut self, url: &str) -> Self {
        match Url::parse(url) {
            Ok(url) => self.config.base_url = Some(url),
            Err(e) => {
                self.error = Some(HttpError::Config(format!("invalid base_url '{url}': {e}")));
            }
        }
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Value of the `client` header
    #[must_use]
    pub fn client_type(mut self, client_type: impl Into<String>) -> Self {
        self.config.client_type = client_type.into();
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: CredentialsMode) -> Self {
        self.config.credentials = credentials;
        self
    }

    /// Tenant id sent when neither the session nor storage has one
    #[must_use]
    pub fn tenant_fallback(mut self, tenant: impl Into<String>) -> Self {
        self.config.tenant_fallback = tenant.into();
        self
    }

    #[must_use]
    pub fn endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow plain `http://` (for testing against local mock servers only)
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "careadmin_http::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Maximum queued requests; `0` is clamped to 1.
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// Redirects followed per request; `0` hands 3xx responses to the
    /// classifier.
    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Attach the application's session store.
    #[must_use]
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session = Some(store);
        self
    }

    /// Attach the persisted storage consulted for the tenant fallback.
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn PersistedStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Path the application was opened on; decides the startup user fetch.
    #[must_use]
    pub fn current_path(mut self, path: impl Into<String>) -> Self {
        self.current_path = path.into();
        self
    }

    /// Build the client.
    ///
    /// When a session store is attached this also dispatches
    /// `FetchCurrentUser`, unless the current path is the privacy-policy
    /// page. Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// Returns `HttpError::Config` for an invalid base URL, `HttpError::Tls`
    /// if the root store cannot be built and `HttpError::InvalidHeaderValue`
    /// for an unusable `client` or `User-Agent` value.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let config = self.config;
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let timeout = config.request_timeout;
        let https = tls::build_https_connector(config.tls_roots, config.transport)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout needs a timer
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http2_only(false);
        if let Some(idle) = config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle);
        }
        let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

        let default_headers =
            DefaultHeadersLayer::try_new(&config.client_type, &config.user_agent)?;

        // Request flow (outer → inner):
        //   Buffer → Trace → SessionHeaders → Timeout → DefaultHeaders →
        //   Decompression → FollowRedirect → hyper
        //
        // No layer rejects a status; every response reaches the classifier
        // in RequestBuilder::send.
        let transport = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(default_headers)
            .layer(DecompressionLayer::new())
            .layer(FollowRedirectLayer::with_policy(
                CredentialRedirectPolicy::new(config.max_redirects),
            ))
            .service(hyper_client)
            .map_response(map_decompression_response)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout))
            .boxed_clone();

        let session_headers = SessionHeadersLayer::new(
            self.session.clone(),
            self.storage,
            config.tenant_fallback,
            config.credentials,
            config.base_url.as_ref(),
        );
        let stack = ServiceBuilder::new()
            .layer(TraceLayer::new())
            .layer(session_headers)
            .service(transport)
            .boxed_clone();

        let service: BufferedService = Buffer::new(stack, config.buffer_capacity.max(1));

        let classifier = ResponseClassifier::new(
            config.endpoints.session.clone(),
            self.session.clone(),
            ERROR_BODY_PREVIEW_LIMIT,
        );

        if let Some(store) = &self.session {
            fetch_current_user_on_startup(
                store.as_ref(),
                &self.current_path,
                &config.endpoints.privacy_policy_path,
            );
        }

        Ok(HttpClient {
            service,
            shared: Arc::new(ClientShared {
                base_url: config.base_url,
                transport: config.transport,
                max_body_size: config.max_body_size,
                endpoints: config.endpoints,
                session: self.session,
                classifier,
            }),
        })
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Map tower errors to `HttpError`, keeping typed errors from inner layers.
fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

/// Box the decompressed body into [`ResponseBody`].
fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;
    use crate::session::{InMemorySessionStore, SessionEvent};
    use crate::storage::MemoryStorage;

    fn store() -> Arc<InMemorySessionStore> {
        Arc::new(InMemorySessionStore::new(Arc::new(MemoryStorage::new())))
    }

    #[test]
    fn defaults() {
        let builder = HttpClientBuilder::new();
        assert_eq!(builder.config.request_timeout, Duration::from_secs(30));
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(builder.config.transport, TransportSecurity::TlsOnly);
        assert_eq!(builder.current_path, "/");
    }

    #[test]
    fn setters() {
        let builder = HttpClientBuilder::new()
            .timeout(Duration::from_secs(5))
            .client_type("mobile")
            .credentials(CredentialsMode::Omit)
            .tenant_fallback("1")
            .max_redirects(0)
            .buffer_capacity(0);

        assert_eq!(builder.config.request_timeout, Duration::from_secs(5));
        assert_eq!(builder.config.client_type, "mobile");
        assert_eq!(builder.config.credentials, CredentialsMode::Omit);
        assert_eq!(builder.config.tenant_fallback, "1");
        assert_eq!(builder.config.max_redirects, 0);
        assert_eq!(builder.config.buffer_capacity, 1);
    }

    #[tokio::test]
    async fn invalid_base_url_fails_build() {
        let err = HttpClientBuilder::new().base_url("not a url").build().unwrap_err();
        assert!(matches!(err, HttpError::Config(_)));
    }

    #[tokio::test]
    async fn invalid_client_type_fails_build() {
        let err = HttpClientBuilder::new().client_type("web\n").build().unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeaderValue(_)));
    }

    #[tokio::test]
    async fn zero_capacity_in_config_is_clamped() {
        let config = HttpClientConfig {
            buffer_capacity: 0,
            ..Default::default()
        };
        assert!(HttpClientBuilder::with_config(config).build().is_ok());
    }

    #[tokio::test]
    async fn bootstrap_fetches_current_user() {
        let store = store();
        let mut events = store.subscribe();

        HttpClientBuilder::new()
            .session_store(store.clone())
            .current_path("/regions")
            .build()
            .unwrap();

        assert_eq!(events.try_recv().unwrap(), SessionEvent::FetchCurrentUser);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn bootstrap_skipped_on_privacy_policy() {
        let store = store();
        let mut events = store.subscribe();

        HttpClientBuilder::new()
            .session_store(store.clone())
            .current_path("/privacy-policy")
            .build()
            .unwrap();

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn no_store_no_bootstrap() {
        assert!(HttpClientBuilder::new().build().unwrap().session_store().is_none());
    }

    #[tokio::test]
    async fn insecure_http_warning_emitted() {
        use std::sync::Mutex;
        use tracing_subscriber::layer::SubscriberExt;

        #[derive(Clone, Default)]
        struct WarningCapture {
            warnings: Arc<Mutex<Vec<String>>>,
        }

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarningCapture {
            fn on_event(
                &self,
                event: &tracing::Event<'_>,
                _ctx: tracing_subscriber::layer::Context<'_, S>,
            ) {
                if *event.metadata().level() == tracing::Level::WARN {
                    let mut visitor = MessageVisitor(String::new());
                    event.record(&mut visitor);
                    self.warnings.lock().unwrap().push(visitor.0);
                }
            }
        }

        struct MessageVisitor(String);
        impl tracing::field::Visit for MessageVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{value:?}");
                }
            }
        }

        let capture = WarningCapture::default();
        let warnings = capture.warnings.clone();
        let subscriber = tracing_subscriber::registry().with(capture);

        tracing::subscriber::with_default(subscriber, || {
            _ = HttpClientBuilder::new().allow_insecure_http().build();
        });

        let captured = warnings.lock().unwrap();
        assert!(
            captured.iter().any(|w| w.contains("insecure HTTP")),
            "warning should mention insecure HTTP: {:?}",
            *captured
        );
    }

    #[test]
    fn map_tower_error_keeps_typed_errors() {
        let boxed: tower::BoxError = Box::new(HttpError::Overloaded);
        assert!(matches!(
            map_tower_error(boxed, Duration::from_secs(1)),
            HttpError::Overloaded
        ));

        let elapsed: tower::BoxError = Box::new(tower::timeout::error::Elapsed::new());
        assert!(matches!(
            map_tower_error(elapsed, Duration::from_secs(3)),
            HttpError::Timeout(d) if d == Duration::from_secs(3)
        ));

        let io: tower::BoxError = Box::new(std::io::Error::other("reset"));
        assert!(map_tower_error(io, Duration::from_secs(1)).is_network_error());
    }
}
