use crate::config::{CredentialsMode, TENANT_HEADER};
use crate::error::HttpError;
use crate::session::{SessionContext, SessionStore};
use crate::storage::PersistedStorage;
use crate::tenant::resolve_tenant_id;
use http::header::{AUTHORIZATION, HeaderName};
use http::{HeaderValue, Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use url::{Origin, Url};

/// Inputs the interceptor reads on every request.
struct SessionHeaders {
    session: Option<Arc<dyn SessionStore>>,
    storage: Option<Arc<dyn PersistedStorage>>,
    tenant_fallback: String,
    credentials: CredentialsMode,
    base_origin: Option<Origin>,
}

impl SessionHeaders {
    fn snapshot(&self) -> SessionContext {
        self.session
            .as_ref()
            .map(|store| store.snapshot())
            .unwrap_or_default()
    }

    fn attach_credentials<B>(&self, req: &Request<B>) -> bool {
        match self.credentials {
            CredentialsMode::Include => true,
            CredentialsMode::Omit => false,
            CredentialsMode::SameOrigin => {
                let Some(base) = &self.base_origin else {
                    return false;
                };
                Url::parse(&req.uri().to_string())
                    .map(|url| url.origin() == *base)
                    .unwrap_or(false)
            }
        }
    }

    /// Stamp tenant and credentials onto `req`.
    fn apply<B>(&self, req: &mut Request<B>) -> Result<(), HttpError> {
        let session = self.snapshot();
        let (tenant, source) =
            resolve_tenant_id(&session, self.storage.as_deref(), &self.tenant_fallback);
        tracing::debug!(tenant = %tenant, ?source, "resolved request tenant");

        let tenant_value = HeaderValue::from_str(&tenant)?;
        // insert() replaces every existing value, so exactly one is sent
        req.headers_mut()
            .insert(HeaderName::from_static(TENANT_HEADER), tenant_value);
        super::trace::record_tenant(req);

        if let Some(token) = &session.auth_token
            && !req.headers().contains_key(AUTHORIZATION)
            && self.attach_credentials(req)
        {
            let raw = zeroize::Zeroizing::new(format!("Bearer {}", token.expose()));
            let mut bearer = HeaderValue::from_str(&raw)?;
            bearer.set_sensitive(true);
            req.headers_mut().insert(AUTHORIZATION, bearer);
        }

        Ok(())
    }
}

/// Tower layer implementing the request interceptor: sets the `tenantId`
/// header and the session's bearer token on every outbound request.
#[derive(Clone)]
pub struct SessionHeadersLayer {
    shared: Arc<SessionHeaders>,
}

impl SessionHeadersLayer {
    #[must_use]
    pub fn new(
        session: Option<Arc<dyn SessionStore>>,
        storage: Option<Arc<dyn PersistedStorage>>,
        tenant_fallback: impl Into<String>,
        credentials: CredentialsMode,
        base_url: Option<&Url>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionHeaders {
                session,
                storage,
                tenant_fallback: tenant_fallback.into(),
                credentials,
                base_origin: base_url.map(Url::origin),
            }),
        }
    }
}

impl<S> Layer<S> for SessionHeadersLayer {
    type Service = SessionHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionHeadersService {
            inner,
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Service created by [`SessionHeadersLayer`].
#[derive(Clone)]
pub struct SessionHeadersService<S> {
    inner: S,
    shared: Arc<SessionHeaders>,
}

impl<S, B, ResBody> Service<Request<B>> for SessionHeadersService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        if let Err(e) = self.shared.apply(&mut req) {
            return Box::pin(async move { Err(e) });
        }

        // Call the instance that was poll_ready'd, keep a fresh clone for the next cycle.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move { inner.call(req).await })
    }
}
