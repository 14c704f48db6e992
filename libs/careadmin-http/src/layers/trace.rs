use crate::config::TENANT_HEADER;
use http::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that opens an `outgoing_http` span around every request
///
/// Span fields:
/// - `http.method`, `http.url` (query string stripped)
/// - `tenant`: the `tenantid` header, once the interceptor has set it
/// - `http.status_code` and `error=true` for 4xx/5xx or a failed call
#[derive(Clone, Debug, Default)]
pub struct TraceLayer;

impl TraceLayer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService { inner }
    }
}

/// Service created by [`TraceLayer`]
#[derive(Clone, Debug)]
pub struct TraceService<S> {
    inner: S,
}

/// URL without query or fragment, safe to put in logs.
fn sanitized_url(uri: &http::Uri) -> String {
    format!(
        "{}://{}{}",
        uri.scheme_str().unwrap_or("https"),
        uri.authority().map_or("", http::uri::Authority::as_str),
        uri.path()
    )
}

impl<S, B, ResBody> Service<Request<B>> for TraceService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: std::fmt::Display + Send + 'static,
    B: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        use tracing::{Instrument, Level};

        let method = req.method().clone();
        let url = sanitized_url(req.uri());

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let span = tracing::span!(
                Level::INFO, "outgoing_http",
                http.method = %method,
                http.url = %url,
                tenant = tracing::field::Empty,
                http.status_code = tracing::field::Empty,
                error = tracing::field::Empty,
            );

            // Inner layers stamp the tenant inside call(), so enter the span for it.
            let result = span
                .in_scope(|| inner.call(req))
                .instrument(span.clone())
                .await;

            match &result {
                Ok(response) => {
                    let status = response.status();
                    span.record("http.status_code", status.as_u16());
                    if status.is_client_error() || status.is_server_error() {
                        span.record("error", true);
                    }
                }
                Err(e) => {
                    span.record("error", true);
                    span.in_scope(|| tracing::debug!(error = %e, "outbound request failed"));
                }
            }

            result
        })
    }
}

/// Record the resolved tenant on the enclosing `outgoing_http` span.
pub fn record_tenant<B>(req: &Request<B>) {
    if let Some(tenant) = req
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        tracing::Span::current().record("tenant", tenant);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use tower::ServiceExt;

    #[derive(Clone)]
    struct Fixed(StatusCode);

    impl Service<Request<Full<Bytes>>> for Fixed {
        type Response = Response<Full<Bytes>>;
        type Error = HttpError;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _: Request<Full<Bytes>>) -> Self::Future {
            let resp = Response::builder()
                .status(self.0)
                .body(Full::new(Bytes::new()))
                .unwrap();
            std::future::ready(Ok(resp))
        }
    }

    #[test]
    fn url_is_sanitized() {
        let uri: http::Uri = "https://api.test/users?token=secret#frag".parse().unwrap();
        assert_eq!(sanitized_url(&uri), "https://api.test/users");
    }

    #[tokio::test]
    async fn passes_response_through() {
        let svc = TraceLayer::new().layer(Fixed(StatusCode::NOT_FOUND));
        let req = Request::builder()
            .uri("https://api.test/missing")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let resp = svc.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
