use crate::config::CLIENT_HEADER;
use crate::error::HttpError;
use http::header::{HeaderName, USER_AGENT};
use http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that adds the fixed `client` and `User-Agent` headers
///
/// Headers already present on the request are left untouched.
#[derive(Clone, Debug)]
pub struct DefaultHeadersLayer {
    defaults: Vec<(HeaderName, HeaderValue)>,
}

impl DefaultHeadersLayer {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if either value is not a valid header value
    pub fn try_new(client_type: &str, user_agent: &str) -> Result<Self, HttpError> {
        Ok(Self {
            defaults: vec![
                (
                    HeaderName::from_static(CLIENT_HEADER),
                    HeaderValue::from_str(client_type)?,
                ),
                (USER_AGENT, HeaderValue::from_str(user_agent)?),
            ],
        })
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            defaults: self.defaults.clone(),
        }
    }
}

/// Service that fills in default headers
#[derive(Clone, Debug)]
pub struct DefaultHeadersService<S> {
    inner: S,
    defaults: Vec<(HeaderName, HeaderValue)>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let headers = req.headers_mut();
        for (name, value) in &self.defaults {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        self.inner.call(req)
    }
}
