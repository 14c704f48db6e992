use crate::client::{BufferedService, ClientShared, map_buffer_error, try_acquire_buffer_slot};
use crate::classify::classify_transport_failure;
use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use crate::response::{ApiOutcome, HttpResponse, ResponseBody};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Method, Request, Response};
use http_body_util::Full;
use serde::Serialize;
use std::sync::Arc;
use tower::Service;
use url::Url;

const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Clone, Debug)]
enum BodyKind {
    Empty,
    Bytes(Bytes),
    Json(Bytes),
    Form(Bytes),
}

/// Request builder returned by [`HttpClient::get`](crate::HttpClient::get),
/// [`HttpClient::post`](crate::HttpClient::post), etc.
///
/// The endpoint is either a path joined onto the configured base URL
/// (`/regions`) or an absolute URL. Header and body errors are kept until
/// [`send()`](Self::send).
///
/// ```ignore
/// let regions: Vec<Region> = client
///     .get("/regions?page=1")
///     .send()
///     .await?
///     .json()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    shared: Arc<ClientShared>,
    method: Method,
    endpoint: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: BodyKind,
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        shared: Arc<ClientShared>,
        method: Method,
        endpoint: String,
    ) -> Self {
        Self {
            service,
            shared,
            method,
            endpoint,
            headers: Vec::new(),
            body: BodyKind::Empty,
            error: None,
        }
    }

    /// Add a header. Repeated names are all sent, except `tenantId`,
    /// which the interceptor always replaces.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
        self
    }

    /// Serialize `body` as the JSON request body.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if serialization fails, or an earlier
    /// deferred header error.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.body = BodyKind::Json(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }

    /// Encode `fields` as an `application/x-www-form-urlencoded` body.
    ///
    /// # Errors
    /// Returns `HttpError::FormEncode` if encoding fails, or an earlier
    /// deferred header error.
    pub fn form<T: Serialize + ?Sized>(mut self, fields: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.body = BodyKind::Form(Bytes::from(serde_urlencoded::to_string(fields)?));
        Ok(self)
    }

    pub fn body_bytes(mut self, body: Bytes) -> Self {
        self.body = BodyKind::Bytes(body);
        self
    }

    /// Absolute URL for the endpoint.
    ///
    /// Relative endpoints are appended to the base URL path, so
    /// `https://api/v1` + `/regions` is `https://api/v1/regions`.
    fn resolve_url(&self) -> Result<String, HttpError> {
        match Url::parse(&self.endpoint) {
            Ok(absolute) => Ok(absolute.into()),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let Some(base) = &self.shared.base_url else {
                    return Err(HttpError::InvalidUri {
                        url: self.endpoint.clone(),
                        kind: InvalidUriKind::MissingBaseUrl,
                        reason: "relative endpoint without a configured base URL".to_owned(),
                    });
                };
                Ok(format!(
                    "{}/{}",
                    base.as_str().trim_end_matches('/'),
                    self.endpoint.trim_start_matches('/')
                ))
            }
            Err(e) => Err(HttpError::InvalidUri {
                url: self.endpoint.clone(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            }),
        }
    }

    /// Default `Content-Type` for this request, unless the caller set one.
    fn default_content_type(&self) -> Option<&'static str> {
        if self.headers.iter().any(|(name, _)| name == CONTENT_TYPE) {
            return None;
        }
        match self.body {
            BodyKind::Form(_) => Some(FORM_CONTENT_TYPE),
            BodyKind::Json(_) => Some(JSON_CONTENT_TYPE),
            BodyKind::Empty | BodyKind::Bytes(_) if self.method == Method::POST => {
                Some(JSON_CONTENT_TYPE)
            }
            BodyKind::Empty | BodyKind::Bytes(_) => None,
        }
    }

    /// Send the request and classify the result.
    ///
    /// - `Ok(ApiOutcome::Response)` for a success status
    /// - `Ok(ApiOutcome::TransportError)` for transport failures that are
    ///   not network errors (timeout, TLS, overload), untouched
    /// - `Err(HttpError::Api)` for a failure status or a network error
    /// - `Err(..)` with the original error if the request could not be built
    ///
    /// # Errors
    /// See above.
    pub async fn send(mut self) -> Result<ApiOutcome, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let url = self.resolve_url()?;
        let uri = validate_url(&url, self.shared.transport)?;
        let content_type = self.default_content_type();
        let classified = classified_path(&url, self.shared.base_url.as_ref())
            .unwrap_or_else(|| self.endpoint.clone());

        let Self {
            mut service,
            shared,
            method,
            headers,
            body,
            ..
        } = self;

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let body = match body {
            BodyKind::Empty => Bytes::new(),
            BodyKind::Bytes(b) | BodyKind::Json(b) | BodyKind::Form(b) => b,
        };
        let request = builder.body(Full::new(body))?;

        let result = match try_acquire_buffer_slot(&mut service).await {
            Ok(()) => service.call(request).await.map_err(map_buffer_error),
            Err(e) => Err(e),
        };

        let inner: Response<ResponseBody> = match result {
            Ok(inner) => inner,
            Err(e) if e.is_request_error() => return Err(e),
            Err(e) => {
                return match classify_transport_failure(Some(e)) {
                    Ok(passthrough) => Ok(ApiOutcome::TransportError(passthrough)),
                    Err(network) => Err(network.into()),
                };
            }
        };

        let response = HttpResponse {
            inner,
            max_body_size: shared.max_body_size,
        };
        shared.classifier.classify_response(&classified, response).await
    }
}

/// Path of `url` as the classifier sees it: relative to the base URL path
/// when `url` is under the base URL, otherwise the whole path.
///
/// `session`, `/session` and `https://api/v1/session` all give `/session`
/// for a base of `https://api/v1`.
fn classified_path(url: &str, base: Option<&Url>) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let path = url.path();
    if let Some(base) = base
        && base.origin() == url.origin()
        && let Some(rest) = path.strip_prefix(base.path().trim_end_matches('/'))
        && (rest.is_empty() || rest.starts_with('/'))
    {
        return Some(if rest.is_empty() { "/".to_owned() } else { rest.to_owned() });
    }
    Some(path.to_owned())
}

/// Parse `url` and check its scheme against the transport mode.
fn validate_url(url: &str, transport: TransportSecurity) -> Result<http::Uri, HttpError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("https") => Ok(uri),
        Some("http") if transport == TransportSecurity::AllowInsecureHttp => Ok(uri),
        Some("http") => Err(HttpError::InvalidScheme {
            scheme: "http".to_owned(),
            reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
        }),
        Some(scheme) => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
        None => Err(HttpError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        }),
    }
}
