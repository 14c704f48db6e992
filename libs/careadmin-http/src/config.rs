use crate::error::HttpError;
use figment::Figment;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;
use url::Url;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("careadmin-http/", env!("CARGO_PKG_VERSION"));

/// Header identifying the kind of application making the call
pub const CLIENT_HEADER: &str = "client";

/// Default value of the [`CLIENT_HEADER`] header
pub const DEFAULT_CLIENT_TYPE: &str = "web";

/// Header carrying the tenant scope of every request
pub const TENANT_HEADER: &str = "tenantid";

/// Tenant sent when neither the session nor persisted storage has one
pub const DEFAULT_TENANT_FALLBACK: &str = "0";

/// Prefix of environment variables read by [`ClientSettings::load`]
pub const ENV_PREFIX: &str = "CAREADMIN_";

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Transport security configuration
///
/// Controls whether the client enforces TLS or allows insecure HTTP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow insecure HTTP connections (for testing with mock servers only)
    AllowInsecureHttp,
}

/// When the session's bearer token is attached to outbound requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsMode {
    /// Attach on every request, including cross-origin ones
    #[default]
    Include,
    /// Attach only when the request targets the base URL's origin
    SameOrigin,
    /// Never attach
    Omit,
}

/// Well-known paths the session logic keys on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Login endpoint; a 401 here means bad credentials, not an expired session
    pub session: String,
    /// Authenticated user lookup
    pub current_user: String,
    /// Password reset request
    pub forgot_password: String,
    /// Password reset confirmation
    pub reset_password: String,
    /// Public page on which the current user is not fetched at startup
    pub privacy_policy_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            session: "/session".to_owned(),
            current_user: "/users/current".to_owned(),
            forgot_password: "/password/forgot".to_owned(),
            reset_password: "/password/reset".to_owned(),
            privacy_policy_path: "/privacy-policy".to_owned(),
        }
    }
}

/// Overall HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base address relative endpoints are joined onto (default: none)
    pub base_url: Option<Url>,

    /// Per-request timeout (default: 30 seconds)
    pub request_timeout: Duration,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// User-Agent header value
    pub user_agent: String,

    /// Value of the `client` header (default: "web")
    pub client_type: String,

    /// Bearer token attachment policy (default: `Include`)
    pub credentials: CredentialsMode,

    /// Tenant id sent when no other source has one (default: "0")
    pub tenant_fallback: String,

    /// Session related endpoint paths
    pub endpoints: EndpointConfig,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Maximum number of queued requests (default: 1024)
    pub buffer_capacity: usize,

    /// Maximum redirects to follow, `0` disables following (default: 10)
    pub max_redirects: usize,

    /// Idle pooled connection lifetime (default: 90 seconds)
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            client_type: DEFAULT_CLIENT_TYPE.to_owned(),
            credentials: CredentialsMode::Include,
            tenant_fallback: DEFAULT_TENANT_FALLBACK.to_owned(),
            endpoints: EndpointConfig::default(),
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            buffer_capacity: 1024,
            max_redirects: 10,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpClientConfig {
    /// Create configuration for testing with mock servers (allows insecure HTTP)
    ///
    /// **WARNING**: Use only for local testing, never in production.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
            transport: TransportSecurity::AllowInsecureHttp,
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Default::default()
        }
    }

    /// Load configuration from `CAREADMIN_*` environment variables.
    ///
    /// # Errors
    /// Returns `HttpError::Config` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, HttpError> {
        ClientSettings::load()?.into_config()
    }
}

/// Serializable form of [`HttpClientConfig`], as read from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub base_url: Option<String>,
    #[serde(with = "humantime_duration")]
    pub request_timeout: Duration,
    pub client_type: String,
    pub credentials: CredentialsMode,
    pub tenant_fallback: String,
    pub session_endpoint: String,
    pub privacy_policy_path: String,
    pub tls_roots: TlsRootConfig,
    pub allow_insecure_http: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let config = HttpClientConfig::default();
        Self {
            base_url: None,
            request_timeout: config.request_timeout,
            client_type: config.client_type,
            credentials: config.credentials,
            tenant_fallback: config.tenant_fallback,
            session_endpoint: config.endpoints.session,
            privacy_policy_path: config.endpoints.privacy_policy_path,
            tls_roots: config.tls_roots,
            allow_insecure_http: false,
        }
    }
}

impl ClientSettings {
    /// Defaults overlaid with `CAREADMIN_*` environment variables.
    ///
    /// # Errors
    /// Returns `HttpError::Config` if a variable has the wrong shape.
    pub fn load() -> Result<Self, HttpError> {
        Ok(Self::figment().extract()?)
    }

    /// The figment this crate reads settings from, for callers that want
    /// to merge additional providers.
    #[must_use]
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(ClientSettings::default()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Convert into a client configuration.
    ///
    /// # Errors
    /// Returns `HttpError::Config` if `base_url` is not an absolute URL.
    pub fn into_config(self) -> Result<HttpClientConfig, HttpError> {
        let base_url = self
            .base_url
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                Url::parse(raw.trim())
                    .map_err(|e| HttpError::Config(format!("invalid base_url '{raw}': {e}")))
            })
            .transpose()?;

        let transport = if self.allow_insecure_http {
            TransportSecurity::AllowInsecureHttp
        } else {
            TransportSecurity::TlsOnly
        };

        let defaults = HttpClientConfig::default();
        let endpoints = EndpointConfig {
            session: self.session_endpoint,
            privacy_policy_path: self.privacy_policy_path,
            ..defaults.endpoints
        };
        Ok(HttpClientConfig {
            base_url,
            request_timeout: self.request_timeout,
            client_type: self.client_type,
            credentials: self.credentials,
            tenant_fallback: self.tenant_fallback,
            endpoints,
            transport,
            tls_roots: self.tls_roots,
            ..defaults
        })
    }
}

/// Durations as humantime strings ("30s", "1m 30s").
mod humantime_duration {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_http_client_config_defaults() {
        let config = HttpClientConfig::default();
        assert!(config.base_url.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.client_type, "web");
        assert_eq!(config.credentials, CredentialsMode::Include);
        assert_eq!(config.tenant_fallback, "0");
        assert_eq!(config.endpoints.session, "/session");
        assert_eq!(config.endpoints.privacy_policy_path, "/privacy-policy");
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
        assert_eq!(config.buffer_capacity, 1024);
    }

    #[test]
    fn test_http_client_config_for_testing() {
        let config = HttpClientConfig::for_testing();
        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.tenant_fallback, "0");
    }

    #[test]
    fn test_settings_from_env() {
        temp_env::with_vars(
            [
                ("CAREADMIN_BASE_URL", Some("https://api.careadmin.test/v1/")),
                ("CAREADMIN_REQUEST_TIMEOUT", Some("45s")),
                ("CAREADMIN_CREDENTIALS", Some("same-origin")),
                ("CAREADMIN_CLIENT_TYPE", Some("admin-portal")),
                ("CAREADMIN_TENANT_FALLBACK", None),
            ],
            || {
                let config = HttpClientConfig::from_env().unwrap();
                assert_eq!(
                    config.base_url.unwrap().as_str(),
                    "https://api.careadmin.test/v1/"
                );
                assert_eq!(config.request_timeout, Duration::from_secs(45));
                assert_eq!(config.credentials, CredentialsMode::SameOrigin);
                assert_eq!(config.client_type, "admin-portal");
                assert_eq!(config.tenant_fallback, "0");
            },
        );
    }

    #[test]
    fn test_settings_without_env_are_defaults() {
        temp_env::with_vars(
            [
                ("CAREADMIN_BASE_URL", None::<&str>),
                ("CAREADMIN_REQUEST_TIMEOUT", None),
                ("CAREADMIN_CREDENTIALS", None),
                ("CAREADMIN_ALLOW_INSECURE_HTTP", None),
            ],
            || {
                assert_eq!(ClientSettings::load().unwrap(), ClientSettings::default());
            },
        );
    }

    #[test]
    fn test_allow_insecure_http_from_env() {
        temp_env::with_var("CAREADMIN_ALLOW_INSECURE_HTTP", Some("true"), || {
            let config = HttpClientConfig::from_env().unwrap();
            assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        });
    }

    #[test]
    fn test_invalid_timeout_is_config_error() {
        temp_env::with_var("CAREADMIN_REQUEST_TIMEOUT", Some("soon"), || {
            let err = ClientSettings::load().unwrap_err();
            assert!(matches!(err, HttpError::Config(_)));
        });
    }

    #[test]
    fn test_relative_base_url_rejected() {
        let settings = ClientSettings {
            base_url: Some("api/v1".to_owned()),
            ..Default::default()
        };
        assert!(matches!(settings.into_config(), Err(HttpError::Config(_))));
    }

    #[test]
    fn test_blank_base_url_means_none() {
        let settings = ClientSettings {
            base_url: Some("  ".to_owned()),
            ..Default::default()
        };
        assert!(settings.into_config().unwrap().base_url.is_none());
    }
}
