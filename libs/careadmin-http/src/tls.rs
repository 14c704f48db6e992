//! TLS connector construction.
//!
//! Native roots are read from the OS store once per process.

use crate::config::{TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use hyper_rustls::{ConfigBuilderExt as _, HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!(error = %err, "skipping unreadable native root certificate");
    }
    tracing::debug!(count = loaded.certs.len(), "native root certificates loaded");
    loaded.certs
}

/// OS root certificates, possibly empty.
fn native_roots() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots)
}

/// The process-wide provider if one is installed, otherwise aws-lc-rs.
///
/// Never installs a global default.
fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn native_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = native_roots();
    let mut store = rustls::RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates failed to parse");
    }
    if added == 0 {
        return Err(HttpError::Tls(
            format!(
                "no usable native root certificates (found {}, parsed 0)",
                certs.len()
            )
            .into(),
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .with_root_certificates(store)
        .with_no_client_auth();
    Ok(config)
}

fn webpki_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .with_webpki_roots()
        .with_no_client_auth();
    Ok(config)
}

/// HTTPS connector negotiating h2 or http/1.1 via ALPN.
///
/// Plain `http://` is only dialled under
/// [`TransportSecurity::AllowInsecureHttp`].
///
/// # Errors
/// Returns `HttpError::Tls` if the root store cannot be built.
pub fn build_https_connector(
    roots: TlsRootConfig,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let config = match roots {
        TlsRootConfig::WebPki => webpki_client_config()?,
        TlsRootConfig::Native => native_client_config()?,
    };

    let builder = HttpsConnectorBuilder::new().with_tls_config(config);
    let connector = match transport {
        TransportSecurity::AllowInsecureHttp => builder.https_or_http().enable_all_versions().build(),
        TransportSecurity::TlsOnly => builder.https_only().enable_all_versions().build(),
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn native_roots_are_cached() {
        let first = native_roots();
        let second = native_roots();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn webpki_connector_builds() {
        assert!(build_https_connector(TlsRootConfig::WebPki, TransportSecurity::TlsOnly).is_ok());
        assert!(
            build_https_connector(TlsRootConfig::WebPki, TransportSecurity::AllowInsecureHttp)
                .is_ok()
        );
    }

    #[test]
    fn native_connector_fails_only_with_tls_error() {
        // Minimal containers have no OS store.
        match build_https_connector(TlsRootConfig::Native, TransportSecurity::TlsOnly) {
            Ok(_) | Err(HttpError::Tls(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
