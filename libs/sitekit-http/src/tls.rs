//! Crypto provider and root store for the HTTPS connector.

use crate::error::HttpError;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use std::sync::{Arc, LazyLock};

/// The OS trust store, read once per process. Unreadable entries are logged
/// and skipped.
static NATIVE_ROOTS: LazyLock<RootCertStore> = LazyLock::new(|| {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!(error = %err, "skipping unreadable native root certificate");
    }
    let mut store = RootCertStore::empty();
    let (added, rejected) = store.add_parsable_certificates(loaded.certs);
    tracing::debug!(added, rejected, "native root store loaded");
    store
});

/// The process-wide provider when one is installed, aws-lc-rs otherwise.
#[must_use]
pub fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Client configuration trusting the OS root store.
///
/// # Errors
/// `HttpError::Tls` when the store holds no usable certificate, so a broken
/// host setup fails when the transport is built instead of on first use.
pub fn native_roots_config() -> Result<ClientConfig, HttpError> {
    if NATIVE_ROOTS.is_empty() {
        return Err(HttpError::Tls("OS certificate store has no usable root certificate".into()));
    }
    let builder = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?;
    Ok(builder.with_root_certificates(NATIVE_ROOTS.clone()).with_no_client_auth())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_default_provider_has_cipher_suites() {
        assert!(!crypto_provider().cipher_suites.is_empty());
    }
}
