//! Pipeline configuration.
//!
//! Loaded with figment from built-in defaults, an optional YAML file and
//! `SITEKIT__`-prefixed environment variables (`__` separates sections):
//!
//! ```yaml
//! site_url: https://contoso.sharepoint.com/sites/dev
//! graph:
//!   max_batch_size: 20
//!   retry:
//!     max_retries: 3
//! batch:
//!   concurrency: 2
//! ```
//!
//! `SITEKIT__GRAPH__RETRY__MAX_RETRIES=3` overrides the same value.

use crate::error::SiteError;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use sitekit_http::{
    Backoff, CapacityFloor, ExponentialBackoff, RetryConfig, ThrottleConfig, TransportConfig,
    TransportSecurity,
};
use sitekit_odata::{DEFAULT_GRAPH_ROOT, Protocol, TranslatorOptions};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "SITEKIT__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteKitConfig {
    /// Absolute URL of the site, e.g. `https://contoso.sharepoint.com/sites/dev`
    #[serde(default)]
    pub site_url: String,

    #[serde(default = "default_graph_root")]
    pub graph_root: String,

    /// `ApplicationName` sent with CSOM documents
    #[serde(default = "default_application_name")]
    pub application_name: String,

    #[serde(default = "ProtocolConfig::rest")]
    pub rest: ProtocolConfig,

    #[serde(default = "ProtocolConfig::graph")]
    pub graph: ProtocolConfig,

    #[serde(default = "ProtocolConfig::csom")]
    pub csom: ProtocolConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_graph_root() -> String {
    DEFAULT_GRAPH_ROOT.to_owned()
}

fn default_application_name() -> String {
    sitekit_csom::DEFAULT_APPLICATION_NAME.to_owned()
}

impl Default for SiteKitConfig {
    fn default() -> Self {
        Self {
            site_url: String::new(),
            graph_root: default_graph_root(),
            application_name: default_application_name(),
            rest: ProtocolConfig::rest(),
            graph: ProtocolConfig::graph(),
            csom: ProtocolConfig::csom(),
            batch: BatchConfig::default(),
        }
    }
}

impl SiteKitConfig {
    /// Configuration for `site_url` with every other value defaulted
    #[must_use]
    pub fn for_site(site_url: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            ..Self::default()
        }
    }

    /// Layered provider: defaults, then `path` if given, then the environment.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate.
    ///
    /// # Errors
    /// [`SiteError::Config`] when a layer cannot be parsed or the result is
    /// inconsistent.
    pub fn load(path: Option<&Path>) -> Result<Self, SiteError> {
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// [`SiteError::Config`] describing the first inconsistent value.
    pub fn validate(&self) -> Result<(), SiteError> {
        for (key, url) in [("site_url", &self.site_url), ("graph_root", &self.graph_root)] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(SiteError::Config(format!("{key} must be an absolute http(s) URL, got '{url}'")));
            }
        }
        if self.batch.concurrency == 0 {
            return Err(SiteError::Config("batch.concurrency must be at least 1".to_owned()));
        }
        for protocol in [Protocol::Rest, Protocol::Graph] {
            if self.protocol(protocol).max_batch_size == 0 {
                return Err(SiteError::Config(format!(
                    "{}.max_batch_size must be at least 1",
                    protocol.as_str().to_lowercase()
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn protocol(&self, protocol: Protocol) -> &ProtocolConfig {
        match protocol {
            Protocol::Rest => &self.rest,
            Protocol::Graph => &self.graph,
            Protocol::Csom => &self.csom,
        }
    }

    /// Site URL without a trailing slash
    #[must_use]
    pub fn site_root(&self) -> &str {
        self.site_url.trim_end_matches('/')
    }

    #[must_use]
    pub fn graph_root(&self) -> &str {
        self.graph_root.trim_end_matches('/')
    }

    #[must_use]
    pub fn translator_options(&self) -> TranslatorOptions {
        TranslatorOptions::new(self.site_root())
            .with_graph_root(self.graph_root())
            .with_prefer_graph(self.batch.prefer_graph)
    }
}

/// Transport and batching settings of one protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Per-attempt timeout
    pub request_timeout_ms: u64,

    /// Deadline across all attempts, unbounded when absent
    pub total_timeout_ms: Option<u64>,

    pub max_body_size: usize,

    /// Sub-requests per batch call; ignored for CSOM, whose documents are never split
    pub max_batch_size: usize,

    /// Plain HTTP endpoints (local mock servers only)
    pub allow_insecure_http: bool,

    pub retry: RetrySection,

    pub throttle: ThrottleSection,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 100_000,
            total_timeout_ms: None,
            max_body_size: 50 * 1024 * 1024,
            max_batch_size: 100,
            allow_insecure_http: false,
            retry: RetrySection::default(),
            throttle: ThrottleSection::default(),
        }
    }
}

impl ProtocolConfig {
    #[must_use]
    pub fn rest() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn graph() -> Self {
        Self {
            max_batch_size: 20,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn csom() -> Self {
        Self {
            max_batch_size: usize::MAX,
            ..Self::default()
        }
    }

    /// Transport chain settings for this protocol
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            total_timeout: self.total_timeout_ms.map(Duration::from_millis),
            retry: self.retry.enabled.then(|| self.retry.retry_config()),
            throttle: self.throttle.enabled.then(|| self.throttle.throttle_config()),
            max_body_size: self.max_body_size,
            transport: if self.allow_insecure_http {
                TransportSecurity::AllowInsecureHttp
            } else {
                TransportSecurity::TlsOnly
            },
            ..TransportConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// `initial * multiplier^attempt`
    Exponential,
    /// `initial * (attempt + 1)`
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub enabled: bool,
    pub max_retries: usize,
    /// Statuses retried for every method
    pub statuses: Vec<u16>,
    pub backoff: BackoffKind,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 5,
            statuses: vec![429, 503, 504],
            backoff: BackoffKind::Exponential,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetrySection {
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        let initial = Duration::from_millis(self.initial_backoff_ms);
        let max = Duration::from_millis(self.max_backoff_ms);
        let backoff = match self.backoff {
            BackoffKind::Exponential => Backoff::Exponential(ExponentialBackoff {
                initial,
                max,
                multiplier: self.multiplier,
                jitter: self.jitter,
            }),
            BackoffKind::Incremental => Backoff::Incremental { step: initial, max },
        };
        RetryConfig {
            max_retries: self.max_retries,
            backoff,
            ..RetryConfig::default()
        }
        .with_statuses(self.statuses.iter().copied())
    }
}

/// Rate-limit headers observed after every response.
///
/// The floor is `floor_absolute` when set, otherwise `floor_percent` of the
/// limit header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSection {
    pub enabled: bool,
    pub remaining_header: String,
    pub reset_header: String,
    pub limit_header: String,
    pub floor_absolute: Option<u32>,
    pub floor_percent: u8,
    pub max_delay_ms: u64,
}

impl Default for ThrottleSection {
    fn default() -> Self {
        let defaults = ThrottleConfig::default();
        Self {
            enabled: true,
            remaining_header: defaults.remaining_header,
            reset_header: defaults.reset_header,
            limit_header: defaults.limit_header,
            floor_absolute: None,
            floor_percent: 10,
            max_delay_ms: 300_000,
        }
    }
}

impl ThrottleSection {
    #[must_use]
    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            remaining_header: self.remaining_header.clone(),
            reset_header: self.reset_header.clone(),
            limit_header: self.limit_header.clone(),
            floor: self
                .floor_absolute
                .map_or(CapacityFloor::PercentOfLimit(self.floor_percent), CapacityFloor::Absolute),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Batch calls of one execution in flight at once
    pub concurrency: usize,

    /// Send a partition holding one request as a plain call
    pub direct_single: bool,

    /// Serve from Graph whenever Graph can, even if REST could too
    pub prefer_graph: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            direct_single: true,
            prefer_graph: true,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_differ_per_protocol() {
        let config = SiteKitConfig::default();
        assert_eq!(config.rest.max_batch_size, 100);
        assert_eq!(config.graph.max_batch_size, 20);
        assert_eq!(config.graph_root, "https://graph.microsoft.com/v1.0");
        assert!(config.batch.prefer_graph);
    }

    #[test]
    fn test_yaml_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sitekit.yaml",
                r"
site_url: https://contoso.example.com/sites/dev/
graph:
  max_batch_size: 10
  retry:
    max_retries: 2
    backoff: incremental
batch:
  concurrency: 2
",
            )?;
            jail.set_env("SITEKIT__GRAPH__RETRY__MAX_RETRIES", "7");
            jail.set_env("SITEKIT__REST__THROTTLE__FLOOR_ABSOLUTE", "50");

            let config = SiteKitConfig::load(Some(Path::new("sitekit.yaml"))).unwrap();

            assert_eq!(config.site_root(), "https://contoso.example.com/sites/dev");
            assert_eq!(config.graph.max_batch_size, 10);
            assert_eq!(config.graph.retry.max_retries, 7);
            assert_eq!(config.graph.retry.backoff, BackoffKind::Incremental);
            // untouched fields of a partially given section keep their defaults
            assert_eq!(config.graph.retry.statuses, vec![429, 503, 504]);
            assert_eq!(config.rest.max_batch_size, 100);
            assert_eq!(config.batch.concurrency, 2);
            assert_eq!(
                config.rest.throttle.throttle_config().floor,
                CapacityFloor::Absolute(50)
            );
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("SITEKIT__SITE_URL", "contoso");
            let err = SiteKitConfig::load(None).unwrap_err();
            assert!(err.to_string().contains("site_url"));

            jail.set_env("SITEKIT__SITE_URL", "https://contoso.example.com");
            jail.set_env("SITEKIT__BATCH__CONCURRENCY", "0");
            assert!(matches!(SiteKitConfig::load(None), Err(SiteError::Config(_))));
            Ok(())
        });
    }

    #[test]
    fn test_transport_config_mapping() {
        let mut section = ProtocolConfig::graph();
        section.request_timeout_ms = 1_500;
        section.allow_insecure_http = true;
        section.retry.statuses = vec![429];
        section.throttle.enabled = false;

        let transport = section.transport_config();

        assert_eq!(transport.request_timeout, Duration::from_millis(1_500));
        assert_eq!(transport.transport, TransportSecurity::AllowInsecureHttp);
        assert!(transport.throttle.is_none());
        let retry = transport.retry.unwrap();
        assert!(retry.is_retriable_status(429));
        assert!(!retry.is_retriable_status(503));
    }
}
