//! MX resolution for direct delivery.
//!
//! Looks up the mail exchangers of a recipient domain and caches the result
//! keyed on the record TTL (bounded by configuration). A domain with no MX
//! records is treated as its own mail exchanger, so delivery still has a
//! host to try.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use hickory_resolver::{
    TokioResolver,
    config::ResolverOpts,
    name_server::TokioConnectionProvider,
};
use postrider_common::Domain;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during MX resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// The resolver could not be built from system configuration.
    #[error("resolver initialisation failed: {0}")]
    Init(#[from] hickory_resolver::ResolveError),

    /// The lookup itself failed (network trouble, SERVFAIL, timeout).
    /// "No records" is not a lookup failure; it triggers the fallback.
    #[error("MX lookup failed for {domain}: {reason}")]
    Lookup { domain: String, reason: String },
}

/// Configuration for the resolver and its cache.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// DNS query timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Lower bound applied to record TTLs before caching.
    #[serde(default = "default_min_cache_ttl_secs")]
    pub min_cache_ttl_secs: u64,

    /// Upper bound applied to record TTLs before caching.
    #[serde(default = "default_max_cache_ttl_secs")]
    pub max_cache_ttl_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_min_cache_ttl_secs() -> u64 {
    60
}

const fn default_max_cache_ttl_secs() -> u64 {
    3600
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            min_cache_ttl_secs: default_min_cache_ttl_secs(),
            max_cache_ttl_secs: default_max_cache_ttl_secs(),
        }
    }
}

/// A mail exchanger candidate for a recipient domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailExchanger {
    /// Hostname to connect to.
    pub host: String,
    /// MX preference; lower is tried first. 0 for the implicit fallback.
    pub priority: u16,
}

impl MailExchanger {
    #[must_use]
    pub const fn new(host: String, priority: u16) -> Self {
        Self { host, priority }
    }
}

/// Resolves the hosts a unit should be delivered to.
///
/// A trait seam so the delivery engine can be exercised without touching the
/// network.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve the mail exchangers for `domain`, best-preference first.
    /// Always returns at least one entry on success.
    async fn resolve(&self, domain: &Domain) -> Result<Vec<MailExchanger>, DnsError>;
}

#[derive(Debug, Clone)]
struct CachedResult {
    exchangers: Arc<Vec<MailExchanger>>,
    expires_at: Instant,
}

/// [`HostResolver`] backed by hickory with a TTL-bounded concurrent cache.
#[derive(Debug)]
pub struct MxResolver {
    resolver: TokioResolver,
    cache: DashMap<Domain, CachedResult>,
    config: DnsConfig,
}

impl MxResolver {
    /// Build a resolver from system DNS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system configuration cannot be loaded.
    pub fn new(config: &DnsConfig) -> Result<Self, DnsError> {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self {
            resolver,
            cache: DashMap::new(),
            config: config.clone(),
        })
    }

    async fn lookup(&self, domain: &Domain) -> Result<(Vec<MailExchanger>, u32), DnsError> {
        match self.resolver.mx_lookup(domain.as_str()).await {
            Ok(mx_lookup) => {
                let min_ttl = mx_lookup
                    .as_lookup()
                    .records()
                    .iter()
                    .map(hickory_resolver::proto::rr::Record::ttl)
                    .min()
                    .unwrap_or(300);

                let mut exchangers: Vec<MailExchanger> = mx_lookup
                    .iter()
                    .map(|mx| {
                        let host = mx.exchange().to_utf8();
                        let host = host.trim_end_matches('.').to_string();
                        MailExchanger::new(host, mx.preference())
                    })
                    .collect();

                if exchangers.is_empty() {
                    return Ok((Self::implicit(domain), min_ttl));
                }

                exchangers.sort_by_key(|mx| mx.priority);
                debug!(%domain, count = exchangers.len(), ttl = min_ttl, "resolved MX records");
                Ok((exchangers, min_ttl))
            }
            Err(err) if err.is_no_records_found() => {
                debug!(%domain, "no MX records, using the domain itself");
                Ok((Self::implicit(domain), 300))
            }
            Err(err) => Err(DnsError::Lookup {
                domain: domain.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    fn implicit(domain: &Domain) -> Vec<MailExchanger> {
        vec![MailExchanger::new(domain.to_string(), 0)]
    }
}

#[async_trait]
impl HostResolver for MxResolver {
    async fn resolve(&self, domain: &Domain) -> Result<Vec<MailExchanger>, DnsError> {
        if let Some(cached) = self.cache.get(domain)
            && cached.expires_at > Instant::now()
        {
            return Ok(cached.exchangers.as_ref().clone());
        }

        let (exchangers, ttl) = self.lookup(domain).await?;

        let cache_ttl = u64::from(ttl).clamp(
            self.config.min_cache_ttl_secs,
            self.config.max_cache_ttl_secs,
        );
        self.cache.insert(
            domain.clone(),
            CachedResult {
                exchangers: Arc::new(exchangers.clone()),
                expires_at: Instant::now() + Duration::from_secs(cache_ttl),
            },
        );

        Ok(exchangers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_exchanger_is_the_domain_itself() {
        let exchangers = MxResolver::implicit(&Domain::new("example.com"));
        assert_eq!(
            exchangers,
            vec![MailExchanger::new("example.com".to_string(), 0)]
        );
    }

    #[test]
    fn exchangers_sort_by_preference() {
        let mut exchangers = vec![
            MailExchanger::new("backup.example.com".to_string(), 20),
            MailExchanger::new("primary.example.com".to_string(), 5),
            MailExchanger::new("secondary.example.com".to_string(), 10),
        ];
        exchangers.sort_by_key(|mx| mx.priority);
        assert_eq!(exchangers[0].host, "primary.example.com");
        assert_eq!(exchangers[2].host, "backup.example.com");
    }
}
