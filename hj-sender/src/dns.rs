//! Opt-in recipient domain pre-check
//!
//! Off by default: corporate resolvers stall and return false negatives,
//! and the SMTP server has the final word anyway. When enabled, a domain
//! passes if it has an MX record, or failing that an address record.
//! Lookup errors other than "no records" let the send proceed.

use async_trait::async_trait;
use hj_common::{Error, Result};
use std::time::Duration;
use trust_dns_resolver::error::ResolveErrorKind;
use trust_dns_resolver::TokioAsyncResolver;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait DomainCheck: Send + Sync {
    /// `false` only when the domain definitely cannot receive mail
    async fn accepts_mail(&self, domain: &str) -> bool;
}

pub struct DnsDomainCheck {
    resolver: TokioAsyncResolver,
}

impl DnsDomainCheck {
    pub fn from_system_conf() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Config(format!("DNS resolver init failed: {}", e)))?;
        Ok(Self { resolver })
    }
}

enum Lookup {
    Found,
    NoRecords,
    Inconclusive(String),
}

impl DnsDomainCheck {
    async fn mx(&self, domain: &str) -> Lookup {
        match tokio::time::timeout(LOOKUP_TIMEOUT, self.resolver.mx_lookup(domain)).await {
            Ok(Ok(records)) if records.iter().next().is_some() => Lookup::Found,
            Ok(Ok(_)) => Lookup::NoRecords,
            Ok(Err(e)) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Lookup::NoRecords,
                _ => Lookup::Inconclusive(e.to_string()),
            },
            Err(_) => Lookup::Inconclusive("MX lookup timed out".to_string()),
        }
    }

    async fn address(&self, domain: &str) -> Lookup {
        match tokio::time::timeout(LOOKUP_TIMEOUT, self.resolver.lookup_ip(domain)).await {
            Ok(Ok(ips)) if ips.iter().next().is_some() => Lookup::Found,
            Ok(Ok(_)) => Lookup::NoRecords,
            Ok(Err(e)) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Lookup::NoRecords,
                _ => Lookup::Inconclusive(e.to_string()),
            },
            Err(_) => Lookup::Inconclusive("address lookup timed out".to_string()),
        }
    }
}

#[async_trait]
impl DomainCheck for DnsDomainCheck {
    async fn accepts_mail(&self, domain: &str) -> bool {
        let fallback = match self.mx(domain).await {
            Lookup::Found => return true,
            Lookup::Inconclusive(reason) => {
                tracing::warn!(domain, reason = %reason, "MX lookup inconclusive; allowing send");
                return true;
            }
            Lookup::NoRecords => self.address(domain).await,
        };
        match fallback {
            Lookup::Found => true,
            Lookup::NoRecords => {
                tracing::info!(domain, "Domain has neither MX nor address records");
                false
            }
            Lookup::Inconclusive(reason) => {
                tracing::warn!(domain, reason = %reason, "Address lookup inconclusive; allowing send");
                true
            }
        }
    }
}
