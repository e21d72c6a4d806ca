//! Address validation and the three-tier address resolver
//!
//! Resolution precedence is fixed: roster address, then harvested address,
//! then `info@<website host>`. Every tier applies the same syntactic checks,
//! including a denylist of asset file names that scrapers commonly mistake
//! for addresses (`logo@2x.png`, `banner-top@site.jpg`, ...).

use crate::domain::website_domain;
use crate::models::{Company, ResolutionMethod};
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
});

/// File extensions that never terminate a real address
pub const DENIED_SUFFIXES: &[&str] = &[
    // images
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".bmp", ".ico", ".tif", ".tiff", ".avif",
    // fonts
    ".woff", ".woff2", ".ttf", ".otf", ".eot",
    // styles and scripts
    ".css", ".scss", ".js", ".mjs", ".map", ".json", ".xml",
    // documents and media
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".zip", ".mp3", ".mp4",
    ".mov", ".webm",
];

/// Asset-name shapes harvested from markup (`icon@2x.png`, `logo-white@site.svg`).
/// Name prefixes and density markers only count when an asset extension
/// follows; `bgates@example.co.jp` and `info@3x.co.jp` are real addresses.
static DENIED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)@\d+(\.\d+)?x\.(png|jpe?g|gif|svg|webp|avif|ico)$",
        r"(?i)^(banner|logo|icon|img|image|sprite|bg|thumb|favicon)[^@]*@.*\.(png|jpe?g|gif|svg|webp|avif|ico|bmp)$",
        r"(?i)^[0-9a-f]{32}@",
        r"(?i)@(sentry|wixpress)\.",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Roster placeholders meaning "no address supplied"
const ABSENT_MARKERS: &[&str] = &["", "-", "\u{2010}", "\u{FF0D}", "\u{2014}", "\u{2015}", "nan", "none"];

/// Why an address failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidAddress {
    Syntax,
    TooLong,
    LocalTooLong,
    Domain,
    Denylisted(String),
}

/// Syntactic validity check applied at every resolver tier
pub fn validate_address(address: &str) -> Result<(), InvalidAddress> {
    if address.len() > MAX_ADDRESS_LEN {
        return Err(InvalidAddress::TooLong);
    }
    if !ADDRESS_RE.is_match(address) {
        return Err(InvalidAddress::Syntax);
    }
    let (local, domain) = address
        .rsplit_once('@')
        .ok_or(InvalidAddress::Syntax)?;
    if local.len() > MAX_LOCAL_LEN {
        return Err(InvalidAddress::LocalTooLong);
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(InvalidAddress::Domain);
    }
    if !labels
        .last()
        .map(|l| l.chars().all(|c| c.is_ascii_alphabetic()))
        .unwrap_or(false)
    {
        return Err(InvalidAddress::Domain);
    }

    let lowered = address.to_ascii_lowercase();
    if let Some(suffix) = DENIED_SUFFIXES.iter().find(|s| lowered.ends_with(*s)) {
        return Err(InvalidAddress::Denylisted(suffix.to_string()));
    }
    if let Some(pattern) = DENIED_PATTERNS.iter().find(|p| p.is_match(address)) {
        return Err(InvalidAddress::Denylisted(pattern.as_str().to_string()));
    }
    Ok(())
}

pub fn is_valid_address(address: &str) -> bool {
    validate_address(address).is_ok()
}

/// Normalize a roster cell; placeholders become `None`
pub fn roster_value(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    let lowered = trimmed.to_lowercase();
    if ABSENT_MARKERS.contains(&lowered.as_str()) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Tier 2 collaborator: addresses harvested from company websites
pub trait HarvestLookup {
    /// Best harvested address for a company id, if any passes the
    /// collaborator's own acceptance policy
    fn harvested_address(&self, company_id: u64) -> Option<&str>;
}

impl HarvestLookup for std::collections::HashMap<u64, String> {
    fn harvested_address(&self, company_id: u64) -> Option<&str> {
        self.get(&company_id).map(String::as_str)
    }
}

/// Output of the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub address: Option<String>,
    pub method: ResolutionMethod,
}

impl Resolution {
    pub fn unresolved() -> Self {
        Self {
            address: None,
            method: ResolutionMethod::Unresolved,
        }
    }

    fn found(address: &str, method: ResolutionMethod) -> Self {
        Self {
            address: Some(address.trim().to_string()),
            method,
        }
    }
}

/// Resolve the single address the pipeline will attempt for a company.
///
/// Pure: the same row and harvest data always produce the same result.
pub fn resolve(company: &Company, harvest: &dyn HarvestLookup) -> Resolution {
    if let Some(roster) = roster_value(company.roster_email.as_deref()) {
        if is_valid_address(&roster) {
            return Resolution::found(&roster, ResolutionMethod::Roster);
        }
        tracing::debug!(company_id = company.id, address = %roster, "Roster address rejected");
    }

    if let Some(harvested) = harvest.harvested_address(company.id) {
        let harvested = harvested.trim();
        if is_valid_address(harvested) {
            return Resolution::found(harvested, ResolutionMethod::Harvested);
        }
        tracing::debug!(company_id = company.id, address = %harvested, "Harvested address rejected");
    }

    if let Some(host) = company.website.as_deref().and_then(website_domain) {
        let derived = format!("info@{}", host);
        if is_valid_address(&derived) {
            return Resolution::found(&derived, ResolutionMethod::DomainDerived);
        }
        tracing::debug!(company_id = company.id, address = %derived, "Domain-derived address rejected");
    }

    Resolution::unresolved()
}
