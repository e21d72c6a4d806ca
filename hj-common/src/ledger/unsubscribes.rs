//! Unsubscribe Ledger and company matching
//!
//! An event matches a company when its address equals the company's roster
//! or resolved address (case-insensitive), or when its address domain equals
//! the company's website domain. Exact matches are tried first; the domain
//! tier is consulted only when no company matches exactly. A tier that hits
//! more than one distinct company leaves the event ambiguous.

use super::{AppendLedger, LedgerRecord, Row};
use crate::domain::{email_domain, website_domain};
use crate::models::{Company, UnsubscribeEvent, UnsubscribeSource, UnsubscribeState};
use crate::time::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Local};

pub type UnsubscribeLedger = AppendLedger<UnsubscribeEvent>;

impl LedgerRecord for UnsubscribeEvent {
    const COLUMNS: &'static [&'static str] =
        &["submitted_at", "email", "reason", "source", "matched_company_id"];

    fn to_cells(&self) -> Vec<String> {
        vec![
            format_timestamp(&self.submitted_at),
            self.email.clone(),
            self.reason.clone(),
            self.source.as_str().to_string(),
            self.matched_company_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
        ]
    }

    fn from_row(row: &Row<'_>) -> Option<Self> {
        let email = row.non_empty(&["email", "email_address"])?.to_string();
        // Opt-outs are permanent: keep the event even if its timestamp is unreadable
        let submitted_at = row
            .get_any(&["submitted_at", "timestamp"])
            .and_then(parse_timestamp)
            .unwrap_or_else(|| DateTime::<Local>::from(std::time::UNIX_EPOCH));
        Some(UnsubscribeEvent {
            submitted_at,
            email,
            reason: row.get("reason").unwrap_or_default().to_string(),
            source: UnsubscribeSource::parse_or_default(row.get("source").unwrap_or_default()),
            matched_company_id: row
                .get("matched_company_id")
                .and_then(|v| v.parse().ok()),
        })
    }
}

/// Result of matching one opt-out address against the Prospect Ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Address equals a roster/resolved address of exactly one company
    Exact(u64),
    /// Address domain equals the website domain of exactly one company
    Domain(u64),
    /// The deciding tier matched several companies
    Ambiguous(Vec<u64>),
    Unmatched,
}

impl MatchOutcome {
    pub fn company_id(&self) -> Option<u64> {
        match self {
            MatchOutcome::Exact(id) | MatchOutcome::Domain(id) => Some(*id),
            _ => None,
        }
    }
}

/// Whether `email` belongs to `company` by exact address
pub fn matches_exact(company: &Company, email: &str) -> bool {
    let lowered = email.trim().to_ascii_lowercase();
    company.known_addresses().iter().any(|a| *a == lowered)
}

/// Whether `email`'s domain equals `company`'s website domain
pub fn matches_domain(company: &Company, email: &str) -> bool {
    match (
        email_domain(email),
        company.website.as_deref().and_then(website_domain),
    ) {
        (Some(event_domain), Some(site_domain)) => event_domain == site_domain,
        _ => false,
    }
}

/// Match an opt-out address against every company
pub fn match_company(email: &str, companies: &[Company]) -> MatchOutcome {
    let exact = distinct_ids(companies.iter().filter(|c| matches_exact(c, email)));
    match exact.len() {
        1 => return MatchOutcome::Exact(exact[0]),
        n if n > 1 => return MatchOutcome::Ambiguous(exact),
        _ => {}
    }
    let domain = distinct_ids(companies.iter().filter(|c| matches_domain(c, email)));
    match domain.len() {
        0 => MatchOutcome::Unmatched,
        1 => MatchOutcome::Domain(domain[0]),
        _ => MatchOutcome::Ambiguous(domain),
    }
}

fn distinct_ids<'a>(companies: impl Iterator<Item = &'a Company>) -> Vec<u64> {
    let mut ids: Vec<u64> = companies.map(|c| c.id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Mirror one event onto a company row. The first event to reach a row wins;
/// rows already unsubscribed are left untouched. Returns whether the row changed.
pub fn mirror_event(company: &mut Company, event: &UnsubscribeEvent) -> bool {
    if company.unsubscribe_state == UnsubscribeState::Unsubscribed {
        return false;
    }
    company.unsubscribe_state = UnsubscribeState::Unsubscribed;
    company.unsubscribe_time = Some(event.submitted_at);
    company.unsubscribe_reason = Some(mirror_reason(event));
    true
}

fn mirror_reason(event: &UnsubscribeEvent) -> String {
    if event.reason.trim().is_empty() {
        format!("{} ({})", event.source, event.email)
    } else {
        format!("{} ({})", event.reason.trim(), event.email)
    }
}

/// Replay the whole ledger onto the mirrored columns.
///
/// Events are applied in ledger order. An event with a stored
/// `matched_company_id` mirrors onto that row; otherwise the matching rule
/// decides. Ambiguous and unmatched events mirror nothing. Replaying twice
/// yields the same table. Returns the ids whose rows changed.
pub fn replay_mirror(companies: &mut [Company], events: &[UnsubscribeEvent]) -> Vec<u64> {
    let mut changed = Vec::new();
    for event in events {
        let target = event
            .matched_company_id
            .or_else(|| match_company(&event.email, companies).company_id());
        let Some(id) = target else { continue };
        if let Some(company) = companies.iter_mut().find(|c| c.id == id) {
            if mirror_event(company, event) {
                changed.push(id);
            }
        }
    }
    changed
}
