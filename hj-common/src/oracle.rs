//! Suppression oracle: the single authority that turns ledger state into a
//! send decision for one (company, address) pair
//!
//! Decision order:
//! 1. row already unsubscribed
//! 2. Unsubscribe Ledger: exact address, then website domain
//! 3. row permanently bounced, or address named by a permanent bounce
//! 4. send
//!
//! Recency is never a reason to suppress.

use crate::domain::{email_domain, same_address, website_domain};
use crate::ledger::bounces::has_permanent_bounce;
use crate::models::{BounceClass, BounceEvent, Company, UnsubscribeEvent};
use crate::time::format_timestamp;

/// Ledger snapshots the oracle reads
#[derive(Debug, Default, Clone)]
pub struct SuppressionLedgers {
    pub unsubscribes: Vec<UnsubscribeEvent>,
    pub bounces: Vec<BounceEvent>,
}

/// Which unsubscribe rule fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeBasis {
    /// The company row itself is marked unsubscribed
    Row,
    /// An event names one of the company's addresses
    ExactAddress { event_index: usize },
    /// An event address shares the company's website domain
    Domain { event_index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Send,
    SkipUnsubscribed { basis: UnsubscribeBasis, reason: String },
    SkipBounced { reason: String },
}

impl Decision {
    pub fn is_send(&self) -> bool {
        matches!(self, Decision::Send)
    }

    pub fn reason(&self) -> &str {
        match self {
            Decision::Send => "",
            Decision::SkipUnsubscribed { reason, .. } | Decision::SkipBounced { reason } => {
                reason.as_str()
            }
        }
    }

    /// The ledger event behind an unsubscribe decision, if any
    pub fn unsubscribe_event<'a>(&self, ledgers: &'a SuppressionLedgers) -> Option<&'a UnsubscribeEvent> {
        match self {
            Decision::SkipUnsubscribed {
                basis: UnsubscribeBasis::ExactAddress { event_index } | UnsubscribeBasis::Domain { event_index },
                ..
            } => ledgers.unsubscribes.get(*event_index),
            _ => None,
        }
    }
}

/// Decide whether `candidate` may be sent to for `company`.
///
/// Pure: identical inputs always produce the identical decision.
pub fn decide(company: &Company, candidate: &str, ledgers: &SuppressionLedgers) -> Decision {
    if company.is_unsubscribed() {
        let reason = match (&company.unsubscribe_reason, &company.unsubscribe_time) {
            (Some(r), Some(t)) => format!("company unsubscribed at {}: {}", format_timestamp(t), r),
            (Some(r), None) => format!("company unsubscribed: {}", r),
            _ => "company unsubscribed".to_string(),
        };
        return Decision::SkipUnsubscribed {
            basis: UnsubscribeBasis::Row,
            reason,
        };
    }

    let mut addresses = company.known_addresses();
    let candidate_lower = candidate.trim().to_ascii_lowercase();
    if !addresses.contains(&candidate_lower) {
        addresses.push(candidate_lower);
    }
    if let Some((index, event)) = ledgers
        .unsubscribes
        .iter()
        .enumerate()
        .find(|(_, e)| addresses.iter().any(|a| same_address(a, &e.email)))
    {
        return Decision::SkipUnsubscribed {
            basis: UnsubscribeBasis::ExactAddress { event_index: index },
            reason: format!(
                "unsubscribed address {} ({} via {}, {})",
                event.email,
                reason_or_dash(&event.reason),
                event.source,
                format_timestamp(&event.submitted_at)
            ),
        };
    }

    if let Some(site_domain) = company.website.as_deref().and_then(website_domain) {
        if let Some((index, event)) = ledgers
            .unsubscribes
            .iter()
            .enumerate()
            .find(|(_, e)| email_domain(&e.email).as_deref() == Some(site_domain.as_str()))
        {
            return Decision::SkipUnsubscribed {
                basis: UnsubscribeBasis::Domain { event_index: index },
                reason: format!(
                    "domain match on {} from unsubscribed address {} ({})",
                    site_domain,
                    event.email,
                    reason_or_dash(&event.reason)
                ),
            };
        }
    }

    if company.bounce_class == BounceClass::Permanent {
        return Decision::SkipBounced {
            reason: format!(
                "company has permanent bounce: {}",
                company.bounce_reason.as_deref().unwrap_or("no reason recorded")
            ),
        };
    }
    if has_permanent_bounce(&ledgers.bounces, candidate) {
        return Decision::SkipBounced {
            reason: format!("permanent bounce recorded for {}", candidate.trim()),
        };
    }

    Decision::Send
}

fn reason_or_dash(reason: &str) -> &str {
    if reason.trim().is_empty() {
        "-"
    } else {
        reason
    }
}
