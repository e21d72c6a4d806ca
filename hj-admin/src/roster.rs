//! Resolver overrides and decommission re-sequencing

use hj_common::address::{validate_address, HarvestLookup};
use hj_common::config::LedgerPaths;
use hj_common::ledger::{HarvestStore, ProspectLedger, SendHistory, UnsubscribeLedger};
use hj_common::lock::ProcessLock;
use hj_common::time::MonotonicClock;
use hj_common::uuid_utils;
use hj_common::{Error, Result, SendAttempt, SendResult};
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;
use tracing::info;

const LOCK_SCRIPT_NAME: &str = "hj-admin";

/// Record a `resolver:override` history event.
///
/// The next sender run re-pins `resolved_email` to `email` even if the
/// company already has a successful send.
pub fn record_override(paths: &LedgerPaths, company_id: u64, email: &str) -> Result<SendAttempt> {
    let email = email.trim().to_ascii_lowercase();
    validate_address(&email)
        .map_err(|reason| Error::InvalidInput(format!("invalid address {:?}: {:?}", email, reason)))?;
    if ProspectLedger::new(&paths.prospects).get(company_id)?.is_none() {
        return Err(Error::InvalidInput(format!("unknown company id {}", company_id)));
    }

    let attempt = SendAttempt {
        attempted_at: MonotonicClock::new().now(),
        company_id,
        address: email,
        tracking_id: uuid_utils::generate(),
        result: SendResult::ResolverOverride,
        error: String::new(),
        subject: String::new(),
        message_id: String::new(),
    };
    SendHistory::new(&paths.send_history).append(&attempt)?;
    info!(company_id, address = %attempt.address, "Resolver override recorded");
    Ok(attempt)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecommissionReport {
    pub removed: Vec<u64>,
    /// `(old id, new id)` for every row that moved
    pub renumbered: Vec<(u64, u64)>,
}

/// Remove companies that were never contacted and close the id gaps.
///
/// Holds the sender's process lock for the duration so no run sees a
/// half-renumbered table. Refuses when a removed id, or an id that would
/// move, is referenced by the send history, an unsubscribe match or the
/// harvest store.
pub fn decommission(paths: &LedgerPaths, ids: &[u64], lock_timeout: Duration) -> Result<DecommissionReport> {
    let mut lock = ProcessLock::new(&paths.lock_file, LOCK_SCRIPT_NAME);
    lock.acquire_or_timeout(lock_timeout)?;

    let history: HashSet<u64> = SendHistory::new(&paths.send_history)
        .load()?
        .iter()
        .map(|a| a.company_id)
        .collect();
    let matched: HashSet<u64> = UnsubscribeLedger::new(&paths.unsubscribes)
        .load()?
        .iter()
        .filter_map(|e| e.matched_company_id)
        .collect();
    let harvest = HarvestStore::load(&paths.harvest, 0.0)?;
    let references = |id: u64| -> Option<&'static str> {
        if history.contains(&id) {
            Some("send history")
        } else if matched.contains(&id) {
            Some("an unsubscribe event")
        } else if harvest.harvested_address(id).is_some() {
            Some("the harvest store")
        } else {
            None
        }
    };

    let targets: BTreeSet<u64> = ids.iter().copied().collect();
    let report = ProspectLedger::new(&paths.prospects).update(|companies| {
        let known: HashSet<u64> = companies.iter().map(|c| c.id).collect();
        if let Some(missing) = targets.iter().find(|id| !known.contains(id)) {
            return (Err(Error::InvalidInput(format!("unknown company id {}", missing))), false);
        }
        if let Some((id, source)) = targets.iter().find_map(|&id| references(id).map(|s| (id, s))) {
            return (
                Err(Error::InvalidInput(format!(
                    "company {} is referenced by {}; it cannot be removed",
                    id, source
                ))),
                false,
            );
        }

        let mut kept: Vec<_> = companies
            .iter()
            .filter(|c| !targets.contains(&c.id))
            .cloned()
            .collect();
        kept.sort_by_key(|c| c.id);
        let base = companies.iter().map(|c| c.id).min().unwrap_or(1);

        let mut renumbered = Vec::new();
        for (offset, company) in kept.iter_mut().enumerate() {
            let new_id = base + offset as u64;
            if company.id == new_id {
                continue;
            }
            if let Some(source) = references(company.id) {
                return (
                    Err(Error::InvalidInput(format!(
                        "company {} would become {} but is referenced by {}",
                        company.id, new_id, source
                    ))),
                    false,
                );
            }
            renumbered.push((company.id, new_id));
            company.id = new_id;
        }

        *companies = kept;
        let report = DecommissionReport {
            removed: targets.iter().copied().collect(),
            renumbered,
        };
        let changed = !report.removed.is_empty();
        (Ok(report), changed)
    })??;

    lock.release();
    info!(
        removed = ?report.removed,
        renumbered = report.renumbered.len(),
        "Decommission complete"
    );
    Ok(report)
}
