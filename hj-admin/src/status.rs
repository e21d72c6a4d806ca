//! Ledger status summary

use hj_common::config::LedgerPaths;
use hj_common::ledger::{BounceLedger, ProcessedTracking, ProspectLedger, SendHistory, UnsubscribeLedger};
use hj_common::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStatus {
    pub companies: usize,
    /// Companies per `last_send_result` (`never` when no attempt yet)
    pub by_last_result: BTreeMap<String, usize>,
    pub by_bounce_class: BTreeMap<String, usize>,
    pub by_unsubscribe_state: BTreeMap<String, usize>,
    pub history_rows: usize,
    pub unsubscribe_events: usize,
    pub unmatched_unsubscribes: usize,
    pub bounce_events: usize,
    pub processed_bounce_uids: usize,
}

pub fn collect(paths: &LedgerPaths) -> Result<LedgerStatus> {
    let companies = ProspectLedger::new(&paths.prospects).load()?;
    let unsubscribes = UnsubscribeLedger::new(&paths.unsubscribes).load()?;

    let mut status = LedgerStatus {
        companies: companies.len(),
        history_rows: SendHistory::new(&paths.send_history).load()?.len(),
        unsubscribe_events: unsubscribes.len(),
        unmatched_unsubscribes: unsubscribes
            .iter()
            .filter(|e| e.matched_company_id.is_none())
            .count(),
        bounce_events: BounceLedger::new(&paths.bounces).load()?.len(),
        processed_bounce_uids: ProcessedTracking::load(&paths.processed_tracking)?.len(),
        ..Default::default()
    };
    for company in &companies {
        let last = company
            .last_send_result
            .map(|r| r.as_str())
            .unwrap_or("never");
        *status.by_last_result.entry(last.to_string()).or_default() += 1;
        *status
            .by_bounce_class
            .entry(company.bounce_class.to_string())
            .or_default() += 1;
        *status
            .by_unsubscribe_state
            .entry(company.unsubscribe_state.to_string())
            .or_default() += 1;
    }
    Ok(status)
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "companies: {}", self.companies)?;
        for (title, counts) in [
            ("last send result", &self.by_last_result),
            ("bounce class", &self.by_bounce_class),
            ("unsubscribe state", &self.by_unsubscribe_state),
        ] {
            writeln!(f, "{}:", title)?;
            for (key, count) in counts {
                writeln!(f, "  {:<22}{:>6}", key, count)?;
            }
        }
        writeln!(f, "send history rows: {}", self.history_rows)?;
        writeln!(
            f,
            "unsubscribe events: {} ({} without a matched company)",
            self.unsubscribe_events, self.unmatched_unsubscribes
        )?;
        writeln!(f, "bounce events: {}", self.bounce_events)?;
        write!(f, "processed bounce UIDs: {}", self.processed_bounce_uids)
    }
}
