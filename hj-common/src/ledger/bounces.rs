//! Bounce Ledger, keyed by source-mailbox message UID

use super::{AppendLedger, LedgerRecord, Row};
use crate::domain::same_address;
use crate::models::{BounceClass, BounceEvent};
use crate::time::{format_timestamp, parse_timestamp};
use std::collections::HashSet;

pub type BounceLedger = AppendLedger<BounceEvent>;

impl LedgerRecord for BounceEvent {
    const COLUMNS: &'static [&'static str] = &[
        "observed_at",
        "message_uid",
        "recipient",
        "class",
        "reason",
        "raw_subject",
    ];

    fn to_cells(&self) -> Vec<String> {
        vec![
            format_timestamp(&self.observed_at),
            self.message_uid.clone(),
            self.recipient.clone(),
            self.class.as_str().to_string(),
            self.reason.clone(),
            self.raw_subject.clone(),
        ]
    }

    fn from_row(row: &Row<'_>) -> Option<Self> {
        Some(BounceEvent {
            observed_at: row.get("observed_at").and_then(parse_timestamp)?,
            message_uid: row.non_empty(&["message_uid", "uid"])?.to_string(),
            recipient: row.get_any(&["recipient", "email"]).unwrap_or_default().to_string(),
            class: BounceClass::parse_or_default(row.get_any(&["class", "bounce_class"]).unwrap_or_default()),
            reason: row.get("reason").unwrap_or_default().to_string(),
            raw_subject: row.get_any(&["raw_subject", "subject"]).unwrap_or_default().to_string(),
        })
    }
}

/// Message UIDs already present in the ledger
pub fn recorded_uids(events: &[BounceEvent]) -> HashSet<String> {
    events.iter().map(|e| e.message_uid.clone()).collect()
}

/// Whether any permanent bounce names `address`
pub fn has_permanent_bounce(events: &[BounceEvent], address: &str) -> bool {
    events
        .iter()
        .any(|e| e.class == BounceClass::Permanent && same_address(&e.recipient, address))
}
