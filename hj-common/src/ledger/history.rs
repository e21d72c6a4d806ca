//! Send-History Ledger: one row per pipeline iteration that reached a
//! terminal state, plus operator resolver-override events

use super::{AppendLedger, LedgerRecord, Row};
use crate::models::{SendAttempt, SendResult};
use crate::time::{format_timestamp, parse_timestamp};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub type SendHistory = AppendLedger<SendAttempt>;

impl LedgerRecord for SendAttempt {
    const COLUMNS: &'static [&'static str] = &[
        "attempted_at",
        "company_id",
        "address",
        "tracking_id",
        "result",
        "error",
        "subject",
        "message_id",
    ];

    fn to_cells(&self) -> Vec<String> {
        vec![
            format_timestamp(&self.attempted_at),
            self.company_id.to_string(),
            self.address.clone(),
            self.tracking_id.to_string(),
            self.result.as_str().to_string(),
            self.error.clone(),
            self.subject.clone(),
            self.message_id.clone(),
        ]
    }

    fn from_row(row: &Row<'_>) -> Option<Self> {
        Some(SendAttempt {
            attempted_at: row.get("attempted_at").and_then(parse_timestamp)?,
            company_id: row.non_empty(&["company_id"])?.parse().ok()?,
            address: row.get("address").unwrap_or_default().to_string(),
            tracking_id: row
                .get("tracking_id")
                .and_then(|v| Uuid::parse_str(v).ok())
                .unwrap_or_else(Uuid::nil),
            result: SendResult::parse_or_default(row.get("result").unwrap_or_default()),
            error: row.get("error").unwrap_or_default().to_string(),
            subject: row.get("subject").unwrap_or_default().to_string(),
            message_id: row.get("message_id").unwrap_or_default().to_string(),
        })
    }
}

/// Per-company facts derived from the send history
#[derive(Debug, Default, Clone)]
pub struct HistoryIndex {
    successes: HashSet<u64>,
    overrides: HashMap<u64, String>,
    referenced: HashSet<u64>,
}

impl HistoryIndex {
    pub fn build(attempts: &[SendAttempt]) -> Self {
        let mut index = Self::default();
        for attempt in attempts {
            match attempt.result {
                SendResult::ResolverOverride => {
                    index
                        .overrides
                        .insert(attempt.company_id, attempt.address.clone());
                    // An override supersedes earlier successes until the next one
                    index.successes.remove(&attempt.company_id);
                }
                SendResult::Success => {
                    index.successes.insert(attempt.company_id);
                }
                _ => {}
            }
            if attempt.result.is_attempt() {
                index.referenced.insert(attempt.company_id);
            }
        }
        index
    }

    /// Whether the company has a success not superseded by an override
    pub fn has_success(&self, company_id: u64) -> bool {
        self.successes.contains(&company_id)
    }

    /// Latest operator override for the company's resolved address
    pub fn override_for(&self, company_id: u64) -> Option<&str> {
        self.overrides.get(&company_id).map(String::as_str)
    }

    /// Whether any pipeline attempt references the company id
    pub fn is_referenced(&self, company_id: u64) -> bool {
        self.referenced.contains(&company_id)
    }

    pub fn record_success(&mut self, company_id: u64) {
        self.successes.insert(company_id);
        self.referenced.insert(company_id);
    }
}
