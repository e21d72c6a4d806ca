//! Unsubscribe intake and mirror maintenance
//!
//! The Unsubscribe Ledger is authoritative. Every intake path appends the
//! event first and only then mirrors it onto the matched Prospect Ledger row.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use hj_common::address::validate_address;
use hj_common::config::LedgerPaths;
use hj_common::ledger::unsubscribes::{mirror_event, replay_mirror};
use hj_common::ledger::{read_table, match_company, MatchOutcome, ProspectLedger, UnsubscribeLedger};
use hj_common::time::{now, parse_timestamp};
use hj_common::{Company, Error, Result, UnsubscribeEvent, UnsubscribeSource};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Timestamp layouts produced by spreadsheet exports
const SHEET_FORMATS: &[&str] = &["%Y/%m/%d %H:%M:%S", "%Y/%m/%d %H:%M", "%m/%d/%Y %H:%M:%S"];

const TIMESTAMP_COLUMNS: &[&str] = &["timestamp", "submitted_at", "タイムスタンプ"];
const EMAIL_COLUMNS: &[&str] = &["email", "email_address", "メールアドレス"];
const REASON_COLUMNS: &[&str] = &["reason", "理由"];

#[derive(Debug, Clone, PartialEq)]
pub struct AddOutcome {
    pub event: UnsubscribeEvent,
    pub matched: MatchOutcome,
    /// Whether the matched row changed (false if it was already unsubscribed)
    pub mirrored: bool,
}

/// Record one opt-out request
pub fn add(
    paths: &LedgerPaths,
    email: &str,
    reason: &str,
    source: UnsubscribeSource,
) -> Result<AddOutcome> {
    let email = normalize_email(email)?;
    let prospects = ProspectLedger::new(&paths.prospects);
    let matched = match_company(&email, &prospects.load()?);

    let event = UnsubscribeEvent {
        submitted_at: now(),
        email,
        reason: reason.trim().to_string(),
        source,
        matched_company_id: matched.company_id(),
    };
    UnsubscribeLedger::new(&paths.unsubscribes).append(&event)?;
    info!(email = %event.email, source = %event.source, matched = ?matched, "Unsubscribe recorded");

    let mirrored = mirror_matched(&prospects, std::slice::from_ref(&event))? > 0;
    Ok(AddOutcome {
        event,
        matched,
        mirrored,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub rows: usize,
    pub appended: usize,
    pub already_present: usize,
    pub invalid: usize,
    pub ambiguous: usize,
    pub unmatched: usize,
    pub mirrored: usize,
}

/// Import a spreadsheet export (timestamp, e-mail, optional reason).
///
/// Rows already in the ledger (same e-mail, same timestamp) are skipped, so
/// re-importing the whole sheet is safe.
pub fn import(paths: &LedgerPaths, file: &Path, source: UnsubscribeSource) -> Result<ImportReport> {
    let table = read_table(file)?;
    if !table.is_empty() && !EMAIL_COLUMNS.iter().any(|c| table.has_column(c)) {
        return Err(Error::InvalidInput(format!(
            "{}: no e-mail column (expected one of {})",
            file.display(),
            EMAIL_COLUMNS.join(", ")
        )));
    }

    let ledger = UnsubscribeLedger::new(&paths.unsubscribes);
    let mut seen: HashSet<(String, i64)> = ledger.load()?.iter().map(dedupe_key).collect();
    let prospects = ProspectLedger::new(&paths.prospects);
    let companies = prospects.load()?;

    let mut report = ImportReport::default();
    let mut fresh = Vec::new();
    for row in table.rows() {
        report.rows += 1;
        let email = match row.non_empty(EMAIL_COLUMNS).map(normalize_email) {
            Some(Ok(email)) => email,
            Some(Err(e)) => {
                warn!(line = row.line, error = %e, "Skipping row with invalid address");
                report.invalid += 1;
                continue;
            }
            None => {
                report.invalid += 1;
                continue;
            }
        };
        let Some(submitted_at) = row.non_empty(TIMESTAMP_COLUMNS).and_then(parse_sheet_timestamp) else {
            warn!(line = row.line, email = %email, "Skipping row without a readable timestamp");
            report.invalid += 1;
            continue;
        };

        let mut event = UnsubscribeEvent {
            submitted_at,
            email,
            reason: row.non_empty(REASON_COLUMNS).unwrap_or_default().trim().to_string(),
            source,
            matched_company_id: None,
        };
        if !seen.insert(dedupe_key(&event)) {
            report.already_present += 1;
            continue;
        }
        match match_company(&event.email, &companies) {
            MatchOutcome::Ambiguous(ids) => {
                warn!(email = %event.email, candidates = ?ids, "Ambiguous unsubscribe");
                report.ambiguous += 1;
            }
            MatchOutcome::Unmatched => report.unmatched += 1,
            matched => event.matched_company_id = matched.company_id(),
        }
        fresh.push(event);
    }

    ledger.append_all(&fresh)?;
    report.appended = fresh.len();
    report.mirrored = mirror_matched(&prospects, &fresh)?;
    info!(file = %file.display(), appended = report.appended, skipped = report.already_present, "Unsubscribe import finished");
    Ok(report)
}

/// Replay the whole ledger onto the mirrored columns; returns changed ids
pub fn sync(paths: &LedgerPaths) -> Result<Vec<u64>> {
    let events = UnsubscribeLedger::new(&paths.unsubscribes).load()?;
    let changed = ProspectLedger::new(&paths.prospects).update(|companies| {
        let changed = replay_mirror(companies, &events);
        let dirty = !changed.is_empty();
        (changed, dirty)
    })?;
    info!(events = events.len(), changed = changed.len(), "Unsubscribe mirror replayed");
    Ok(changed)
}

/// An event without a matched company, with what it matches today
#[derive(Debug, Clone, PartialEq)]
pub struct Unresolved {
    pub event: UnsubscribeEvent,
    pub current: MatchOutcome,
}

/// Events stored with `matched_company_id = null`
pub fn ambiguous(paths: &LedgerPaths) -> Result<Vec<Unresolved>> {
    let companies = ProspectLedger::new(&paths.prospects).load()?;
    Ok(UnsubscribeLedger::new(&paths.unsubscribes)
        .load()?
        .into_iter()
        .filter(|e| e.matched_company_id.is_none())
        .map(|event| Unresolved {
            current: match_company(&event.email, &companies),
            event,
        })
        .collect())
}

fn mirror_matched(prospects: &ProspectLedger, events: &[UnsubscribeEvent]) -> Result<usize> {
    if events.iter().all(|e| e.matched_company_id.is_none()) {
        return Ok(0);
    }
    prospects.update(|companies: &mut Vec<Company>| {
        let mut changed = 0;
        for event in events {
            let Some(id) = event.matched_company_id else { continue };
            if let Some(company) = companies.iter_mut().find(|c| c.id == id) {
                if mirror_event(company, event) {
                    changed += 1;
                }
            }
        }
        (changed, changed > 0)
    })
}

fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_ascii_lowercase();
    validate_address(&email)
        .map_err(|reason| Error::InvalidInput(format!("invalid address {:?}: {:?}", raw, reason)))?;
    Ok(email)
}

fn dedupe_key(event: &UnsubscribeEvent) -> (String, i64) {
    (event.email.to_ascii_lowercase(), event.submitted_at.timestamp())
}

fn parse_sheet_timestamp(raw: &str) -> Option<DateTime<Local>> {
    parse_timestamp(raw).or_else(|| {
        SHEET_FORMATS.iter().find_map(|fmt| {
            let naive = NaiveDateTime::parse_from_str(raw.trim(), fmt).ok()?;
            Local.from_local_datetime(&naive).earliest()
        })
    })
}
