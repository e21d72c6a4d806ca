//! One ingest pass over the mailbox
//!
//! For each candidate UID not yet processed: fetch, decode, extract failed
//! recipients, classify, append to the Bounce Ledger, mark permanently
//! bounced companies, archive, and remember the UID. A message that cannot
//! be decoded is logged and left in place for the next pass.

use crate::mailbox::{search_query, ArchiveMethod, Mailbox};
use crate::parse::parse_report;
use chrono::{Duration as ChronoDuration, NaiveDate};
use hj_common::bounce_class::classify;
use hj_common::config::AppConfig;
use hj_common::domain::same_address;
use hj_common::ledger::bounces::recorded_uids;
use hj_common::ledger::{BounceLedger, ProcessedTracking, ProspectLedger};
use hj_common::time::{now, MonotonicClock};
use hj_common::{BounceClass, BounceEvent, Company, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    /// Search window in days
    pub days: u32,
    /// Classify only: no archive, no ledger or tracking writes
    pub test_mode: bool,
    /// Process UIDs even if already tracked
    pub force_reprocess: bool,
    /// Forget tracked UIDs before the pass
    pub reset_tracking: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            days: 7,
            test_mode: false,
            force_reprocess: false,
            reset_tracking: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub candidates: usize,
    pub already_processed: usize,
    pub processed: usize,
    pub events_recorded: usize,
    pub permanent: usize,
    pub temporary: usize,
    pub unknown: usize,
    pub companies_marked: usize,
    pub left_in_place: usize,
    pub archived: usize,
    pub flagged: usize,
}

impl std::fmt::Display for IngestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} candidates, {} processed ({} permanent, {} temporary, {} unknown), {} new events, {} companies marked, {} left in place",
            self.candidates,
            self.processed,
            self.permanent,
            self.temporary,
            self.unknown,
            self.events_recorded,
            self.companies_marked,
            self.left_in_place
        )
    }
}

pub struct BounceIngestor {
    own_addresses: Vec<String>,
    bounce_folder: String,
    tracking_path: PathBuf,
    bounces: BounceLedger,
    prospects: ProspectLedger,
    clock: MonotonicClock,
}

impl BounceIngestor {
    pub fn new(config: &AppConfig) -> Self {
        let mut own_addresses = vec![config.smtp.from_email.to_ascii_lowercase()];
        for extra in [&config.smtp.user, &config.imap.user, &config.smtp.reply_to] {
            let lowered = extra.to_ascii_lowercase();
            if lowered.contains('@') && !own_addresses.contains(&lowered) {
                own_addresses.push(lowered);
            }
        }
        Self {
            own_addresses,
            bounce_folder: config.imap.bounce_folder.clone(),
            tracking_path: config.paths.processed_tracking.clone(),
            bounces: BounceLedger::new(&config.paths.bounces),
            prospects: ProspectLedger::new(&config.paths.prospects),
            clock: MonotonicClock::new(),
        }
    }

    /// Run one pass. Mailbox errors abort the pass; the next pass retries.
    pub fn ingest(&self, mailbox: &mut dyn Mailbox, options: &IngestOptions) -> Result<IngestReport> {
        let mut tracking = ProcessedTracking::load(&self.tracking_path)?;
        if options.reset_tracking {
            info!(forgotten = tracking.len(), "Resetting processed-UID tracking");
            tracking.reset();
        }
        let mut recorded = recorded_uids(&self.bounces.load()?);

        let since = since_date(options.days);
        let uids = mailbox.search(&search_query(since))?;
        let mut report = IngestReport {
            candidates: uids.len(),
            ..Default::default()
        };
        info!(candidates = uids.len(), since = %since, test_mode = options.test_mode, "Bounce search complete");

        for uid in uids {
            let key = uid.to_string();
            if !options.force_reprocess && (tracking.contains(&key) || recorded.contains(&key)) {
                debug!(uid, "Already processed");
                // Ledger is authoritative when the tracking file was lost or reset
                tracking.insert(&key);
                report.already_processed += 1;
                continue;
            }

            let raw = mailbox.fetch(uid)?;
            let parsed = match parse_report(&raw, &self.own_addresses) {
                Ok(parsed) if !parsed.failed_recipients.is_empty() => parsed,
                Ok(parsed) => {
                    warn!(uid, subject = %parsed.subject, "No failed recipient found; leaving message in place");
                    report.left_in_place += 1;
                    continue;
                }
                Err(e) => {
                    warn!(uid, error = %e, "Unparseable bounce; leaving message in place");
                    report.left_in_place += 1;
                    continue;
                }
            };

            let classification = classify(&parsed.subject, &parsed.diagnostic_text());
            report.processed += 1;
            match classification.class {
                BounceClass::Permanent => report.permanent += 1,
                BounceClass::Temporary => report.temporary += 1,
                _ => report.unknown += 1,
            }
            info!(
                uid,
                class = %classification.class,
                reason = %classification.reason,
                recipients = ?parsed.failed_recipients,
                "Bounce classified"
            );

            if options.test_mode {
                continue;
            }

            let events: Vec<BounceEvent> = parsed
                .failed_recipients
                .iter()
                .map(|recipient| BounceEvent {
                    observed_at: self.clock.now(),
                    message_uid: key.clone(),
                    recipient: recipient.clone(),
                    class: classification.class,
                    reason: classification.reason.clone(),
                    raw_subject: parsed.subject.clone(),
                })
                .collect();

            if !recorded.contains(&key) {
                self.bounces.append_all(&events)?;
                report.events_recorded += events.len();
                recorded.insert(key.clone());
            }

            if classification.class == BounceClass::Permanent {
                report.companies_marked += self.mark_permanent(&events)?;
            }

            match mailbox.archive(uid, &self.bounce_folder) {
                Ok(ArchiveMethod::Flagged) => report.flagged += 1,
                Ok(_) => report.archived += 1,
                Err(e) => warn!(uid, error = %e, "Could not archive bounce"),
            }

            tracking.insert(&key);
        }

        if !options.test_mode {
            tracking.save()?;
        }
        info!(report = %report, "Bounce pass finished");
        Ok(report)
    }

    /// Set `bounce_class = permanent` on every row whose roster or resolved
    /// address bounced. The first sighting keeps its timestamp.
    fn mark_permanent(&self, events: &[BounceEvent]) -> Result<usize> {
        self.prospects.update(|companies| {
            let mut marked: HashSet<u64> = HashSet::new();
            for event in events {
                for company in companies.iter_mut().filter(|c| owns_address(c, &event.recipient)) {
                    if company.bounce_class != BounceClass::Permanent {
                        company.bounce_class = BounceClass::Permanent;
                        company.bounce_first_seen = Some(event.observed_at);
                        company.bounce_reason = Some(format!("{} ({})", event.reason, event.recipient));
                        info!(company_id = company.id, recipient = %event.recipient, "Company marked as permanently bounced");
                        marked.insert(company.id);
                    }
                }
            }
            let changed = !marked.is_empty();
            (marked.len(), changed)
        })
    }
}

fn owns_address(company: &Company, address: &str) -> bool {
    [&company.resolved_email, &company.roster_email]
        .into_iter()
        .flatten()
        .any(|a| same_address(a, address))
}

fn since_date(days: u32) -> NaiveDate {
    now().date_naive() - ChronoDuration::days(i64::from(days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owns_address_matches_roster_or_resolved() {
        let mut company = Company::new(1, "Acme");
        company.roster_email = Some("Info@Acme.example".into());
        assert!(owns_address(&company, "info@acme.example"));
        company.roster_email = None;
        company.resolved_email = Some("x@acme.example".into());
        assert!(owns_address(&company, "X@ACME.example"));
        assert!(!owns_address(&company, "info@acme.example"));
    }

    #[test]
    fn test_since_date_window() {
        assert_eq!(since_date(0), now().date_naive());
        assert_eq!(since_date(7), now().date_naive() - ChronoDuration::days(7));
    }
}
