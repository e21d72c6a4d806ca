//! Pipeline controller
//!
//! One run: acquire the process lock, then walk the requested id range in
//! ascending order. Per company:
//!
//! `start → (resolved | unresolved) → (suppressed | attempting) → (sent | failed)`
//!
//! Every terminal state is appended to the send history and mirrored into
//! the company row before the next company starts. Only fatal errors
//! (config, lock, ledger write) end the run early.

use crate::dashboard::DashboardNotifier;
use crate::dns::DomainCheck;
use crate::message::{EmailFormat, MessageBuilder, TemplateBundle};
use crate::retry::RetryPolicy;
use crate::transport::MailTransport;
use hj_common::address::{is_valid_address, resolve, Resolution};
use hj_common::config::AppConfig;
use hj_common::domain::email_domain;
use hj_common::ledger::unsubscribes::mirror_event;
use hj_common::ledger::{BounceLedger, HarvestStore, HistoryIndex, ProspectLedger, SendHistory, UnsubscribeLedger};
use hj_common::lock::ProcessLock;
use hj_common::oracle::{decide, Decision, SuppressionLedgers};
use hj_common::time::MonotonicClock;
use hj_common::{uuid_utils, Company, Error, ResolutionMethod, Result, SendAttempt, SendResult, UnsubscribeEvent};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Name written into the lock file
pub const LOCK_SCRIPT_NAME: &str = "hj-sender";

/// Caller-chosen run parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub start_id: u64,
    pub end_id: u64,
    pub max_emails: Option<usize>,
    pub format: EmailFormat,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            start_id: 1,
            end_id: 5,
            max_emails: None,
            format: EmailFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyOutcome {
    pub company_id: u64,
    pub address: String,
    pub result: SendResult,
}

/// What one run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub outcomes: Vec<CompanyOutcome>,
    /// Companies whose iteration failed before anything was recorded
    pub errors: usize,
    pub interrupted: bool,
    /// Stopped because `max_emails` was reached
    pub capped: bool,
}

impl RunSummary {
    pub fn count(&self, result: SendResult) -> usize {
        self.outcomes.iter().filter(|o| o.result == result).count()
    }

    pub fn sent(&self) -> usize {
        self.count(SendResult::Success)
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_skip()).count()
    }

    pub fn is_clean(&self) -> bool {
        !self.interrupted && self.errors == 0 && self.failed() == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed: {} sent, {} failed, {} skipped",
            self.outcomes.len(),
            self.sent(),
            self.failed(),
            self.skipped()
        )?;
        if self.errors > 0 {
            write!(f, ", {} errors", self.errors)?;
        }
        if self.capped {
            write!(f, " (max-emails reached)")?;
        }
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Terminal state of one company iteration
struct Step {
    result: SendResult,
    address: String,
    reached_smtp: bool,
}

pub struct Pipeline {
    config: AppConfig,
    templates: TemplateBundle,
    transport: Arc<dyn MailTransport>,
    retry: RetryPolicy,
    lock_timeout: Duration,
    domain_check: Option<Arc<dyn DomainCheck>>,
    dashboard: DashboardNotifier,
    cancel: CancellationToken,
    clock: MonotonicClock,
    prospects: ProspectLedger,
    unsubscribes: UnsubscribeLedger,
    bounces: BounceLedger,
    history: SendHistory,
}

impl Pipeline {
    pub fn new(config: AppConfig, templates: TemplateBundle, transport: Arc<dyn MailTransport>) -> Self {
        let paths = &config.paths;
        Self {
            prospects: ProspectLedger::new(&paths.prospects),
            unsubscribes: UnsubscribeLedger::new(&paths.unsubscribes),
            bounces: BounceLedger::new(&paths.bounces),
            history: SendHistory::new(&paths.send_history),
            retry: RetryPolicy::new(config.sending.retry_delays.clone()),
            lock_timeout: config.sending.lock_timeout,
            dashboard: DashboardNotifier::new(&config.dashboard),
            domain_check: None,
            cancel: CancellationToken::new(),
            clock: MonotonicClock::new(),
            templates,
            transport,
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_domain_check(mut self, check: Arc<dyn DomainCheck>) -> Self {
        self.domain_check = Some(check);
        self
    }

    pub fn with_dashboard(mut self, dashboard: DashboardNotifier) -> Self {
        self.dashboard = dashboard;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one run under the process lock
    pub async fn run(&self, request: &RunRequest) -> Result<RunSummary> {
        let mut lock = self.acquire_lock().await?;
        let result = self.run_locked(request).await;
        lock.release();
        result
    }

    async fn acquire_lock(&self) -> Result<ProcessLock> {
        let path = self.config.paths.lock_file.clone();
        let timeout = self.lock_timeout;
        tokio::task::spawn_blocking(move || {
            let mut lock = ProcessLock::new(path, LOCK_SCRIPT_NAME);
            lock.acquire_or_timeout(timeout)?;
            Ok(lock)
        })
        .await
        .map_err(|e| Error::LockTimeout(format!("lock acquisition task failed: {}", e)))?
    }

    async fn run_locked(&self, request: &RunRequest) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        if request.start_id > request.end_id {
            info!(
                start_id = request.start_id,
                end_id = request.end_id,
                "Empty id range; nothing to do"
            );
            return Ok(summary);
        }

        let companies = self.prospects.load_range(request.start_id, request.end_id)?;
        let harvest = HarvestStore::load(
            &self.config.paths.harvest,
            self.config.resolver.harvest_min_confidence,
        )?;
        let mut index = HistoryIndex::build(&self.history.load()?);
        let builder = MessageBuilder::new(&self.config, self.templates.clone(), request.format);
        let mut accepted: HashSet<String> = HashSet::new();
        let mut smtp_attempts = 0usize;

        info!(
            start_id = request.start_id,
            end_id = request.end_id,
            companies = companies.len(),
            format = ?request.format,
            "Run started"
        );

        for (position, company) in companies.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(company_id = company.id, "Interrupted before iteration");
                summary.interrupted = true;
                break;
            }
            if request.max_emails.map_or(false, |max| smtp_attempts >= max) {
                info!(max_emails = ?request.max_emails, "Send cap reached");
                summary.capped = true;
                break;
            }

            let step = match self
                .process_company(company, &harvest, &mut index, &builder, &mut accepted)
                .await
            {
                Ok(step) => step,
                Err(e) if e.is_fatal() => {
                    error!(company_id = company.id, error = %e, "Aborting run");
                    return Err(e);
                }
                Err(e) => {
                    error!(company_id = company.id, error = %e, "Iteration failed");
                    summary.errors += 1;
                    continue;
                }
            };

            summary.outcomes.push(CompanyOutcome {
                company_id: company.id,
                address: step.address,
                result: step.result,
            });
            if step.result == SendResult::FailedInterrupted {
                summary.interrupted = true;
                break;
            }
            if step.reached_smtp {
                smtp_attempts += 1;
                let more = position + 1 < companies.len()
                    && request.max_emails.map_or(true, |max| smtp_attempts < max);
                if more {
                    self.pause().await;
                }
            }
        }

        info!(summary = %summary, "Run finished");
        Ok(summary)
    }

    /// Inter-send pacing; returns early on cancellation
    async fn pause(&self) {
        let interval = self.config.sending.interval;
        if interval.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    async fn process_company(
        &self,
        company: &Company,
        harvest: &HarvestStore,
        index: &mut HistoryIndex,
        builder: &MessageBuilder,
        accepted: &mut HashSet<String>,
    ) -> Result<Step> {
        let resolution = self.pick_address(company, harvest, index);
        let subject = builder.subject(company);

        let Some(address) = resolution.address.clone() else {
            info!(company_id = company.id, "No deliverable address");
            return self.record_skip(
                company,
                &resolution,
                SendResult::FailedUnresolved,
                "no valid roster, harvested or domain-derived address",
                &subject,
                None,
            );
        };
        let address_key = address.to_ascii_lowercase();

        if accepted.contains(&address_key) {
            info!(company_id = company.id, address = %address, "Address already sent in this run");
            return self.record_skip(
                company,
                &resolution,
                SendResult::SkippedDuplicate,
                "address already accepted earlier in this run",
                &subject,
                None,
            );
        }

        let ledgers = SuppressionLedgers {
            unsubscribes: self.unsubscribes.load()?,
            bounces: self.bounces.load()?,
        };
        match decide(company, &address, &ledgers) {
            Decision::Send => {}
            decision @ Decision::SkipUnsubscribed { .. } => {
                info!(company_id = company.id, reason = decision.reason(), "Suppressed: unsubscribed");
                return self.record_skip(
                    company,
                    &resolution,
                    SendResult::SkippedUnsubscribed,
                    decision.reason(),
                    &subject,
                    decision.unsubscribe_event(&ledgers),
                );
            }
            decision @ Decision::SkipBounced { .. } => {
                info!(company_id = company.id, reason = decision.reason(), "Suppressed: bounced");
                return self.record_skip(
                    company,
                    &resolution,
                    SendResult::SkippedBounced,
                    decision.reason(),
                    &subject,
                    None,
                );
            }
        }

        if let (Some(check), Some(domain)) = (&self.domain_check, email_domain(&address)) {
            if !check.accepts_mail(&domain).await {
                return self.record_skip(
                    company,
                    &resolution,
                    SendResult::SkippedDns,
                    &format!("no MX or address records for {}", domain),
                    &subject,
                    None,
                );
            }
        }

        let tracking_id = uuid_utils::generate();
        let message = builder.build(company, &address, tracking_id);
        let attempted_at = self.clock.now();
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.retry.run("smtp send", || self.transport.send(&message)) => Some(result),
        };

        let (result, error) = match outcome {
            Some(Ok(())) => (SendResult::Success, String::new()),
            Some(Err(e)) => (SendResult::Failed, e.to_string()),
            None => (
                SendResult::FailedInterrupted,
                "interrupted during SMTP transaction".to_string(),
            ),
        };
        let attempt = SendAttempt {
            attempted_at,
            company_id: company.id,
            address: address.clone(),
            tracking_id,
            result,
            error,
            subject: message.subject.clone(),
            message_id: message.message_id.clone(),
        };
        self.record(company, &resolution, &attempt, None)?;

        match result {
            SendResult::Success => {
                info!(company_id = company.id, address = %address, tracking_id = %tracking_id, "Sent");
                accepted.insert(address_key);
                index.record_success(company.id);
                self.dashboard.cache_clear().await;
            }
            _ => warn!(
                company_id = company.id,
                address = %address,
                result = %result,
                error = %attempt.error,
                "Send did not succeed"
            ),
        }

        Ok(Step {
            result,
            address,
            reached_smtp: true,
        })
    }

    /// Address for this run.
    ///
    /// A pending resolver override wins; after a success the row's resolved
    /// address is pinned; otherwise the resolver decides afresh.
    fn pick_address(&self, company: &Company, harvest: &HarvestStore, index: &HistoryIndex) -> Resolution {
        if !index.has_success(company.id) {
            if let Some(address) = index.override_for(company.id) {
                if is_valid_address(address.trim()) {
                    return Resolution {
                        address: Some(address.trim().to_string()),
                        method: match company.resolution_method {
                            ResolutionMethod::Unresolved => ResolutionMethod::Roster,
                            method => method,
                        },
                    };
                }
                warn!(company_id = company.id, address, "Ignoring invalid resolver override");
            }
        } else if let Some(pinned) = company
            .resolved_email
            .as_deref()
            .map(str::trim)
            .filter(|a| is_valid_address(a))
        {
            return Resolution {
                address: Some(pinned.to_string()),
                method: company.resolution_method,
            };
        }
        resolve(company, harvest)
    }

    fn record_skip(
        &self,
        company: &Company,
        resolution: &Resolution,
        result: SendResult,
        reason: &str,
        subject: &str,
        mirror: Option<&UnsubscribeEvent>,
    ) -> Result<Step> {
        let address = resolution.address.clone().unwrap_or_default();
        let attempt = SendAttempt {
            attempted_at: self.clock.now(),
            company_id: company.id,
            address: address.clone(),
            tracking_id: Uuid::nil(),
            result,
            error: reason.to_string(),
            subject: subject.to_string(),
            message_id: String::new(),
        };
        self.record(company, resolution, &attempt, mirror)?;
        Ok(Step {
            result,
            address,
            reached_smtp: false,
        })
    }

    /// Append the attempt, then reflect it into the company row
    fn record(
        &self,
        company: &Company,
        resolution: &Resolution,
        attempt: &SendAttempt,
        mirror: Option<&UnsubscribeEvent>,
    ) -> Result<()> {
        self.history.append(attempt)?;
        let path = self.prospects.path().to_path_buf();
        self.prospects
            .update_company(company.id, |row| {
                row.resolved_email = resolution.address.clone();
                row.resolution_method = resolution.method;
                row.last_send_time = Some(attempt.attempted_at);
                row.last_send_result = Some(attempt.result);
                if let Some(event) = mirror {
                    if mirror_event(row, event) {
                        info!(company_id = row.id, email = %event.email, "Mirrored unsubscribe onto company row");
                    }
                }
            })
            .map_err(|e| match e {
                Error::LedgerWrite(_) => e,
                other => Error::ledger_write(&path, other),
            })?;
        Ok(())
    }
}
