//! End-to-end controller runs against temp ledgers and an in-memory transport

mod common;

use async_trait::async_trait;
use common::{acme, request, Fixture, HangingTransport, MockTransport};
use hj_common::lock::ProcessLock;
use hj_common::time::now;
use hj_common::{
    BounceClass, BounceEvent, Company, Error, ResolutionMethod, SendAttempt, SendResult,
    UnsubscribeState,
};
use hj_sender::dns::DomainCheck;
use hj_sender::RunRequest;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_happy_path_sends_and_records() {
    let fx = Fixture::new();
    fx.seed(&[acme()]);
    let transport = MockTransport::new();

    let summary = fx.pipeline(transport.clone()).run(&request(10, 10)).await.unwrap();
    assert_eq!(summary.sent(), 1);
    assert_eq!(summary.exit_code(), 0);

    let history = fx.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result, SendResult::Success);
    assert_eq!(history[0].address, "info@acme.example");
    assert!(history[0].subject.contains("営業"));
    assert!(!history[0].tracking_id.is_nil());

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "info@acme.example");
    assert_eq!(sent[0].tracking_id, history[0].tracking_id);
    assert_eq!(sent[0].message_id, history[0].message_id);

    let row = fx.company(10);
    assert_eq!(row.resolved_email.as_deref(), Some("info@acme.example"));
    assert_eq!(row.resolution_method, ResolutionMethod::Roster);
    assert_eq!(row.last_send_result, Some(SendResult::Success));
    assert_eq!(row.last_send_time, Some(history[0].attempted_at));
}

#[tokio::test]
async fn test_exact_unsubscribe_skips_without_smtp() {
    let fx = Fixture::new();
    fx.seed(&[acme()]);
    fx.unsubscribe("info@acme.example", "form");
    let transport = MockTransport::new();

    let summary = fx.pipeline(transport.clone()).run(&request(10, 10)).await.unwrap();
    assert_eq!(summary.skipped(), 1);
    assert_eq!(transport.calls(), 0);

    let history = fx.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result, SendResult::SkippedUnsubscribed);
    assert!(history[0].error.contains("info@acme.example"));

    // The matching ledger event is mirrored onto the row
    let row = fx.company(10);
    assert_eq!(row.unsubscribe_state, UnsubscribeState::Unsubscribed);
    assert!(row.unsubscribe_reason.unwrap().contains("form"));
    assert_eq!(row.last_send_result, Some(SendResult::SkippedUnsubscribed));
}

#[tokio::test]
async fn test_domain_unsubscribe_reports_origin() {
    let fx = Fixture::new();
    let mut media = Company::new(11, "Media4U");
    media.website = Some("https://www.media4u.co.jp/".into());
    media.resolved_email = Some("info@media4u.co.jp".into());
    media.job_position = "ディレクター".into();
    fx.seed(&[media]);
    fx.unsubscribe("t-hayakawa@media4u.co.jp", "no thanks");
    let transport = MockTransport::new();

    fx.pipeline(transport.clone()).run(&request(11, 11)).await.unwrap();
    assert_eq!(transport.calls(), 0);

    let history = fx.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result, SendResult::SkippedUnsubscribed);
    assert_eq!(history[0].address, "info@media4u.co.jp");
    assert!(history[0].error.contains("domain match"));
    assert!(history[0].error.contains("t-hayakawa@media4u.co.jp"));
}

#[tokio::test]
async fn test_permanent_bounce_event_suppresses() {
    let fx = Fixture::new();
    let mut dead = Company::new(12, "Dead Co");
    dead.roster_email = Some("x@dead.example".into());
    fx.seed(&[dead]);
    fx.bounces()
        .append(&BounceEvent {
            observed_at: now(),
            message_uid: "7".into(),
            recipient: "x@dead.example".into(),
            class: BounceClass::Permanent,
            reason: "550 5.1.1 user unknown".into(),
            raw_subject: "Undelivered Mail Returned to Sender".into(),
        })
        .unwrap();
    let transport = MockTransport::new();

    fx.pipeline(transport.clone()).run(&request(12, 12)).await.unwrap();
    assert_eq!(transport.calls(), 0);
    assert_eq!(fx.history()[0].result, SendResult::SkippedBounced);
}

#[tokio::test]
async fn test_lock_contention_aborts_without_writes() {
    let fx = Fixture::new();
    fx.seed(&[acme()]);

    let mut other = ProcessLock::new(&fx.config.paths.lock_file, "hj-sender");
    assert!(other.acquire(Duration::ZERO).unwrap());

    let transport = MockTransport::new();
    let err = fx.pipeline(transport.clone()).run(&request(10, 10)).await.unwrap_err();
    assert!(matches!(err, Error::LockTimeout(_)));
    assert!(err.is_fatal());
    assert_eq!(transport.calls(), 0);
    assert!(fx.history().is_empty());

    other.release();
    fx.pipeline(transport.clone()).run(&request(10, 10)).await.unwrap();
    assert_eq!(fx.history().len(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_one_proceeds() {
    let fx = Fixture::new();
    fx.seed(&[acme()]);

    let gate = Arc::new(tokio::sync::Notify::new());
    let entered = Arc::new(tokio::sync::Notify::new());
    let slow = Arc::new(GatedTransport {
        gate: gate.clone(),
        entered: entered.clone(),
    });
    let first = Arc::new(fx.pipeline(slow));
    let handle = {
        let first = first.clone();
        tokio::spawn(async move { first.run(&request(10, 10)).await })
    };
    entered.notified().await;

    let second = fx.pipeline(MockTransport::new()).run(&request(10, 10)).await;
    assert!(matches!(second, Err(Error::LockTimeout(_))));

    gate.notify_one();
    let summary = handle.await.unwrap().unwrap();
    assert_eq!(summary.sent(), 1);
    assert_eq!(fx.history().len(), 1);
}

struct GatedTransport {
    gate: Arc<tokio::sync::Notify>,
    entered: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl hj_sender::MailTransport for GatedTransport {
    async fn send(&self, _message: &hj_sender::OutgoingMessage) -> hj_common::Result<()> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_empty_range_is_clean_noop() {
    let fx = Fixture::new();
    fx.seed(&[acme()]);
    let transport = MockTransport::new();

    let summary = fx.pipeline(transport.clone()).run(&request(20, 10)).await.unwrap();
    assert!(summary.outcomes.is_empty());
    assert_eq!(summary.exit_code(), 0);
    assert!(fx.history().is_empty());
}

#[tokio::test]
async fn test_unresolved_is_recorded_as_failure() {
    let fx = Fixture::new();
    let mut bare = Company::new(3, "No Contact Ltd");
    bare.roster_email = Some("‐".into());
    bare.website = Some(String::new());
    fx.seed(&[bare]);

    let summary = fx.pipeline(MockTransport::new()).run(&request(1, 5)).await.unwrap();
    assert_eq!(summary.exit_code(), 1);
    let history = fx.history();
    assert_eq!(history[0].result, SendResult::FailedUnresolved);
    assert_eq!(history[0].address, "");
    assert_eq!(fx.company(3).resolution_method, ResolutionMethod::Unresolved);
}

#[tokio::test]
async fn test_ascending_order_and_duplicate_address() {
    let fx = Fixture::new();
    let mut a = Company::new(2, "Branch B");
    a.roster_email = Some("jobs@group.example".into());
    let mut b = Company::new(1, "Branch A");
    b.roster_email = Some("JOBS@group.example".into());
    fx.seed(&[a, b]);
    let transport = MockTransport::new();

    fx.pipeline(transport.clone()).run(&request(1, 2)).await.unwrap();
    let history = fx.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].company_id, 1);
    assert_eq!(history[0].result, SendResult::Success);
    assert_eq!(history[1].company_id, 2);
    assert_eq!(history[1].result, SendResult::SkippedDuplicate);
    assert!(history[0].attempted_at < history[1].attempted_at);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_smtp_outcomes_and_retries() {
    let fx = Fixture::new();
    let mut refused = acme();
    refused.id = 1;
    refused.roster_email = Some("gone@acme.example".into());
    let mut flaky = acme();
    flaky.id = 2;
    flaky.roster_email = Some("busy@acme.example".into());
    fx.seed(&[refused, flaky]);

    let transport = MockTransport::scripted(vec![
        Err(Error::PermanentSmtp("550 5.1.1 recipient rejected".into())),
        Err(Error::TransientSmtp("421 try again later".into())),
        Ok(()),
    ]);
    let summary = fx.pipeline(transport.clone()).run(&request(1, 2)).await.unwrap();

    // Permanent refusal: one call; transient: retried once then accepted
    assert_eq!(transport.calls(), 3);
    let history = fx.history();
    assert_eq!(history[0].result, SendResult::Failed);
    assert!(history[0].error.contains("550"));
    assert_eq!(history[1].result, SendResult::Success);
    assert_eq!(summary.exit_code(), 1);
}

#[tokio::test]
async fn test_max_emails_caps_smtp_attempts() {
    let fx = Fixture::new();
    let companies: Vec<Company> = (1..=3)
        .map(|id| {
            let mut c = Company::new(id, format!("Company {}", id));
            c.roster_email = Some(format!("info@c{}.example", id));
            c
        })
        .collect();
    fx.seed(&companies);
    let transport = MockTransport::new();

    let summary = fx
        .pipeline(transport.clone())
        .run(&RunRequest {
            max_emails: Some(2),
            ..request(1, 3)
        })
        .await
        .unwrap();
    assert!(summary.capped);
    assert_eq!(transport.calls(), 2);
    assert_eq!(fx.history().len(), 2);
}

#[tokio::test]
async fn test_success_pins_address_until_override() {
    let fx = Fixture::new();
    fx.seed(&[acme()]);
    let transport = MockTransport::new();
    fx.pipeline(transport.clone()).run(&request(10, 10)).await.unwrap();

    // Roster changes after the first success: the pinned address still wins
    fx.prospects()
        .update_company(10, |c| c.roster_email = Some("recruit@acme.example".into()))
        .unwrap();
    fx.pipeline(transport.clone()).run(&request(10, 10)).await.unwrap();
    assert_eq!(transport.sent()[1].to, "info@acme.example");

    // An operator override re-pins the address
    hj_common::ledger::SendHistory::new(&fx.config.paths.send_history)
        .append(&SendAttempt {
            attempted_at: now(),
            company_id: 10,
            address: "saiyo@acme.example".into(),
            tracking_id: Uuid::nil(),
            result: SendResult::ResolverOverride,
            error: String::new(),
            subject: String::new(),
            message_id: String::new(),
        })
        .unwrap();
    fx.pipeline(transport.clone()).run(&request(10, 10)).await.unwrap();
    assert_eq!(transport.sent()[2].to, "saiyo@acme.example");
    assert_eq!(fx.company(10).resolved_email.as_deref(), Some("saiyo@acme.example"));
}

#[tokio::test]
async fn test_interrupt_mid_transaction_records_attempt() {
    let fx = Fixture::new();
    let mut second = acme();
    second.id = 11;
    second.roster_email = Some("info@second.example".into());
    fx.seed(&[acme(), second]);

    let pipeline = fx.pipeline(Arc::new(HangingTransport));
    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let summary = pipeline.run(&request(10, 11)).await.unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.exit_code(), 1);

    let history = fx.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result, SendResult::FailedInterrupted);

    // The lock is released for the next run
    let mut lock = ProcessLock::new(&fx.config.paths.lock_file, "test");
    assert!(lock.acquire(Duration::ZERO).unwrap());
}

struct NoMailDomains;

#[async_trait]
impl DomainCheck for NoMailDomains {
    async fn accepts_mail(&self, domain: &str) -> bool {
        domain != "acme.example"
    }
}

#[tokio::test]
async fn test_dns_precheck_skips_dead_domain() {
    let fx = Fixture::new();
    fx.seed(&[acme()]);
    let transport = MockTransport::new();

    fx.pipeline(transport.clone())
        .with_domain_check(Arc::new(NoMailDomains))
        .run(&request(10, 10))
        .await
        .unwrap();
    assert_eq!(transport.calls(), 0);
    assert_eq!(fx.history()[0].result, SendResult::SkippedDns);
}

#[tokio::test]
async fn test_harvested_address_used_when_roster_absent() {
    let fx = Fixture::new();
    let mut company = acme();
    company.roster_email = Some("-".into());
    fx.seed(&[company]);
    std::fs::write(
        &fx.config.paths.harvest,
        "company_id,email,confidence\n10,low@acme.example,0.3\n10,saiyo@acme.example,0.9\n",
    )
    .unwrap();
    let transport = MockTransport::new();

    fx.pipeline(transport.clone()).run(&request(10, 10)).await.unwrap();
    assert_eq!(transport.sent()[0].to, "saiyo@acme.example");
    assert_eq!(fx.company(10).resolution_method, ResolutionMethod::Harvested);
}
