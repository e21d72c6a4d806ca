//! Shared fixtures for hj-sender integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hj_common::config::AppConfig;
use hj_common::ledger::{BounceLedger, ProspectLedger, SendHistory, UnsubscribeLedger};
use hj_common::time::now;
use hj_common::{Company, Result, SendAttempt, UnsubscribeEvent, UnsubscribeSource};
use hj_sender::{EmailFormat, MailTransport, OutgoingMessage, Pipeline, RunRequest, TemplateBundle};
use std::collections::VecDeque;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const INI: &str = "[SMTP]
server = smtp.huganjob.example
port = 587
user = contact@huganjob.example
password = secret
sender_name = HUGANJOB
from_email = contact@huganjob.example

[EMAIL_CONTENT]
template_file = templates/outreach.html
text_template_file = templates/outreach.txt
subject = 【{primary_job}】採用支援のご案内 | {tagline}

[SENDING]
interval = 0
lock_timeout = 0
retry_delays = 0,0,0

[DASHBOARD]
enabled = false
";

/// Data root with config, templates and empty ledgers
pub struct Fixture {
    pub dir: TempDir,
    pub config: AppConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("config")).unwrap();
        fs::create_dir_all(root.join("templates")).unwrap();
        fs::write(root.join("config/huganjob_email_config.ini"), INI).unwrap();
        fs::write(
            root.join("templates/outreach.html"),
            "<html><body><p>{{company_name}} 御中</p><p>{{job_position}}</p></body></html>",
        )
        .unwrap();
        fs::write(root.join("templates/outreach.txt"), "{{company_name}} 御中\n{{job_position}}").unwrap();
        let config = AppConfig::load(root, None).unwrap();
        Self { dir, config }
    }

    pub fn prospects(&self) -> ProspectLedger {
        ProspectLedger::new(&self.config.paths.prospects)
    }

    pub fn history(&self) -> Vec<SendAttempt> {
        SendHistory::new(&self.config.paths.send_history).load().unwrap()
    }

    pub fn unsubscribes(&self) -> UnsubscribeLedger {
        UnsubscribeLedger::new(&self.config.paths.unsubscribes)
    }

    pub fn bounces(&self) -> BounceLedger {
        BounceLedger::new(&self.config.paths.bounces)
    }

    pub fn seed(&self, companies: &[Company]) {
        self.prospects().save(companies).unwrap();
    }

    pub fn company(&self, id: u64) -> Company {
        self.prospects().get(id).unwrap().unwrap()
    }

    pub fn unsubscribe(&self, email: &str, reason: &str) {
        self.unsubscribes()
            .append(&UnsubscribeEvent {
                submitted_at: now(),
                email: email.to_string(),
                reason: reason.to_string(),
                source: UnsubscribeSource::Form,
                matched_company_id: None,
            })
            .unwrap();
    }

    pub fn pipeline(&self, transport: Arc<dyn MailTransport>) -> Pipeline {
        let templates = TemplateBundle::load(&self.config, EmailFormat::HtmlText).unwrap();
        Pipeline::new(self.config.clone(), templates, transport)
    }
}

pub fn request(start_id: u64, end_id: u64) -> RunRequest {
    RunRequest {
        start_id,
        end_id,
        max_emails: None,
        format: EmailFormat::HtmlText,
    }
}

pub fn acme() -> Company {
    let mut c = Company::new(10, "Acme K.K.");
    c.roster_email = Some("info@acme.example".into());
    c.website = Some("https://www.acme.example".into());
    c.job_position = "営業/マーケ".into();
    c
}

/// In-memory transport: records every message and replays scripted outcomes
/// (default: accept)
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<OutgoingMessage>>,
    script: Mutex<VecDeque<Result<()>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(outcomes: Vec<Result<()>>) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(outcomes.into()),
        })
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message.clone());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Transport whose sends never complete
pub struct HangingTransport;

#[async_trait]
impl MailTransport for HangingTransport {
    async fn send(&self, _message: &OutgoingMessage) -> Result<()> {
        std::future::pending::<Result<()>>().await
    }
}
