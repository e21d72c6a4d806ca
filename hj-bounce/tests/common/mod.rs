//! Shared fixtures for hj-bounce integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hj_bounce::{ArchiveMethod, BounceIngestor, IngestOptions, IngestReport, Mailbox};
use hj_common::config::AppConfig;
use hj_common::ledger::{BounceLedger, ProcessedTracking, ProspectLedger, SendHistory};
use hj_common::{BounceEvent, Company, Error, Result, SendAttempt};
use hj_sender::{EmailFormat, MailTransport, OutgoingMessage, Pipeline, RunRequest, TemplateBundle};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const INI: &str = "[SMTP]
server = smtp.huganjob.example
port = 587
user = contact@huganjob.example
password = secret
from_email = contact@huganjob.example

[IMAP]
server = imap.huganjob.example
bounce_folder = bounce

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
            "<html><body><p>{{company_name}} 御中</p></body></html>",
        )
        .unwrap();
        fs::write(root.join("templates/outreach.txt"), "{{company_name}} 御中").unwrap();
        let config = AppConfig::load(root, None).unwrap();
        Self { dir, config }
    }

    pub fn prospects(&self) -> ProspectLedger {
        ProspectLedger::new(&self.config.paths.prospects)
    }

    pub fn seed(&self, companies: &[Company]) {
        self.prospects().save(companies).unwrap();
    }

    pub fn company(&self, id: u64) -> Company {
        self.prospects().get(id).unwrap().unwrap()
    }

    pub fn bounce_events(&self) -> Vec<BounceEvent> {
        BounceLedger::new(&self.config.paths.bounces).load().unwrap()
    }

    pub fn history(&self) -> Vec<SendAttempt> {
        SendHistory::new(&self.config.paths.send_history).load().unwrap()
    }

    pub fn tracking(&self) -> ProcessedTracking {
        ProcessedTracking::load(&self.config.paths.processed_tracking).unwrap()
    }

    pub fn ingest(&self, mailbox: &mut MemoryMailbox, options: &IngestOptions) -> IngestReport {
        BounceIngestor::new(&self.config).ingest(mailbox, options).unwrap()
    }

    pub fn pipeline(&self) -> Pipeline {
        let templates = TemplateBundle::load(&self.config, EmailFormat::HtmlText).unwrap();
        Pipeline::new(self.config.clone(), templates, Arc::new(AcceptingTransport))
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

pub fn company(id: u64, name: &str, email: &str) -> Company {
    let mut c = Company::new(id, name);
    c.roster_email = Some(email.to_string());
    c.job_position = "営業".into();
    c
}

/// Postfix-style DSN for one failed recipient
pub fn dsn(recipient: &str, diagnostic: &str) -> Vec<u8> {
    format!(
        "From: MAILER-DAEMON@mail.huganjob.example (Mail Delivery System)\r
To: contact@huganjob.example\r
Subject: Undelivered Mail Returned to Sender\r
MIME-Version: 1.0\r
Content-Type: multipart/report; report-type=delivery-status; boundary=\"RPT\"\r
\r
--RPT\r
Content-Type: text/plain; charset=us-ascii\r
\r
I'm sorry to have to inform you that your message could not be delivered.\r
<{recipient}>: {diagnostic}\r
\r
--RPT\r
Content-Type: message/delivery-status\r
\r
Reporting-MTA: dns; mail.huganjob.example\r
\r
Final-Recipient: rfc822; {recipient}\r
Action: failed\r
\r
--RPT--\r
"
    )
    .into_bytes()
}

/// Exchange-style report: the SMTP code is only in the delivery-status part
pub fn exchange_report(recipient: &str) -> Vec<u8> {
    format!(
        "From: postmaster@outlook.example\r
To: contact@huganjob.example\r
Subject: Undeliverable: Recruitment proposal\r
MIME-Version: 1.0\r
Content-Type: multipart/report; report-type=delivery-status; boundary=\"EXC\"\r
\r
--EXC\r
Content-Type: text/plain; charset=us-ascii\r
\r
Your message to {recipient} couldn't be delivered.\r
The address couldn't be found.\r
\r
--EXC\r
Content-Type: message/delivery-status\r
\r
Reporting-MTA: dns; outlook.example\r
\r
Final-Recipient: rfc822; {recipient}\r
Action: failed\r
Status: 5.1.10\r
Diagnostic-Code: smtp; 550 5.1.10 RESOLVER.ADR.RecipientNotFound\r
\r
--EXC--\r
"
    )
    .into_bytes()
}

/// How [`MemoryMailbox::archive`] behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveBehavior {
    /// Message leaves the inbox
    Move,
    /// Message stays in the inbox, flagged
    Flag,
    /// Every archival step fails
    Fail,
}

/// In-memory inbox keyed by UID
pub struct MemoryMailbox {
    pub inbox: BTreeMap<u32, Vec<u8>>,
    pub archived: Vec<u32>,
    pub flagged: Vec<u32>,
    pub behavior: ArchiveBehavior,
    pub fail_fetch: Option<u32>,
}

impl MemoryMailbox {
    pub fn new(behavior: ArchiveBehavior) -> Self {
        Self {
            inbox: BTreeMap::new(),
            archived: Vec::new(),
            flagged: Vec::new(),
            behavior,
            fail_fetch: None,
        }
    }

    pub fn deliver(&mut self, uid: u32, raw: Vec<u8>) {
        self.inbox.insert(uid, raw);
    }
}

impl Mailbox for MemoryMailbox {
    fn search(&mut self, _query: &str) -> Result<Vec<u32>> {
        Ok(self.inbox.keys().copied().collect())
    }

    fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
        if self.fail_fetch == Some(uid) {
            return Err(Error::Imap(format!("UID FETCH {}: connection reset", uid)));
        }
        self.inbox
            .get(&uid)
            .cloned()
            .ok_or_else(|| Error::Imap(format!("UID FETCH {}: no such message", uid)))
    }

    fn archive(&mut self, uid: u32, _folder: &str) -> Result<ArchiveMethod> {
        match self.behavior {
            ArchiveBehavior::Move => {
                self.inbox.remove(&uid);
                self.archived.push(uid);
                Ok(ArchiveMethod::Moved)
            }
            ArchiveBehavior::Flag => {
                self.flagged.push(uid);
                Ok(ArchiveMethod::Flagged)
            }
            ArchiveBehavior::Fail => Err(Error::Imap("STORE refused".into())),
        }
    }

    fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Transport that accepts every message
pub struct AcceptingTransport;

#[async_trait]
impl MailTransport for AcceptingTransport {
    async fn send(&self, _message: &OutgoingMessage) -> Result<()> {
        Ok(())
    }
}
