//! Bounce report decoding and failed-recipient extraction

use hj_common::address::is_valid_address;
use hj_common::{Error, Result};
use mailparse::{MailHeaderMap, ParsedMail};
use once_cell::sync::Lazy;
use regex::Regex;

static ADDRESS_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

static DSN_RECIPIENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^\s*(?:final|original)-recipient:\s*(?:rfc822\s*;)?\s*<?([^\s<>;]+@[^\s<>;]+?)>?\s*$")
        .unwrap()
});

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Local parts that belong to report generators, never to recipients
const SYSTEM_LOCAL_PARTS: &[&str] = &["mailer-daemon", "postmaster"];

/// A decoded bounce report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceReport {
    pub subject: String,
    pub from: String,
    /// Preferred body: text/plain, else delivery-status, else stripped HTML
    pub body: String,
    /// `message/delivery-status` part (`Diagnostic-Code`, `Status`), empty when absent
    pub delivery_status: String,
    pub failed_recipients: Vec<String>,
}

impl BounceReport {
    /// Text the classifier reads: the preferred body plus the DSN fields
    pub fn diagnostic_text(&self) -> String {
        if self.delivery_status.is_empty() || self.body == self.delivery_status {
            self.body.clone()
        } else {
            format!("{}\n{}", self.body, self.delivery_status)
        }
    }
}

#[derive(Default)]
struct Parts {
    plain: Option<String>,
    status: Option<String>,
    html: Option<String>,
    all_text: String,
}

/// Decode a raw RFC 822 message and recover the addresses that failed.
///
/// `own_addresses` (the operator's mailboxes) are never reported as failed.
pub fn parse_report(raw: &[u8], own_addresses: &[String]) -> Result<BounceReport> {
    let mail = mailparse::parse_mail(raw)
        .map_err(|e| Error::InvalidInput(format!("MIME parse failed: {}", e)))?;

    let subject = mail.headers.get_first_value("Subject").unwrap_or_default();
    let from = mail.headers.get_first_value("From").unwrap_or_default();

    let mut parts = Parts::default();
    collect_parts(&mail, &mut parts)?;

    let body = parts
        .plain
        .clone()
        .or_else(|| parts.status.clone())
        .or_else(|| parts.html.as_deref().map(strip_html))
        .unwrap_or_default();

    let excluded = |addr: &str| {
        let lowered = addr.to_ascii_lowercase();
        let local = lowered.split('@').next().unwrap_or("");
        SYSTEM_LOCAL_PARTS.contains(&local)
            || own_addresses.iter().any(|own| own.eq_ignore_ascii_case(&lowered))
    };

    // X-Failed-Recipients, then DSN fields, then any address in the body
    let header_recipients: Vec<String> = mail
        .headers
        .get_all_values("X-Failed-Recipients")
        .iter()
        .flat_map(|v| v.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>())
        .collect();
    let dsn_recipients: Vec<String> = DSN_RECIPIENT
        .captures_iter(&parts.all_text)
        .map(|c| c[1].to_string())
        .collect();
    let body_recipients: Vec<String> = ADDRESS_IN_TEXT
        .find_iter(&parts.all_text)
        .map(|m| m.as_str().to_string())
        .collect();

    let failed_recipients = [header_recipients, dsn_recipients, body_recipients]
        .into_iter()
        .map(|tier| dedupe(tier.into_iter().filter(|a| is_valid_address(a) && !excluded(a))))
        .find(|tier| !tier.is_empty())
        .unwrap_or_default();

    Ok(BounceReport {
        subject,
        from,
        body,
        delivery_status: parts.status.unwrap_or_default(),
        failed_recipients,
    })
}

fn collect_parts(part: &ParsedMail<'_>, out: &mut Parts) -> Result<()> {
    if part.subparts.is_empty() {
        let mimetype = part.ctype.mimetype.to_ascii_lowercase();
        let text = part
            .get_body()
            .map_err(|e| Error::InvalidInput(format!("body decode failed: {}", e)))?;
        match mimetype.as_str() {
            "text/plain" if out.plain.is_none() => out.plain = Some(text.clone()),
            "message/delivery-status" if out.status.is_none() => out.status = Some(text.clone()),
            "text/html" if out.html.is_none() => out.html = Some(text.clone()),
            _ => {}
        }
        if mimetype.starts_with("text/") || mimetype.starts_with("message/") {
            out.all_text.push_str(&text);
            out.all_text.push('\n');
        }
        return Ok(());
    }
    for sub in &part.subparts {
        collect_parts(sub, out)?;
    }
    Ok(())
}

fn dedupe(addresses: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for addr in addresses {
        let lowered = addr.to_ascii_lowercase();
        if !out.contains(&lowered) {
            out.push(lowered);
        }
    }
    out
}

/// Tag-stripped HTML with whitespace collapsed
pub fn strip_html(html: &str) -> String {
    let text = HTML_TAG
        .replace_all(html, " ")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own() -> Vec<String> {
        vec!["contact@huganjob.example".to_string()]
    }

    const POSTFIX_REPORT: &str = "From: MAILER-DAEMON@mail.huganjob.example (Mail Delivery System)\r
To: contact@huganjob.example\r
Subject: Undelivered Mail Returned to Sender\r
MIME-Version: 1.0\r
Content-Type: multipart/report; report-type=delivery-status; boundary=\"B1\"\r
\r
--B1\r
Content-Type: text/plain; charset=us-ascii\r
\r
<x@dead.example>: host mx.dead.example said: 550 5.1.1 User unknown\r
\r
--B1\r
Content-Type: message/delivery-status\r
\r
Reporting-MTA: dns; mail.huganjob.example\r
\r
Final-Recipient: rfc822; x@dead.example\r
Action: failed\r
Status: 5.1.1\r
\r
--B1--\r
";

    #[test]
    fn test_postfix_report() {
        let report = parse_report(POSTFIX_REPORT.as_bytes(), &own()).unwrap();
        assert_eq!(report.subject, "Undelivered Mail Returned to Sender");
        assert!(report.from.contains("MAILER-DAEMON"));
        assert!(report.body.contains("User unknown"));
        assert!(report.delivery_status.contains("Status: 5.1.1"));
        assert!(report.diagnostic_text().contains("User unknown"));
        assert!(report.diagnostic_text().contains("Status: 5.1.1"));
        assert_eq!(report.failed_recipients, vec!["x@dead.example"]);
    }

    #[test]
    fn test_asset_word_recipient_is_kept() {
        let raw = "From: MAILER-DAEMON@mx.example\r
Subject: Undelivered Mail Returned to Sender\r
X-Failed-Recipients: bgates@example.co.jp\r
Content-Type: text/plain\r
\r
550 5.1.1 User unknown\r
";
        let report = parse_report(raw.as_bytes(), &own()).unwrap();
        assert_eq!(report.failed_recipients, vec!["bgates@example.co.jp"]);
    }

    #[test]
    fn test_x_failed_recipients_header_wins() {
        let raw = "From: Mail Delivery System <Mailer-Daemon@mx.example>\r
Subject: Mail delivery failed: returning message to sender\r
X-Failed-Recipients: Full@Busy.example\r
Content-Type: text/plain; charset=utf-8\r
\r
A message that you sent could not be delivered. Mailbox full.\r
Original message from contact@huganjob.example to other@busy.example\r
";
        let report = parse_report(raw.as_bytes(), &own()).unwrap();
        assert_eq!(report.failed_recipients, vec!["full@busy.example"]);
    }

    #[test]
    fn test_body_scan_excludes_own_and_system_addresses() {
        let raw = "From: postmaster@mx.example\r
Subject: Undeliverable: ご案内\r
Content-Type: text/plain; charset=utf-8\r
\r
Delivery has failed to these recipients: info@closed.example\r
Sent by contact@huganjob.example via postmaster@mx.example\r
";
        let report = parse_report(raw.as_bytes(), &own()).unwrap();
        assert_eq!(report.failed_recipients, vec!["info@closed.example"]);
    }

    #[test]
    fn test_encoded_subject_and_html_only_body() {
        let raw = "From: MAILER-DAEMON@mx.example\r
Subject: =?UTF-8?B?6YWN5L+h5aSx5pWX?=\r
Content-Type: text/html; charset=utf-8\r
\r
<html><body><p>Address rejected:&nbsp;<b>nobody@gone.example</b></p></body></html>\r
";
        let report = parse_report(raw.as_bytes(), &own()).unwrap();
        assert_eq!(report.subject, "配信失敗");
        assert_eq!(report.body, "Address rejected: nobody@gone.example");
        assert_eq!(report.failed_recipients, vec!["nobody@gone.example"]);
    }

    #[test]
    fn test_report_without_recipient() {
        let raw = "From: MAILER-DAEMON@mx.example\r
Subject: failure notice\r
Content-Type: text/plain\r
\r
Something went wrong.\r
";
        let report = parse_report(raw.as_bytes(), &own()).unwrap();
        assert!(report.failed_recipients.is_empty());
    }
}
