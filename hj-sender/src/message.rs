//! Message builder
//!
//! Renders the subject and bodies for one company and tags the message with
//! its per-attempt tracking id. The output is a plain [`OutgoingMessage`];
//! conversion to a wire message happens in [`OutgoingMessage::to_lettre`].

use clap::ValueEnum;
use hj_common::config::AppConfig;
use hj_common::time::now;
use hj_common::{Company, Error, Result};
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use std::path::Path;
use uuid::Uuid;

/// Body layout chosen by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EmailFormat {
    /// multipart/alternative with text and HTML parts
    #[default]
    #[value(name = "html_text")]
    HtmlText,
    /// single text/html part
    #[value(name = "html_only")]
    HtmlOnly,
    /// single text/plain part
    #[value(name = "text_only")]
    TextOnly,
}

impl EmailFormat {
    pub fn needs_html(&self) -> bool {
        matches!(self, EmailFormat::HtmlText | EmailFormat::HtmlOnly)
    }

    pub fn needs_text(&self) -> bool {
        matches!(self, EmailFormat::HtmlText | EmailFormat::TextOnly)
    }
}

/// HTML and plain-text templates
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateBundle {
    pub html: String,
    pub text: Option<String>,
}

impl TemplateBundle {
    /// Load the templates named by `[EMAIL_CONTENT]`.
    ///
    /// The text template is mandatory when `format` produces a text part.
    pub fn load(config: &AppConfig, format: EmailFormat) -> Result<Self> {
        let html = if format.needs_html() {
            read_template(&config.content.template_file)?
        } else {
            String::new()
        };
        let text = match &config.content.text_template_file {
            Some(path) if format.needs_text() => Some(read_template(path)?),
            _ => None,
        };
        if format.needs_text() && text.is_none() {
            return Err(Error::Config(
                "[EMAIL_CONTENT] text_template_file is required for html_text and text_only formats"
                    .to_string(),
            ));
        }
        Ok(Self { html, text })
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map(|t| t.trim_start_matches('\u{FEFF}').to_string())
        .map_err(|e| Error::Config(format!("Cannot read template {}: {}", path.display(), e)))
}

/// A fully rendered message ready for submission
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub from_name: String,
    pub from_email: String,
    pub reply_to: String,
    pub to: String,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
    pub tracking_id: Uuid,
    pub message_id: String,
}

/// `X-Tracking-ID` header carrying the attempt's UUID
#[derive(Debug, Clone)]
struct TrackingHeader(String);

impl Header for TrackingHeader {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Tracking-ID")
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

impl OutgoingMessage {
    /// Build the RFC 5322 message.
    ///
    /// Only `html_text` produces multipart/alternative; single-format
    /// messages carry exactly one part.
    pub fn to_lettre(&self) -> Result<lettre::Message> {
        let from = mailbox(Some(&self.from_name), &self.from_email)?;
        let reply_to = mailbox(None, &self.reply_to)?;
        let to = mailbox(None, &self.to)?;

        let builder = lettre::Message::builder()
            .from(from)
            .reply_to(reply_to)
            .to(to)
            .subject(self.subject.clone())
            .date_now()
            .message_id(Some(self.message_id.clone()))
            .header(TrackingHeader(self.tracking_id.to_string()));

        let built = match (&self.html, &self.text) {
            (Some(html), Some(text)) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                html.clone(),
            )),
            (Some(html), None) => builder.singlepart(SinglePart::html(html.clone())),
            (None, Some(text)) => builder.singlepart(SinglePart::plain(text.clone())),
            (None, None) => {
                return Err(Error::InvalidInput(format!(
                    "message {} has no body",
                    self.message_id
                )))
            }
        };
        let mut message =
            built.map_err(|e| Error::InvalidInput(format!("Cannot build message to {}: {}", self.to, e)))?;
        // lettre renders Date in UTC; replace it with the local offset
        message.headers_mut().insert_raw(HeaderValue::new(
            HeaderName::new_from_ascii_str("Date"),
            now().to_rfc2822(),
        ));
        Ok(message)
    }
}

fn mailbox(name: Option<&str>, address: &str) -> Result<Mailbox> {
    let address = address
        .trim()
        .parse()
        .map_err(|e| Error::InvalidInput(format!("invalid address '{}': {}", address, e)))?;
    Ok(Mailbox::new(name.map(String::from), address))
}

/// Renders messages for one run
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    from_name: String,
    from_email: String,
    reply_to: String,
    sender_domain: String,
    subject_template: String,
    tagline: String,
    beacon_url: Option<String>,
    templates: TemplateBundle,
    format: EmailFormat,
}

impl MessageBuilder {
    pub fn new(config: &AppConfig, templates: TemplateBundle, format: EmailFormat) -> Self {
        let beacon_url = if config.content.tracking_beacon {
            config.content.beacon_url.clone()
        } else {
            None
        };
        Self {
            from_name: config.smtp.sender_name.clone(),
            from_email: config.smtp.from_email.clone(),
            reply_to: config.smtp.reply_to.clone(),
            sender_domain: config.sender_domain().to_string(),
            subject_template: config.content.subject.clone(),
            tagline: config.content.tagline.clone(),
            beacon_url,
            templates,
            format,
        }
    }

    pub fn format(&self) -> EmailFormat {
        self.format
    }

    pub fn subject(&self, company: &Company) -> String {
        self.subject_template
            .replace("{primary_job}", company.primary_job())
            .replace("{tagline}", &self.tagline)
    }

    pub fn build(&self, company: &Company, address: &str, tracking_id: Uuid) -> OutgoingMessage {
        let html = self.format.needs_html().then(|| {
            let body = render(&self.templates.html, company);
            match &self.beacon_url {
                Some(url) => embed_beacon(&body, url, tracking_id),
                None => body,
            }
        });
        let text = if self.format.needs_text() {
            self.templates.text.as_deref().map(|t| render(t, company))
        } else {
            None
        };

        OutgoingMessage {
            from_name: self.from_name.clone(),
            from_email: self.from_email.clone(),
            reply_to: self.reply_to.clone(),
            to: address.trim().to_string(),
            subject: self.subject(company),
            html,
            text,
            tracking_id,
            message_id: format!(
                "<{}@{}>",
                hj_common::uuid_utils::message_token(),
                self.sender_domain
            ),
        }
    }
}

/// Substitute `{{company_name}}` and `{{job_position}}`
pub fn render(template: &str, company: &Company) -> String {
    template
        .replace("{{company_name}}", &company.name)
        .replace("{{job_position}}", &company.job_position)
}

fn embed_beacon(html: &str, url: &str, tracking_id: Uuid) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    let tag = format!(
        "<img src=\"{}{}tid={}\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none\" />",
        url, separator, tracking_id
    );
    match html.rfind("</body>") {
        Some(pos) => format!("{}{}{}", &html[..pos], tag, &html[pos..]),
        None => format!("{}{}", html, tag),
    }
}
