//! hj-sender library interface
//!
//! Message builder, SMTP transport with retry, opt-in DNS pre-check,
//! dashboard notification and the pipeline controller that ties them to the
//! ledgers in `hj-common`.

pub mod controller;
pub mod dashboard;
pub mod dns;
pub mod message;
pub mod retry;
pub mod transport;

pub use controller::{CompanyOutcome, Pipeline, RunRequest, RunSummary};
pub use message::{EmailFormat, MessageBuilder, OutgoingMessage, TemplateBundle};
pub use retry::RetryPolicy;
pub use transport::{MailTransport, SmtpTransport};
