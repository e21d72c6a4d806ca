//! hj-bounce library interface
//!
//! Polls the sender's mailbox for delivery failure reports, classifies them,
//! appends them to the Bounce Ledger and marks permanently bounced companies
//! in the Prospect Ledger. Runs independently of the sender and never takes
//! the sender's process lock.

pub mod imap_mailbox;
pub mod ingest;
pub mod mailbox;
pub mod parse;

pub use imap_mailbox::ImapMailbox;
pub use ingest::{BounceIngestor, IngestOptions, IngestReport};
pub use mailbox::{ArchiveMethod, Mailbox};
