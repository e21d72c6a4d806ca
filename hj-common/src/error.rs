//! Common error types for HUGANJOB

use thiserror::Error;

/// Common result type for HUGANJOB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the HUGANJOB binaries
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file missing, unreadable or incomplete
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another sender holds the process lock
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// No deliverable address could be resolved for a company
    #[error("Resolve failure for company {company_id}: {reason}")]
    ResolveFailure { company_id: u64, reason: String },

    /// Send suppressed by unsubscribe or bounce state
    #[error("Send suppressed for company {company_id}: {reason}")]
    SuppressedSend { company_id: u64, reason: String },

    /// SMTP failure that may succeed on retry
    #[error("Transient SMTP error: {0}")]
    TransientSmtp(String),

    /// SMTP refusal (5xx or recipients refused)
    #[error("Permanent SMTP error: {0}")]
    PermanentSmtp(String),

    /// IMAP connectivity or protocol error
    #[error("IMAP error: {0}")]
    Imap(String),

    /// Ledger could not be written; data integrity is at risk
    #[error("Ledger write error: {0}")]
    LedgerWrite(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid user input or malformed ledger value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Errors that terminate a sender run instead of being recorded per company
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::LockTimeout(_) | Error::LedgerWrite(_)
        )
    }

    pub fn ledger_write(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Error::LedgerWrite(format!("{}: {}", path.display(), err))
    }
}
