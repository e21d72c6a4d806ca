//! # HUGANJOB Common Library
//!
//! Shared code for the HUGANJOB outreach binaries including:
//! - Prospect, unsubscribe, bounce and send-history ledgers
//! - Process lock guarding the sender
//! - Address resolution and the suppression oracle
//! - Bounce classification
//! - Configuration loading
//! - Timestamp and identifier utilities

pub mod address;
pub mod bounce_class;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod models;
pub mod oracle;
pub mod time;
pub mod uuid_utils;

pub use error::{Error, Result};
pub use models::{
    BounceClass, BounceEvent, Company, ResolutionMethod, SendAttempt, SendResult,
    UnsubscribeEvent, UnsubscribeSource, UnsubscribeState,
};
