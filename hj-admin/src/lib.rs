//! hj-admin library interface
//!
//! Operator maintenance of the HUGANJOB ledgers: unsubscribe intake and
//! mirror replay, resolver overrides, decommission re-sequencing and a
//! status summary. Every operation works directly on the CSV ledgers.

pub mod roster;
pub mod status;
pub mod unsubscribe;

pub use roster::{decommission, record_override, DecommissionReport};
pub use status::LedgerStatus;
pub use unsubscribe::{AddOutcome, ImportReport, Unresolved};
