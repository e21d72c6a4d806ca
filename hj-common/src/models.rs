//! Ledger row types and their enumerations
//!
//! Every enum renders to the exact token stored in the CSV ledgers and parses
//! leniently (case-insensitive, surrounding whitespace ignored). Unknown or
//! empty cells fall back to the documented default instead of failing the
//! whole ledger read.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! ledger_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident {
            $($variant:ident => $token:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }

            /// Parse a ledger cell, returning `None` for unknown tokens
            pub fn parse(raw: &str) -> Option<Self> {
                let lowered = raw.trim().to_ascii_lowercase();
                match lowered.as_str() {
                    $($token $(| $alias)* => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Parse a ledger cell, falling back to the default
            pub fn parse_or_default(raw: &str) -> Self {
                Self::parse(raw).unwrap_or($name::$default)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

ledger_enum! {
    /// How a company's resolved address was obtained
    ResolutionMethod, default = Unresolved {
        Roster => "roster",
        Harvested => "harvested",
        DomainDerived => "domain-derived" | "domain_derived",
        Unresolved => "unresolved" | "",
    }
}

ledger_enum! {
    /// Outcome of one pipeline iteration, as written to the send history
    SendResult, default = Failed {
        Success => "success",
        Failed => "failed",
        FailedUnresolved => "failed:unresolved" | "skipped:unresolved",
        FailedInterrupted => "failed:interrupted",
        SkippedDuplicate => "skipped:duplicate",
        SkippedUnsubscribed => "skipped:unsubscribed",
        SkippedBounced => "skipped:bounced",
        SkippedDns => "skipped:dns",
        ResolverOverride => "resolver:override",
    }
}

impl SendResult {
    /// Failures for reporting purposes (includes unresolved companies)
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SendResult::Failed | SendResult::FailedUnresolved | SendResult::FailedInterrupted
        )
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            SendResult::SkippedDuplicate
                | SendResult::SkippedUnsubscribed
                | SendResult::SkippedBounced
                | SendResult::SkippedDns
        )
    }

    /// Whether this row records a real pipeline iteration (as opposed to an
    /// operator event such as a resolver override)
    pub fn is_attempt(&self) -> bool {
        !matches!(self, SendResult::ResolverOverride)
    }
}

ledger_enum! {
    /// Coarse classification of a delivery failure report
    BounceClass, default = None {
        None => "none" | "",
        Permanent => "permanent" | "hard",
        Temporary => "temporary" | "soft",
        Unknown => "unknown",
    }
}

ledger_enum! {
    UnsubscribeState, default = Active {
        Active => "active" | "",
        Unsubscribed => "unsubscribed",
    }
}

ledger_enum! {
    /// Where an opt-out request came from
    UnsubscribeSource, default = Manual {
        Form => "form",
        Manual => "manual" | "",
        SheetsAdapter => "sheets-adapter" | "sheets_adapter" | "sheets",
    }
}

/// One prospect row of the Prospect Ledger
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Company {
    pub id: u64,
    pub name: String,
    pub website: Option<String>,
    pub roster_email: Option<String>,
    pub job_position: String,
    pub resolved_email: Option<String>,
    pub resolution_method: ResolutionMethod,
    pub last_send_time: Option<DateTime<Local>>,
    pub last_send_result: Option<SendResult>,
    pub bounce_class: BounceClass,
    pub bounce_first_seen: Option<DateTime<Local>>,
    pub bounce_reason: Option<String>,
    pub unsubscribe_state: UnsubscribeState,
    pub unsubscribe_time: Option<DateTime<Local>>,
    pub unsubscribe_reason: Option<String>,
}

impl Company {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.unsubscribe_state == UnsubscribeState::Unsubscribed
    }

    /// Addresses that belong to this row (roster and resolved), lowercased
    pub fn known_addresses(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        for addr in [&self.roster_email, &self.resolved_email].into_iter().flatten() {
            let lowered = addr.trim().to_ascii_lowercase();
            if !lowered.is_empty() && !out.contains(&lowered) {
                out.push(lowered);
            }
        }
        out
    }

    /// `job_position` up to the first `/`, trimmed
    pub fn primary_job(&self) -> &str {
        primary_job(&self.job_position)
    }
}

/// First role of a `/`-separated job field, trimmed
pub fn primary_job(job_position: &str) -> &str {
    job_position.split('/').next().unwrap_or("").trim()
}

/// One opt-out event of the Unsubscribe Ledger
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubscribeEvent {
    pub submitted_at: DateTime<Local>,
    pub email: String,
    pub reason: String,
    pub source: UnsubscribeSource,
    pub matched_company_id: Option<u64>,
}

/// One processed bounce notification of the Bounce Ledger
#[derive(Debug, Clone, PartialEq)]
pub struct BounceEvent {
    pub observed_at: DateTime<Local>,
    pub message_uid: String,
    pub recipient: String,
    pub class: BounceClass,
    pub reason: String,
    pub raw_subject: String,
}

/// One row of the Send-History Ledger
#[derive(Debug, Clone, PartialEq)]
pub struct SendAttempt {
    pub attempted_at: DateTime<Local>,
    pub company_id: u64,
    pub address: String,
    pub tracking_id: Uuid,
    pub result: SendResult,
    pub error: String,
    pub subject: String,
    pub message_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_result_tokens() {
        assert_eq!(SendResult::SkippedUnsubscribed.as_str(), "skipped:unsubscribed");
        assert_eq!(SendResult::parse("SUCCESS"), Some(SendResult::Success));
        assert_eq!(
            SendResult::parse("skipped:unresolved"),
            Some(SendResult::FailedUnresolved)
        );
        assert_eq!(SendResult::parse("bogus"), None);
        assert!(SendResult::FailedUnresolved.is_failure());
        assert!(!SendResult::SkippedBounced.is_failure());
        assert!(SendResult::SkippedBounced.is_skip());
        assert!(!SendResult::ResolverOverride.is_attempt());
    }

    #[test]
    fn test_missing_columns_default() {
        assert_eq!(BounceClass::parse_or_default(""), BounceClass::None);
        assert_eq!(
            UnsubscribeState::parse_or_default("  "),
            UnsubscribeState::Active
        );
        assert_eq!(
            ResolutionMethod::parse_or_default("Domain-Derived"),
            ResolutionMethod::DomainDerived
        );
    }

    #[test]
    fn test_primary_job() {
        assert_eq!(primary_job("営業/マーケ"), "営業");
        assert_eq!(primary_job("  Sales Lead / Marketing "), "Sales Lead");
        assert_eq!(primary_job("Engineer"), "Engineer");
        assert_eq!(primary_job(""), "");
    }

    #[test]
    fn test_known_addresses_deduplicates_case_insensitively() {
        let mut company = Company::new(1, "Acme");
        company.roster_email = Some("Info@Acme.example".into());
        company.resolved_email = Some("info@acme.example".into());
        assert_eq!(company.known_addresses(), vec!["info@acme.example"]);
    }
}
