//! String-pattern bounce classification
//!
//! Permanent indicators are checked before temporary ones: a report that
//! quotes both "550 user unknown" and "try again later" is permanent.

use crate::models::BounceClass;
use once_cell::sync::Lazy;
use regex::Regex;

const PERMANENT_PHRASES: &[&str] = &[
    "user unknown",
    "no such user",
    "mailbox unavailable",
    "address rejected",
    "does not exist",
];

const TEMPORARY_PHRASES: &[&str] = &[
    "mailbox full",
    "quota exceeded",
    "try again later",
    "deferred",
];

static PERMANENT_CODES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(550|551|553|554)\b").unwrap());
static TEMPORARY_CODES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(421|450|451|452)\b").unwrap());

/// Classification with the indicator that decided it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub class: BounceClass,
    pub reason: String,
}

/// Classify a bounce report from its decoded subject and body
pub fn classify(subject: &str, body: &str) -> Classification {
    let text = format!("{}\n{}", subject, body).to_lowercase();

    if let Some(phrase) = PERMANENT_PHRASES.iter().find(|p| text.contains(*p)) {
        return Classification {
            class: BounceClass::Permanent,
            reason: phrase.to_string(),
        };
    }
    if let Some(code) = PERMANENT_CODES.find(&text) {
        return Classification {
            class: BounceClass::Permanent,
            reason: format!("smtp {}", code.as_str()),
        };
    }
    if let Some(phrase) = TEMPORARY_PHRASES.iter().find(|p| text.contains(*p)) {
        return Classification {
            class: BounceClass::Temporary,
            reason: phrase.to_string(),
        };
    }
    if let Some(code) = TEMPORARY_CODES.find(&text) {
        return Classification {
            class: BounceClass::Temporary,
            reason: format!("smtp {}", code.as_str()),
        };
    }
    Classification {
        class: BounceClass::Unknown,
        reason: "no known indicator".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_phrases() {
        let c = classify("Undelivered Mail Returned to Sender", "<x@dead.example>: User unknown in virtual mailbox table");
        assert_eq!(c.class, BounceClass::Permanent);
        assert_eq!(c.reason, "user unknown");

        let c = classify("Delivery Status Notification (Failure)", "The email account that you tried to reach does not exist.");
        assert_eq!(c.class, BounceClass::Permanent);
    }

    #[test]
    fn test_permanent_codes() {
        let c = classify("Mail delivery failed", "host mx.dead.example said: 550 5.1.1 rejected");
        assert_eq!(c.class, BounceClass::Permanent);
        assert_eq!(c.reason, "smtp 550");
    }

    #[test]
    fn test_temporary() {
        assert_eq!(
            classify("Delivery delayed", "Mailbox full").class,
            BounceClass::Temporary
        );
        assert_eq!(
            classify("Warning", "server replied 452 too many recipients").class,
            BounceClass::Temporary
        );
    }

    #[test]
    fn test_permanent_takes_precedence() {
        let c = classify("Mail delivery failed", "451 try again later ... final: 550 no such user");
        assert_eq!(c.class, BounceClass::Permanent);
    }

    #[test]
    fn test_codes_need_word_boundaries() {
        assert_eq!(
            classify("Notice", "message size 15500 bytes").class,
            BounceClass::Unknown
        );
    }

    #[test]
    fn test_unknown() {
        assert_eq!(
            classify("Out of office", "I am away until Monday").class,
            BounceClass::Unknown
        );
    }
}
