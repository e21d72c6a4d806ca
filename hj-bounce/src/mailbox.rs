//! Mailbox abstraction and the archival fallback chain

use chrono::NaiveDate;
use hj_common::Result;

/// Subject lines that identify delivery failure reports
pub const SUBJECT_HEURISTICS: &[&str] = &[
    "Mail delivery failed",
    "Undelivered Mail",
    "Delivery Status Notification",
    "Returned mail",
    "Undeliverable",
    "failure notice",
    "Delivery Failure",
];

/// Senders that identify delivery failure reports
pub const FROM_HEURISTICS: &[&str] = &["MAILER-DAEMON", "postmaster"];

/// How a processed message was moved out of the way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMethod {
    /// `UID MOVE` into the bounce folder
    Moved,
    /// `UID COPY`, `\Deleted`, `EXPUNGE`
    CopiedAndExpunged,
    /// Left in place, flagged `\Flagged \Seen`
    Flagged,
}

/// Operations the bounce ingestor needs from a mailbox
pub trait Mailbox {
    /// UIDs matching an IMAP search query
    fn search(&mut self, query: &str) -> Result<Vec<u32>>;

    /// Raw RFC 822 message
    fn fetch(&mut self, uid: u32) -> Result<Vec<u8>>;

    /// Move a processed message into `folder`, degrading as needed
    fn archive(&mut self, uid: u32, folder: &str) -> Result<ArchiveMethod>;

    fn logout(&mut self) -> Result<()>;
}

/// Primitive archival steps, tried in order by [`archive_with_fallback`]
pub trait ArchiveOps {
    fn ensure_folder(&mut self, folder: &str) -> Result<()>;
    fn move_message(&mut self, uid: u32, folder: &str) -> Result<()>;
    fn copy_and_expunge(&mut self, uid: u32, folder: &str) -> Result<()>;
    fn flag_processed(&mut self, uid: u32) -> Result<()>;
}

/// MOVE, then COPY + `\Deleted` + EXPUNGE, then flag in place.
///
/// Fails only when even flagging fails.
pub fn archive_with_fallback<A: ArchiveOps + ?Sized>(
    ops: &mut A,
    uid: u32,
    folder: &str,
) -> Result<ArchiveMethod> {
    let folder_ready = match ops.ensure_folder(folder) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(folder, error = %e, "Bounce folder unavailable");
            false
        }
    };

    if folder_ready {
        match ops.move_message(uid, folder) {
            Ok(()) => return Ok(ArchiveMethod::Moved),
            Err(e) => tracing::debug!(uid, error = %e, "MOVE failed, trying COPY + EXPUNGE"),
        }
        match ops.copy_and_expunge(uid, folder) {
            Ok(()) => return Ok(ArchiveMethod::CopiedAndExpunged),
            Err(e) => tracing::warn!(uid, error = %e, "COPY + EXPUNGE failed, flagging in place"),
        }
    }

    ops.flag_processed(uid)?;
    tracing::warn!(uid, "Bounce left in inbox, flagged as processed");
    Ok(ArchiveMethod::Flagged)
}

/// `SINCE <date>` combined with an OR-chain over the subject and sender
/// heuristics
pub fn search_query(since: NaiveDate) -> String {
    let terms: Vec<String> = SUBJECT_HEURISTICS
        .iter()
        .map(|s| format!("SUBJECT \"{}\"", s))
        .chain(FROM_HEURISTICS.iter().map(|f| format!("FROM \"{}\"", f)))
        .collect();
    format!("SINCE {} {}", since.format("%d-%b-%Y"), or_chain(&terms))
}

/// IMAP `OR` is binary and prefix: `OR a OR b c`
fn or_chain(terms: &[String]) -> String {
    match terms {
        [] => String::new(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("OR {} {}", first, or_chain(rest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hj_common::Error;

    #[test]
    fn test_or_chain_shape() {
        let terms: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(or_chain(&terms), "OR A OR B C");
        assert_eq!(or_chain(&terms[..1]), "A");
    }

    #[test]
    fn test_search_query() {
        let query = search_query(NaiveDate::from_ymd_opt(2025, 3, 7).unwrap());
        assert!(query.starts_with("SINCE 07-Mar-2025 OR SUBJECT \"Mail delivery failed\" OR "));
        assert!(query.ends_with("OR FROM \"MAILER-DAEMON\" FROM \"postmaster\""));
        let ors = query.matches("OR ").count();
        assert_eq!(ors, SUBJECT_HEURISTICS.len() + FROM_HEURISTICS.len() - 1);
    }

    /// Scripted archival primitives
    struct Ops {
        folder: bool,
        mv: bool,
        copy: bool,
        flag: bool,
        calls: Vec<&'static str>,
    }

    impl Ops {
        fn new(folder: bool, mv: bool, copy: bool, flag: bool) -> Self {
            Self { folder, mv, copy, flag, calls: Vec::new() }
        }

        fn step(&mut self, name: &'static str, ok: bool) -> Result<()> {
            self.calls.push(name);
            if ok {
                Ok(())
            } else {
                Err(Error::Imap(format!("{} refused", name)))
            }
        }
    }

    impl ArchiveOps for Ops {
        fn ensure_folder(&mut self, _folder: &str) -> Result<()> {
            let ok = self.folder;
            self.step("create", ok)
        }
        fn move_message(&mut self, _uid: u32, _folder: &str) -> Result<()> {
            let ok = self.mv;
            self.step("move", ok)
        }
        fn copy_and_expunge(&mut self, _uid: u32, _folder: &str) -> Result<()> {
            let ok = self.copy;
            self.step("copy", ok)
        }
        fn flag_processed(&mut self, _uid: u32) -> Result<()> {
            let ok = self.flag;
            self.step("flag", ok)
        }
    }

    #[test]
    fn test_move_preferred() {
        let mut ops = Ops::new(true, true, true, true);
        assert_eq!(archive_with_fallback(&mut ops, 1, "bounce").unwrap(), ArchiveMethod::Moved);
        assert_eq!(ops.calls, vec!["create", "move"]);
    }

    #[test]
    fn test_copy_when_move_unsupported() {
        let mut ops = Ops::new(true, false, true, true);
        assert_eq!(
            archive_with_fallback(&mut ops, 1, "bounce").unwrap(),
            ArchiveMethod::CopiedAndExpunged
        );
    }

    #[test]
    fn test_flag_when_folder_unavailable() {
        let mut ops = Ops::new(false, true, true, true);
        assert_eq!(archive_with_fallback(&mut ops, 1, "bounce").unwrap(), ArchiveMethod::Flagged);
        assert_eq!(ops.calls, vec!["create", "flag"]);
    }

    #[test]
    fn test_error_when_everything_fails() {
        let mut ops = Ops::new(true, false, false, false);
        assert!(archive_with_fallback(&mut ops, 1, "bounce").is_err());
    }
}
