//! IMAP-over-TLS mailbox (blocking; callers run it on a blocking thread)

use crate::mailbox::{archive_with_fallback, ArchiveMethod, ArchiveOps, Mailbox};
use hj_common::config::ImapSettings;
use hj_common::{Error, Result};
use native_tls::{TlsConnector, TlsStream};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const INBOX: &str = "INBOX";

type Session = imap::Session<TlsStream<TcpStream>>;

pub struct ImapMailbox {
    session: Session,
    server: String,
}

fn imap_err(context: &str, err: impl std::fmt::Display) -> Error {
    Error::Imap(format!("{}: {}", context, err))
}

impl ImapMailbox {
    /// Connect, log in and select the inbox
    pub fn connect(settings: &ImapSettings) -> Result<Self> {
        let server = format!("{}:{}", settings.server, settings.port);
        let addr = (settings.server.as_str(), settings.port)
            .to_socket_addrs()
            .map_err(|e| imap_err(&format!("resolve {}", server), e))?
            .next()
            .ok_or_else(|| Error::Imap(format!("resolve {}: no addresses", server)))?;

        let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| imap_err(&format!("connect {}", server), e))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;
        tcp.set_write_timeout(Some(READ_TIMEOUT))?;

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| imap_err("TLS setup", e))?;
        let stream = tls
            .connect(&settings.server, tcp)
            .map_err(|e| imap_err(&format!("TLS handshake with {}", server), e))?;

        let mut client = imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| imap_err(&format!("greeting from {}", server), e))?;
        let mut session = client
            .login(&settings.user, &settings.password)
            .map_err(|(e, _)| imap_err(&format!("login to {}", server), e))?;
        session
            .select(INBOX)
            .map_err(|e| imap_err("select INBOX", e))?;

        tracing::info!(server = %server, user = %settings.user, "IMAP session established");
        Ok(Self { session, server })
    }
}

impl Mailbox for ImapMailbox {
    fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let uids = self
            .session
            .uid_search(query)
            .map_err(|e| imap_err("UID SEARCH", e))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    fn fetch(&mut self, uid: u32) -> Result<Vec<u8>> {
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .map_err(|e| imap_err(&format!("UID FETCH {}", uid), e))?;
        fetches
            .iter()
            .find_map(|f| f.body().map(<[u8]>::to_vec))
            .ok_or_else(|| Error::Imap(format!("UID FETCH {}: empty response", uid)))
    }

    fn archive(&mut self, uid: u32, folder: &str) -> Result<ArchiveMethod> {
        archive_with_fallback(self, uid, folder)
    }

    fn logout(&mut self) -> Result<()> {
        self.session
            .logout()
            .map_err(|e| imap_err(&format!("logout from {}", self.server), e))
    }
}

impl ArchiveOps for ImapMailbox {
    fn ensure_folder(&mut self, folder: &str) -> Result<()> {
        let existing = self
            .session
            .list(None, Some(folder))
            .map_err(|e| imap_err("LIST", e))?;
        if existing.iter().any(|n| n.name().eq_ignore_ascii_case(folder)) {
            return Ok(());
        }
        self.session
            .create(folder)
            .map_err(|e| imap_err(&format!("CREATE {}", folder), e))?;
        tracing::info!(folder, "Created bounce folder");
        Ok(())
    }

    fn move_message(&mut self, uid: u32, folder: &str) -> Result<()> {
        self.session
            .uid_mv(uid.to_string(), folder)
            .map_err(|e| imap_err("UID MOVE", e))
    }

    fn copy_and_expunge(&mut self, uid: u32, folder: &str) -> Result<()> {
        let seq = uid.to_string();
        self.session
            .uid_copy(&seq, folder)
            .map_err(|e| imap_err("UID COPY", e))?;
        self.session
            .uid_store(&seq, "+FLAGS (\\Deleted)")
            .map_err(|e| imap_err("UID STORE \\Deleted", e))?;
        self.session.expunge().map_err(|e| imap_err("EXPUNGE", e))?;
        Ok(())
    }

    fn flag_processed(&mut self, uid: u32) -> Result<()> {
        self.session
            .uid_store(uid.to_string(), "+FLAGS (\\Flagged \\Seen)")
            .map_err(|e| imap_err("UID STORE \\Flagged", e))?;
        Ok(())
    }
}
