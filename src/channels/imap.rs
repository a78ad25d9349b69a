//! IMAP mailbox: raw IMAP4rev1 over TLS with Gmail's label extension.
//!
//! Operations run on a blocking thread against one cached session
//! (connect, `LOGIN`, `SELECT INBOX` once), so a batch logs in a single time.
//! A session that errors is dropped and the next call reconnects;
//! [`ImapMailbox::close`] logs out at the end of the run. Messages are
//! addressed by UID and fetched with `BODY.PEEK[]`, so reading a message
//! never marks it seen; [`MailSource::mark_seen`] does that explicitly once
//! the pipeline is done with it.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::{LabelStore, MailSource};
use crate::error::ChannelError;
use crate::pipeline::types::{ClassificationRecord, RawMessage, derive_labels};

/// Socket read/write timeout.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the IMAP server.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// Gmail mailbox implementing both [`MailSource`] and [`LabelStore`].
pub struct ImapMailbox {
    config: Arc<ImapConfig>,
    /// Labels known to exist on the server (filled lazily from `LIST`).
    known_labels: Arc<Mutex<HashSet<String>>>,
    session: Arc<Mutex<SessionCache<TlsStream>>>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config: Arc::new(config),
            known_labels: Arc::new(Mutex::new(HashSet::new())),
            session: Arc::new(Mutex::new(SessionCache::new())),
        }
    }

    /// Run `work` inside an authenticated session with INBOX selected.
    async fn with_session<T, F>(&self, work: F) -> Result<T, ChannelError>
    where
        T: Send + 'static,
        F: FnMut(&mut ImapSession<TlsStream>) -> Result<T, ChannelError> + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        let cache = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.run(|| open_session(&config), work)
        })
        .await
        .map_err(|e| protocol_error(format!("IMAP task failed: {e}")))?
    }

    /// Log out of the cached session, if one is open.
    pub async fn close(&self) {
        let cache = Arc::clone(&self.session);
        let closed = tokio::task::spawn_blocking(move || {
            cache.lock().unwrap_or_else(PoisonError::into_inner).close();
        })
        .await;
        if let Err(e) = closed {
            debug!(error = %e, "IMAP close task failed");
        }
    }
}

#[async_trait]
impl MailSource for ImapMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch_unread(&self, limit: usize) -> Result<Vec<RawMessage>, ChannelError> {
        let messages = self
            .with_session(move |session| fetch_recent_unseen(session, limit))
            .await
            .map_err(|e| match e {
                ChannelError::AuthFailed { .. } => e,
                other => ChannelError::FetchFailed {
                    name: "imap".into(),
                    reason: other.to_string(),
                },
            })?;
        info!(count = messages.len(), limit, "Fetched unread messages");
        Ok(messages)
    }

    async fn mark_seen(&self, id: &str) -> Result<(), ChannelError> {
        let uid = parse_uid(id)?;
        self.with_session(move |session| session.add_flag(uid, "\\Seen"))
            .await
    }
}

#[async_trait]
impl LabelStore for ImapMailbox {
    async fn apply_labels(&self, id: &str, record: &ClassificationRecord) -> Result<(), ChannelError> {
        let labels = derive_labels(record);
        let joined = labels.join(", ");
        let uid = parse_uid(id)?;
        let known = Arc::clone(&self.known_labels);

        self.with_session(move |session| {
            let mut known = known
                .lock()
                .map_err(|_| protocol_error("label cache poisoned"))?;
            ensure_labels(session, &mut known, &labels)?;
            session.add_labels(uid, &labels)
        })
        .await
        .map_err(|e| ChannelError::LabelFailed {
            id: id.to_string(),
            label: joined.clone(),
            reason: e.to_string(),
        })?;

        debug!(id, labels = %joined, "Applied labels");
        Ok(())
    }
}

// ── Operations over a session ───────────────────────────────────────

/// Search unseen UIDs, keep the `limit` most recent, fetch and parse them.
fn fetch_recent_unseen<S: Read + Write>(
    session: &mut ImapSession<S>,
    limit: usize,
) -> Result<Vec<RawMessage>, ChannelError> {
    let uids = most_recent(session.search_unseen()?, limit);
    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        match session.fetch_peek(uid)? {
            Some(raw) => match parse_message(&uid.to_string(), &raw) {
                Some(message) => messages.push(message),
                None => warn!(uid, "Skipping unparseable message"),
            },
            None => warn!(uid, "FETCH returned no message body"),
        }
    }
    Ok(messages)
}

/// Create whichever of `labels` the server does not have yet.
fn ensure_labels<S: Read + Write>(
    session: &mut ImapSession<S>,
    known: &mut HashSet<String>,
    labels: &[String],
) -> Result<(), ChannelError> {
    if labels.iter().all(|l| known.contains(l)) {
        return Ok(());
    }
    known.extend(session.list_mailboxes()?);
    for label in labels {
        if !known.contains(label) {
            session.create_mailbox(label)?;
            info!(label = %label, "Created label");
            known.insert(label.clone());
        }
    }
    Ok(())
}

/// Sort ascending and keep the last `limit` UIDs.
fn most_recent(mut uids: Vec<u32>, limit: usize) -> Vec<u32> {
    uids.sort_unstable();
    uids.dedup();
    let skip = uids.len().saturating_sub(limit);
    uids.split_off(skip)
}

fn parse_uid(id: &str) -> Result<u32, ChannelError> {
    id.parse().map_err(|_| ChannelError::NotFound {
        name: "imap".into(),
        id: id.to_string(),
    })
}

fn protocol_error(reason: impl Into<String>) -> ChannelError {
    ChannelError::Protocol {
        name: "imap".into(),
        reason: reason.into(),
    }
}

fn io_error(e: std::io::Error) -> ChannelError {
    protocol_error(e.to_string())
}

// ── Session reuse ───────────────────────────────────────────────────

/// At most one open session, kept between calls.
struct SessionCache<S: Read + Write> {
    session: Option<ImapSession<S>>,
}

impl<S: Read + Write> SessionCache<S> {
    fn new() -> Self {
        Self { session: None }
    }

    /// Run `work` on the cached session, opening one when there is none.
    /// A failure on a cached session is retried once on a fresh one; every
    /// operation here is idempotent.
    fn run<T>(
        &mut self,
        open: impl FnOnce() -> Result<ImapSession<S>, ChannelError>,
        mut work: impl FnMut(&mut ImapSession<S>) -> Result<T, ChannelError>,
    ) -> Result<T, ChannelError> {
        if let Some(mut session) = self.session.take() {
            match work(&mut session) {
                Ok(value) => {
                    self.session = Some(session);
                    return Ok(value);
                }
                Err(e) => debug!(error = %e, "Cached IMAP session failed, reconnecting"),
            }
        }

        let mut session = open()?;
        let value = work(&mut session)?;
        self.session = Some(session);
        Ok(value)
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout() {
                debug!(error = %e, "IMAP logout failed");
            }
        }
    }
}

// ── Connection ──────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Open a TLS connection and consume the server greeting.
fn connect(config: &ImapConfig) -> Result<ImapSession<TlsStream>, ChannelError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(io_error)?;
    tcp.set_read_timeout(Some(IO_TIMEOUT)).map_err(io_error)?;
    tcp.set_write_timeout(Some(IO_TIMEOUT)).map_err(io_error)?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| protocol_error(format!("invalid host {}: {e}", config.host)))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| protocol_error(format!("TLS setup failed: {e}")))?;

    let mut session = ImapSession::new(rustls::StreamOwned::new(conn, tcp));
    session.read_greeting()?;
    Ok(session)
}

/// Connect, authenticate and select INBOX.
fn open_session(config: &ImapConfig) -> Result<ImapSession<TlsStream>, ChannelError> {
    let mut session = connect(config)?;
    session.login(&config.username, &config.password)?;
    session.select_inbox()?;
    debug!(host = %config.host, "IMAP session opened");
    Ok(session)
}

// ── Protocol ────────────────────────────────────────────────────────

/// Completion status of a tagged response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
}

/// One server response line, with any literals it carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseLine {
    /// Line text with literal payloads removed.
    pub text: String,
    pub literals: Vec<Vec<u8>>,
}

/// Everything the server sent for one command.
#[derive(Debug, Clone)]
pub struct Response {
    pub untagged: Vec<ResponseLine>,
    pub status: Status,
    /// Text after the status word, e.g. `[ALREADYEXISTS] Folder exists`.
    pub text: String,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Fail unless the command completed with OK.
    fn ok(self, command: &str) -> Result<Self, ChannelError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(protocol_error(format!(
                "{command} failed: {:?} {}",
                self.status, self.text
            )))
        }
    }
}

/// A tagged IMAP conversation over any byte stream.
pub struct ImapSession<S: Read + Write> {
    reader: BufReader<S>,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
            next_tag: 1,
        }
    }

    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    pub fn read_greeting(&mut self) -> Result<(), ChannelError> {
        let greeting = self.read_response_line()?;
        if greeting.text.starts_with("* OK") || greeting.text.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(protocol_error(format!(
                "unexpected greeting: {}",
                greeting.text.trim_end()
            )))
        }
    }

    pub fn login(&mut self, username: &str, password: &SecretString) -> Result<(), ChannelError> {
        let command = format!(
            "LOGIN {} {}",
            quote(username),
            quote(password.expose_secret())
        );
        let response = self.command(&command)?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(ChannelError::AuthFailed {
                name: "imap".into(),
                reason: response.text,
            })
        }
    }

    pub fn select_inbox(&mut self) -> Result<(), ChannelError> {
        self.command("SELECT INBOX")?.ok("SELECT")?;
        Ok(())
    }

    pub fn search_unseen(&mut self) -> Result<Vec<u32>, ChannelError> {
        let response = self.command("UID SEARCH UNSEEN")?.ok("SEARCH")?;
        Ok(response
            .untagged
            .iter()
            .filter_map(|line| line.text.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
            .collect())
    }

    /// Fetch the full message without setting `\Seen`.
    pub fn fetch_peek(&mut self, uid: u32) -> Result<Option<Vec<u8>>, ChannelError> {
        let response = self
            .command(&format!("UID FETCH {uid} (BODY.PEEK[])"))?
            .ok("FETCH")?;
        Ok(response
            .untagged
            .into_iter()
            .filter(|line| line.text.contains(" FETCH "))
            .find_map(|line| line.literals.into_iter().next()))
    }

    pub fn list_mailboxes(&mut self) -> Result<Vec<String>, ChannelError> {
        let response = self.command("LIST \"\" \"*\"")?.ok("LIST")?;
        Ok(response
            .untagged
            .iter()
            .filter_map(|line| {
                if !line.text.starts_with("* LIST ") {
                    return None;
                }
                match line.literals.first() {
                    Some(literal) => Some(String::from_utf8_lossy(literal).into_owned()),
                    None => parse_list_name(&line.text),
                }
            })
            .collect())
    }

    /// Create a mailbox (Gmail label). An existing one counts as success.
    pub fn create_mailbox(&mut self, name: &str) -> Result<(), ChannelError> {
        let response = self.command(&format!("CREATE {}", quote(name)))?;
        if response.is_ok() || response.text.to_ascii_uppercase().contains("ALREADYEXISTS") {
            Ok(())
        } else {
            response.ok("CREATE").map(|_| ())
        }
    }

    pub fn add_labels(&mut self, uid: u32, labels: &[String]) -> Result<(), ChannelError> {
        let quoted: Vec<String> = labels.iter().map(|l| quote(l)).collect();
        self.command(&format!(
            "UID STORE {uid} +X-GM-LABELS ({})",
            quoted.join(" ")
        ))?
        .ok("STORE X-GM-LABELS")?;
        Ok(())
    }

    pub fn add_flag(&mut self, uid: u32, flag: &str) -> Result<(), ChannelError> {
        self.command(&format!("UID STORE {uid} +FLAGS ({flag})"))?
            .ok("STORE FLAGS")?;
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), ChannelError> {
        self.command("LOGOUT")?;
        Ok(())
    }

    /// Send one tagged command and collect its response.
    pub fn command(&mut self, command: &str) -> Result<Response, ChannelError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        if !command.starts_with("LOGIN ") {
            debug!(tag = %tag, command, "IMAP command");
        }

        let stream = self.reader.get_mut();
        stream
            .write_all(format!("{tag} {command}\r\n").as_bytes())
            .map_err(io_error)?;
        stream.flush().map_err(io_error)?;

        let prefix = format!("{tag} ");
        let mut untagged = Vec::new();
        loop {
            let line = self.read_response_line()?;
            if let Some(rest) = line.text.strip_prefix(&prefix) {
                let rest = rest.trim_end();
                let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
                let status = match word.to_ascii_uppercase().as_str() {
                    "OK" => Status::Ok,
                    "NO" => Status::No,
                    "BAD" => Status::Bad,
                    other => return Err(protocol_error(format!("unknown status {other}"))),
                };
                return Ok(Response {
                    untagged,
                    status,
                    text: text.to_string(),
                });
            }
            untagged.push(line);
        }
    }

    /// Read one logical line, pulling in `{n}` literals byte-exact.
    fn read_response_line(&mut self) -> Result<ResponseLine, ChannelError> {
        let mut line = ResponseLine::default();
        loop {
            let mut buf = Vec::new();
            let n = self.reader.read_until(b'\n', &mut buf).map_err(io_error)?;
            if n == 0 {
                return Err(protocol_error("IMAP connection closed"));
            }
            let text = String::from_utf8_lossy(&buf);
            match literal_len(&text) {
                Some((len, start)) => {
                    line.text.push_str(&text[..start]);
                    let mut literal = vec![0u8; len];
                    self.reader.read_exact(&mut literal).map_err(io_error)?;
                    line.literals.push(literal);
                }
                None => {
                    line.text.push_str(&text);
                    return Ok(line);
                }
            }
        }
    }
}

/// `(length, start of "{n}")` when the line ends by announcing a literal.
fn literal_len(line: &str) -> Option<(usize, usize)> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let body = trimmed.strip_suffix('}')?;
    let start = body.rfind('{')?;
    let len = body[start + 1..].trim_end_matches('+').parse().ok()?;
    Some((len, start))
}

/// Quote an IMAP string argument.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Mailbox name from `* LIST (<flags>) <delim> <name>`.
fn parse_list_name(line: &str) -> Option<String> {
    let rest = line.strip_prefix("* LIST ")?.trim_end();
    let rest = &rest[rest.find(')')? + 1..];
    let (_delimiter, rest) = next_token(rest)?;
    let (name, _) = next_token(rest)?;
    Some(name)
}

/// Next quoted string or atom, and the remainder.
fn next_token(input: &str) -> Option<(String, &str)> {
    let input = input.trim_start();
    if let Some(quoted) = input.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = quoted.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => value.push(chars.next()?.1),
                '"' => return Some((value, &quoted[i + 1..])),
                _ => value.push(c),
            }
        }
        None
    } else {
        let end = input.find(' ').unwrap_or(input.len());
        if end == 0 {
            return None;
        }
        Some((input[..end].to_string(), &input[end..]))
    }
}

// ── Message parsing ─────────────────────────────────────────────────

/// Parse an RFC 5322 message into a [`RawMessage`].
fn parse_message(id: &str, raw: &[u8]) -> Option<RawMessage> {
    let parsed = MessageParser::default().parse(raw)?;
    let sender = extract_sender(&parsed);
    let subject = parsed.subject().unwrap_or("(no subject)").to_string();
    let date = parsed.date().map(|d| d.to_rfc822()).unwrap_or_default();
    let body = extract_text(&parsed);
    Some(RawMessage::new(id, sender, subject, date, &body))
}

/// `Name <addr>` when a display name is present, else the bare address.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return "unknown".into();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".into(),
    }
}

/// Plain-text body, falling back to the HTML body with tags stripped.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.into_owned();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
