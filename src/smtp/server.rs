//! SMTP accept loop and session state machine
//!
//! Implements the subset of RFC 5321 a mail library uses to relay one or more
//! messages: greeting, EHLO/HELO, MAIL, RCPT, DATA, RSET, NOOP, VRFY and QUIT.
//! No authentication, no TLS, and every message is accepted.

use std::net::SocketAddr;

use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn, Instrument};

use super::{Mailbox, Message};
use crate::errors::{Error, Result};

const HOSTNAME: &str = "mender-e2e";

/// Longest accepted command line; RFC 5321 allows 512, extensions add parameters
const MAX_COMMAND_LINE: usize = 1024;

/// Largest accepted message body
const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Handle to a running mock SMTP server.
///
/// Dropping the handle stops the accept loop and any open sessions.
pub struct SmtpServerMock {
    local_addr: SocketAddr,
    mailbox: Mailbox,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SmtpServerMock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpServerMock")
            .field("local_addr", &self.local_addr)
            .field("messages", &self.mailbox.len())
            .finish()
    }
}

impl SmtpServerMock {
    /// Bind `addr` and start accepting connections on a background task
    pub async fn start<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        Self::start_with_mailbox(addr, Mailbox::new()).await
    }

    /// Like [`start`](Self::start), appending to an existing mailbox
    pub async fn start_with_mailbox<A: ToSocketAddrs>(addr: A, mailbox: Mailbox) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!(addr = %local_addr, "Starting mock SMTP server");
        let handle = tokio::spawn(accept_loop(listener, mailbox.clone(), shutdown_rx));

        Ok(Self { local_addr, mailbox, shutdown: Some(shutdown_tx), handle: Some(handle) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle to the received messages
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn filtered_messages(&self, recipient: &str) -> Vec<Message> {
        self.mailbox.filtered_messages(recipient)
    }

    /// Stop accepting connections and wait for the accept loop to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "SMTP accept loop ended abnormally");
                }
            }
        }
        info!(addr = %self.local_addr, received = self.mailbox.len(), "Mock SMTP server stopped");
    }
}

impl Drop for SmtpServerMock {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, mailbox: Mailbox, mut shutdown: oneshot::Receiver<()>) {
    // Sessions die with the loop when the set is dropped
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "SMTP connection accepted");
                    let mailbox = mailbox.clone();
                    let span = tracing::debug_span!("smtp_session", %peer);
                    sessions.spawn(
                        async move {
                            if let Err(e) = handle_session(stream, &mailbox).await {
                                warn!(error = %e, "SMTP session aborted");
                            }
                        }
                        .instrument(span),
                    );
                }
                Err(e) => warn!(error = %e, "Failed to accept SMTP connection"),
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    greeted: bool,
    extended: bool,
    mail_from: Option<String>,
    rcpt_tos: Vec<String>,
}

impl Session {
    fn reset(&mut self) {
        self.mail_from = None;
        self.rcpt_tos.clear();
    }
}

/// What the session loop should do after a command
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Reply(String),
    ReadData,
    Quit,
}

fn reply(text: impl Into<String>) -> Action {
    Action::Reply(text.into())
}

/// Run one SMTP conversation to completion
pub(crate) async fn handle_session<S>(stream: S, mailbox: &Mailbox) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut session = Session::default();
    let mut line = Vec::new();

    write_reply(&mut writer, &format!("220 {HOSTNAME} mock SMTP service ready")).await?;

    loop {
        match read_line(&mut reader, &mut line, MAX_COMMAND_LINE).await? {
            LineRead::Complete => {}
            LineRead::Closed => {
                debug!("client closed connection");
                return Ok(());
            }
            LineRead::TooLong => {
                // The rest of the line is unread, so the session cannot resync
                warn!(limit = MAX_COMMAND_LINE, "command line too long, closing session");
                write_reply(&mut writer, "500 Error: line too long").await?;
                return Ok(());
            }
        }
        let command = String::from_utf8_lossy(trim_line_ending(&line)).into_owned();

        match process_command(&mut session, &command) {
            Action::Reply(text) => write_reply(&mut writer, &text).await?,
            Action::Quit => {
                write_reply(&mut writer, "221 Bye").await?;
                return Ok(());
            }
            Action::ReadData => {
                write_reply(&mut writer, "354 End data with <CR><LF>.<CR><LF>").await?;
                let Some(data) = read_data(&mut reader, MAX_MESSAGE_SIZE).await? else {
                    warn!(limit = MAX_MESSAGE_SIZE, "message too large, closing session");
                    write_reply(&mut writer, "552 Error: Too much mail data").await?;
                    return Ok(());
                };
                let message = Message {
                    mail_from: session.mail_from.take().unwrap_or_default(),
                    rcpt_tos: std::mem::take(&mut session.rcpt_tos),
                    data,
                };
                info!(
                    from = %message.mail_from,
                    to = ?message.rcpt_tos,
                    bytes = message.data.len(),
                    "Received message"
                );
                mailbox.push(message);
                write_reply(&mut writer, "250 OK").await?;
            }
        }
    }
}

fn process_command(session: &mut Session, line: &str) -> Action {
    let (verb, arg) = match line.split_once(' ') {
        Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
        None => (line.trim().to_ascii_uppercase(), ""),
    };

    match verb.as_str() {
        "" => reply("500 Error: bad syntax"),
        "HELO" | "EHLO" => {
            if arg.is_empty() {
                return reply(format!("501 Syntax: {verb} hostname"));
            }
            if session.greeted {
                return reply("503 Duplicate HELO/EHLO");
            }
            session.greeted = true;
            session.extended = verb == "EHLO";
            session.reset();
            if session.extended {
                reply(format!("250-{HOSTNAME}\r\n250-8BITMIME\r\n250-SMTPUTF8\r\n250 HELP"))
            } else {
                reply(format!("250 {HOSTNAME}"))
            }
        }
        "NOOP" => reply("250 OK"),
        "QUIT" => Action::Quit,
        "RSET" => {
            session.reset();
            reply("250 OK")
        }
        "VRFY" => {
            if arg.is_empty() {
                reply("501 Syntax: VRFY <address>")
            } else {
                reply("252 Cannot VRFY user, but will accept message and attempt delivery")
            }
        }
        "MAIL" => {
            if !session.greeted {
                return reply("503 Error: send HELO first");
            }
            if session.mail_from.is_some() {
                return reply("503 Error: nested MAIL command");
            }
            let Some(rest) = strip_keyword(arg, "FROM:") else {
                return reply("501 Syntax: MAIL FROM:<address>");
            };
            let (address, params) = split_address(rest);
            let Some(address) = address else {
                return reply("501 Syntax: MAIL FROM:<address>");
            };
            if !params.is_empty() && !session.extended {
                return reply("501 Syntax: MAIL FROM:<address>");
            }
            if params.iter().any(|p| !mail_param_supported(p)) {
                return reply("555 MAIL FROM parameters not recognized or not implemented");
            }
            session.mail_from = Some(address);
            reply("250 OK")
        }
        "RCPT" => {
            if !session.greeted {
                return reply("503 Error: send HELO first");
            }
            if session.mail_from.is_none() {
                return reply("503 Error: need MAIL command");
            }
            let Some(rest) = strip_keyword(arg, "TO:") else {
                return reply("501 Syntax: RCPT TO: <address>");
            };
            let (address, params) = split_address(rest);
            let Some(address) = address else {
                return reply("501 Syntax: RCPT TO: <address>");
            };
            if !params.is_empty() {
                return reply("555 RCPT TO parameters not recognized or not implemented");
            }
            session.rcpt_tos.push(address);
            reply("250 OK")
        }
        "DATA" => {
            if !session.greeted {
                return reply("503 Error: send HELO first");
            }
            if session.rcpt_tos.is_empty() {
                return reply("503 Error: need RCPT command");
            }
            if !arg.is_empty() {
                return reply("501 Syntax: DATA");
            }
            Action::ReadData
        }
        _ => reply(format!("500 Error: command \"{verb}\" not recognized")),
    }
}

fn strip_keyword<'a>(arg: &'a str, keyword: &str) -> Option<&'a str> {
    let head = arg.get(..keyword.len())?;
    if head.eq_ignore_ascii_case(keyword) {
        Some(arg[keyword.len()..].trim_start())
    } else {
        None
    }
}

/// Split `<addr> PARAM PARAM` into the bare address and its parameters
fn split_address(rest: &str) -> (Option<String>, Vec<&str>) {
    let mut parts = rest.split_whitespace();
    let address = parts.next().map(|a| a.trim_start_matches('<').trim_end_matches('>').to_string());
    let address = address.filter(|a| !a.is_empty() || rest.starts_with("<>"));
    (address, parts.collect())
}

fn mail_param_supported(param: &str) -> bool {
    let (key, value) = param.split_once('=').unwrap_or((param, ""));
    match key.to_ascii_uppercase().as_str() {
        "SMTPUTF8" => value.is_empty(),
        "BODY" => matches!(value.to_ascii_uppercase().as_str(), "7BIT" | "8BITMIME"),
        "SIZE" => value.parse::<u64>().is_ok(),
        _ => false,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Complete,
    Closed,
    TooLong,
}

/// Read one line of at most `limit` bytes into `line`
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *reader).take(limit as u64).read_until(b'\n', line).await?;
    if read == 0 {
        Ok(LineRead::Closed)
    } else if read == limit && !line.ends_with(b"\n") {
        Ok(LineRead::TooLong)
    } else {
        Ok(LineRead::Complete)
    }
}

/// Read a dot-terminated message body; `None` once it exceeds `limit` bytes
async fn read_data<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines: Vec<Vec<u8>> = Vec::new();
    let mut line = Vec::new();
    let mut size = 0usize;

    loop {
        // Room for the terminating ".\r\n" even when the budget is spent
        let budget = limit - size + 3;
        match read_line(reader, &mut line, budget).await? {
            LineRead::Complete => {}
            LineRead::Closed => return Err(Error::smtp("connection closed during DATA")),
            LineRead::TooLong => return Ok(None),
        }
        let content = trim_line_ending(&line);
        if content == b"." {
            break;
        }
        let content = content.strip_prefix(b".").unwrap_or(content);
        size += content.len() + 1;
        if size > limit {
            return Ok(None);
        }
        lines.push(content.to_vec());
    }

    Ok(Some(lines.join(&b'\n')))
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await?;
    Ok(())
}
