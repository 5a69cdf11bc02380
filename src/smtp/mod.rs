//! # Mock SMTP Server
//!
//! The backend sends verification, welcome and 2FA mail through an SMTP relay.
//! In tests the relay is [`SmtpServerMock`]: it accepts every message and
//! appends it to a [`Mailbox`] that scenarios poll with [`await_mail`].
//!
//! The mailbox is owned by whoever starts the server and shared with the
//! accept loop through an `Arc`; nothing is ever removed from it, so
//! repeated polls only ever see the list grow.

mod server;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::errors::Result;
use crate::poll::{await_condition, PollPolicy, Probe};

pub use server::SmtpServerMock;

/// One accepted mail transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Envelope sender (`MAIL FROM`)
    pub mail_from: String,
    /// Envelope recipients (`RCPT TO`), in the order given
    pub rcpt_tos: Vec<String>,
    /// Message content after dot-unstuffing, lines joined by `\n`
    pub data: Vec<u8>,
}

impl Message {
    pub fn is_for(&self, recipient: &str) -> bool {
        self.rcpt_tos.iter().any(|r| r.eq_ignore_ascii_case(recipient))
    }

    /// Content decoded lossily as UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Append-only list of received messages shared between the server and tests
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, message: Message) {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        messages.push(message);
    }

    /// Copy of every message received so far
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Messages with `recipient` among their envelope recipients
    pub fn filtered_messages(&self, recipient: &str) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.is_for(recipient))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wait until at least one message for `recipient` has arrived and return all
/// of them.
pub async fn await_mail(
    mailbox: &Mailbox,
    recipient: &str,
    timeout: Duration,
) -> Result<Vec<Message>> {
    let policy = PollPolicy::mail_delivery(format!("mail to {recipient}")).with_timeout(timeout);

    await_condition(&policy, || async move {
        let messages = mailbox.filtered_messages(recipient);
        debug!(recipient, matched = messages.len(), total = mailbox.len(), "checked mailbox");
        Ok(if messages.is_empty() { Probe::Pending } else { Probe::Ready(messages) })
    })
    .await
}
