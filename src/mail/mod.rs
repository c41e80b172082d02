//! Mailbox session capability.
//!
//! The mailbox watcher only ever talks to [`MailboxSession`], a narrow
//! select / fetch-range / delete-range surface. Protocol mechanics live
//! in the [`imap`] adapter; tests plug in fakes.

use async_trait::async_trait;
use thiserror::Error;

pub mod imap;

pub use imap::ImapMailbox;

/// One message pulled from the mailbox, as raw RFC 822 bytes.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// 1-based sequence number within the selected mailbox.
    pub seq: u32,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("could not reach {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        host: String,
        #[source]
        source: async_native_tls::Error,
    },

    #[error("login rejected for {user}")]
    Auth {
        user: String,
        #[source]
        source: async_imap::error::Error,
    },

    #[error(transparent)]
    Protocol(#[from] async_imap::error::Error),
}

/// Narrow mailbox capability consumed by the watcher.
///
/// Ranges are 1-based and inclusive, matching mailbox sequence-number
/// semantics.
#[async_trait]
pub trait MailboxSession: Send {
    /// Select a mailbox and report how many messages it holds.
    async fn select(&mut self, mailbox: &str) -> Result<u32, MailError>;

    /// Fetch full bodies for a sequence range.
    async fn fetch_range(&mut self, from: u32, to: u32) -> Result<Vec<RawMessage>, MailError>;

    /// Flag a sequence range deleted and expunge it.
    async fn delete_range(&mut self, from: u32, to: u32) -> Result<(), MailError>;
}
