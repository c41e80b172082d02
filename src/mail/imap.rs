// SPDX-License-Identifier: MIT
//! IMAP adapter for the mailbox session capability.
//!
//! Implicit TLS only: TCP, TLS handshake, LOGIN. Everything here speaks
//! blocking-free async IMAP; fetch/store/expunge responses arrive as
//! streams and are drained before the next command.

use async_imap::Session;
use async_native_tls::{TlsConnector, TlsStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{MailError, MailboxSession, RawMessage};

// An IMAP session is generic over its transport; ours is always
// TLS-encrypted TCP.
type TlsSession = Session<TlsStream<TcpStream>>;

/// Production mailbox session speaking IMAP over implicit TLS.
pub struct ImapMailbox {
    session: TlsSession,
}

impl ImapMailbox {
    /// Dial, negotiate TLS, and log in.
    ///
    /// Failures here are fatal to the mailbox watcher: no retry, the
    /// caller is expected to exit.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
    ) -> Result<Self, MailError> {
        info!(host = %host, port = port, "connecting to mail server");
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|source| MailError::Connect {
                host: host.to_string(),
                port,
                source,
            })?;
        let stream = TlsConnector::new()
            .connect(host, tcp)
            .await
            .map_err(|source| MailError::Tls {
                host: host.to_string(),
                source,
            })?;

        let client = async_imap::Client::new(stream);
        let session = client
            .login(user, password)
            .await
            .map_err(|(source, _)| MailError::Auth {
                user: user.to_string(),
                source,
            })?;
        info!(user = %user, "mail login ok");
        Ok(Self { session })
    }
}

#[async_trait]
impl MailboxSession for ImapMailbox {
    async fn select(&mut self, mailbox: &str) -> Result<u32, MailError> {
        let status = self.session.select(mailbox).await?;
        Ok(status.exists)
    }

    async fn fetch_range(&mut self, from: u32, to: u32) -> Result<Vec<RawMessage>, MailError> {
        let range = format!("{from}:{to}");
        let mut messages = Vec::new();
        {
            let fetches = self.session.fetch(&range, "RFC822").await?;
            futures_util::pin_mut!(fetches);
            while let Some(fetch) = fetches.next().await {
                let fetch = fetch?;
                let Some(body) = fetch.body() else {
                    debug!(seq = fetch.message, "message has no body — skipping");
                    continue;
                };
                messages.push(RawMessage {
                    seq: fetch.message,
                    body: body.to_vec(),
                });
            }
        }
        debug!(range = %range, fetched = messages.len(), "fetched mailbox range");
        Ok(messages)
    }

    async fn delete_range(&mut self, from: u32, to: u32) -> Result<(), MailError> {
        let range = format!("{from}:{to}");
        {
            let flagged = self.session.store(&range, "+FLAGS (\\Deleted)").await?;
            futures_util::pin_mut!(flagged);
            while let Some(item) = flagged.next().await {
                item?;
            }
        }
        {
            let expunged = self.session.expunge().await?;
            futures_util::pin_mut!(expunged);
            while let Some(item) = expunged.next().await {
                item?;
            }
        }
        debug!(range = %range, "expunged mailbox range");
        Ok(())
    }
}
