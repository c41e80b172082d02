// SPDX-License-Identifier: MIT
//! Mailbox event source.
//!
//! Polls a mailbox in bounded batches, stores every attachment through
//! the object store, publishes one created event per stored object, and
//! only then expunges the processed messages, so a crash between store
//! and expunge re-delivers (at-least-once) instead of losing mail.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::event::ChangeEvent;
use crate::mail::{MailboxSession, RawMessage};
use crate::publish::Publisher;
use crate::store::ObjectStore;

use super::WatchError;

/// Messages fetched per round-trip; bounds memory and request size.
pub const BATCH_SIZE: u32 = 100;

/// Seconds between polls once the mailbox is empty.
pub const DEFAULT_POLL_INTERVAL: u64 = 600;

const MAILBOX: &str = "INBOX";

/// An attachment lifted out of a MIME part, transfer-decoding applied.
struct Attachment {
    filename: String,
    data: Vec<u8>,
}

/// Polls a mailbox and forwards every stored attachment as an event.
pub struct MailWatcher<O, P> {
    bucket: String,
    poll_interval: Duration,
    store: Arc<O>,
    publisher: Arc<P>,
}

impl<O: ObjectStore, P: Publisher> MailWatcher<O, P> {
    pub fn new(
        bucket: impl Into<String>,
        poll_interval: Duration,
        store: Arc<O>,
        publisher: Arc<P>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            poll_interval,
            store,
            publisher,
        }
    }

    /// Alternate forever between draining the mailbox and sleeping.
    ///
    /// Session-level failures terminate the watcher; anything scoped to
    /// one message or one attachment is logged and skipped.
    pub async fn run<S: MailboxSession>(self, mut session: S) -> Result<(), WatchError> {
        loop {
            self.drain(&mut session).await?;
            debug!(secs = self.poll_interval.as_secs(), "mailbox empty — sleeping");
            sleep(self.poll_interval).await;
        }
    }

    /// Process batches until the mailbox reports zero messages, so a
    /// fast producer cannot grow the mailbox between polls.
    pub async fn drain<S: MailboxSession>(&self, session: &mut S) -> Result<(), WatchError> {
        loop {
            let count = session.select(MAILBOX).await?;
            if count == 0 {
                debug!("no messages to process");
                return Ok(());
            }
            let to = count.min(BATCH_SIZE);
            info!(count, batch = to, "processing mailbox batch");

            let messages = session.fetch_range(1, to).await?;
            for message in &messages {
                self.process_message(message).await;
            }

            // Deletion happens once per batch, and only after every
            // store/publish attempt in the batch has been made.
            session.delete_range(1, to).await?;
        }
    }

    /// Handle one message; never fails the batch.
    async fn process_message(&self, message: &RawMessage) {
        let parsed = match mailparse::parse_mail(&message.body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(seq = message.seq, err = %e, "unparseable message — skipping");
                return;
            }
        };
        log_headers(message.seq, &parsed);

        let mut attachments = Vec::new();
        collect_attachments(&parsed, &mut attachments);
        if attachments.is_empty() {
            debug!(seq = message.seq, "no attachments");
            return;
        }

        // Scratch directory scoped to this message; removed on drop,
        // success or failure.
        let scratch = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(seq = message.seq, err = %e, "no scratch directory — skipping message");
                return;
            }
        };
        for attachment in &attachments {
            if let Err(e) = self.save_and_publish(attachment, scratch.path()).await {
                warn!(
                    seq = message.seq,
                    filename = %attachment.filename,
                    err = %e,
                    "attachment skipped"
                );
            }
        }
    }

    /// Write the attachment to the scratch directory, upload it, and
    /// publish the created event.
    async fn save_and_publish(&self, attachment: &Attachment, scratch: &Path) -> anyhow::Result<()> {
        // Never let a crafted filename escape the scratch directory.
        let filename = Path::new(&attachment.filename)
            .file_name()
            .and_then(|n| n.to_str())
            .context("attachment filename unusable")?
            .to_string();
        let local = scratch.join(&filename);
        tokio::fs::write(&local, &attachment.data)
            .await
            .with_context(|| format!("save attachment to {}", local.display()))?;
        debug!(filename = %filename, local = %local.display(), "attachment saved");

        let key = format!("email/{filename}");
        let bytes = tokio::fs::read(&local)
            .await
            .with_context(|| format!("read back {}", local.display()))?;
        self.store
            .store(&self.bucket, &key, bytes)
            .await
            .with_context(|| format!("store {key}"))?;

        let event = ChangeEvent::for_attachment(&self.bucket, &filename, &local)?;
        self.publisher
            .publish(&event)
            .await
            .with_context(|| format!("publish {key}"))?;
        Ok(())
    }
}

/// Headers are informational only; a missing or malformed header never
/// fails the message.
fn log_headers(seq: u32, parsed: &ParsedMail<'_>) {
    debug!(
        seq,
        date = parsed.headers.get_first_value("Date").as_deref().unwrap_or("-"),
        from = parsed.headers.get_first_value("From").as_deref().unwrap_or("-"),
        to = parsed.headers.get_first_value("To").as_deref().unwrap_or("-"),
        subject = parsed.headers.get_first_value("Subject").as_deref().unwrap_or("-"),
        "processing message"
    );
}

/// Recursively walk the MIME tree and pull out every attachment part.
/// Undecodable or nameless parts are skipped, not fatal.
fn collect_attachments(part: &ParsedMail<'_>, out: &mut Vec<Attachment>) {
    let disposition = part.get_content_disposition();
    if disposition.disposition == DispositionType::Attachment {
        match (disposition.params.get("filename"), part.get_body_raw()) {
            (Some(filename), Ok(data)) => out.push(Attachment {
                filename: filename.clone(),
                data,
            }),
            (None, _) => debug!("attachment part without a filename — skipped"),
            (_, Err(e)) => warn!(err = %e, "undecodable attachment body — skipped"),
        }
    }
    for sub in &part.subparts {
        collect_attachments(sub, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventAction, EventSource};
    use crate::mail::MailError;
    use crate::publish::PublishError;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::sync::Mutex;

    fn message_with_attachment(filename: &str) -> Vec<u8> {
        format!(
            "From: sender@example.com\r\n\
             To: rcpt@example.com\r\n\
             Subject: photos\r\n\
             Date: Thu, 06 Aug 2026 10:00:00 +0000\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
             \r\n\
             --sep\r\n\
             Content-Type: text/plain\r\n\
             \r\n\
             see attached\r\n\
             --sep\r\n\
             Content-Type: image/jpeg\r\n\
             Content-Disposition: attachment; filename=\"{filename}\"\r\n\
             Content-Transfer-Encoding: base64\r\n\
             \r\n\
             anBlZ2RhdGE=\r\n\
             --sep--\r\n"
        )
        .into_bytes()
    }

    struct FakeSession {
        messages: Vec<Vec<u8>>,
        fetches: Vec<(u32, u32)>,
        deletes: Vec<(u32, u32)>,
    }

    impl FakeSession {
        fn with_messages(messages: Vec<Vec<u8>>) -> Self {
            Self {
                messages,
                fetches: Vec::new(),
                deletes: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl MailboxSession for FakeSession {
        async fn select(&mut self, _mailbox: &str) -> Result<u32, MailError> {
            Ok(self.messages.len() as u32)
        }

        async fn fetch_range(&mut self, from: u32, to: u32) -> Result<Vec<RawMessage>, MailError> {
            self.fetches.push((from, to));
            Ok(self.messages[(from - 1) as usize..to as usize]
                .iter()
                .enumerate()
                .map(|(i, body)| RawMessage {
                    seq: from + i as u32,
                    body: body.clone(),
                })
                .collect())
        }

        async fn delete_range(&mut self, from: u32, to: u32) -> Result<(), MailError> {
            self.deletes.push((from, to));
            self.messages.drain((from - 1) as usize..to as usize);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeStore {
        stored: Mutex<Vec<(String, String, Vec<u8>)>>,
        fail_key: Option<String>,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn store(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
            if self.fail_key.as_deref() == Some(key) {
                return Err(StoreError::InvalidPath {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    source: url::ParseError::EmptyHost,
                });
            }
            self.stored
                .lock()
                .await
                .push((bucket.to_string(), key.to_string(), bytes));
            Ok(())
        }
    }

    struct ChannelPublisher(mpsc::UnboundedSender<ChangeEvent>);

    #[async_trait]
    impl Publisher for ChannelPublisher {
        async fn publish(&self, event: &ChangeEvent) -> Result<(), PublishError> {
            self.0.send(event.clone()).map_err(|_| PublishError::Shutdown)
        }

        async fn close(&self) -> Result<(), PublishError> {
            Ok(())
        }
    }

    fn watcher(
        bucket: &str,
        store: Arc<FakeStore>,
    ) -> (
        MailWatcher<FakeStore, ChannelPublisher>,
        mpsc::UnboundedReceiver<ChangeEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = MailWatcher::new(
            bucket,
            Duration::from_secs(DEFAULT_POLL_INTERVAL),
            store,
            Arc::new(ChannelPublisher(tx)),
        );
        (watcher, rx)
    }

    #[tokio::test]
    async fn stores_and_publishes_one_attachment() {
        let store = Arc::new(FakeStore::default());
        let (watcher, mut rx) = watcher("media", Arc::clone(&store));
        let mut session = FakeSession::with_messages(vec![message_with_attachment("photo.jpg")]);

        watcher.drain(&mut session).await.unwrap();

        let stored = store.stored.lock().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, "media");
        assert_eq!(stored[0].1, "email/photo.jpg");
        assert_eq!(stored[0].2, b"jpegdata");

        let event = rx.try_recv().unwrap();
        assert_eq!(event.bucket, "media");
        assert_eq!(event.key, "email/photo.jpg");
        assert_eq!(event.action, EventAction::Created);
        assert_eq!(event.source, EventSource::Mailbox);

        assert_eq!(session.deletes, vec![(1, 1)]);
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn drains_large_mailbox_in_capped_batches() {
        let store = Arc::new(FakeStore::default());
        let (watcher, mut rx) = watcher("media", Arc::clone(&store));
        let messages = (0..150)
            .map(|i| message_with_attachment(&format!("file{i}.bin")))
            .collect();
        let mut session = FakeSession::with_messages(messages);

        watcher.drain(&mut session).await.unwrap();

        assert_eq!(session.fetches, vec![(1, 100), (1, 50)]);
        assert_eq!(session.deletes, vec![(1, 100), (1, 50)]);
        assert!(session.messages.is_empty());
        assert_eq!(store.stored.lock().await.len(), 150);

        let mut published = 0;
        while rx.try_recv().is_ok() {
            published += 1;
        }
        assert_eq!(published, 150);
    }

    #[tokio::test]
    async fn malformed_message_does_not_fail_the_batch() {
        let store = Arc::new(FakeStore::default());
        let (watcher, mut rx) = watcher("media", Arc::clone(&store));
        let mut session = FakeSession::with_messages(vec![
            b"\xff\xfe not a mime message at all".to_vec(),
            message_with_attachment("ok.jpg"),
        ]);

        watcher.drain(&mut session).await.unwrap();

        // The good message was still processed and both were expunged.
        assert_eq!(store.stored.lock().await.len(), 1);
        assert_eq!(rx.try_recv().unwrap().key, "email/ok.jpg");
        assert_eq!(session.deletes, vec![(1, 2)]);
    }

    #[tokio::test]
    async fn store_failure_skips_only_that_attachment() {
        let store = Arc::new(FakeStore {
            fail_key: Some("email/bad.jpg".to_string()),
            ..FakeStore::default()
        });
        let (watcher, mut rx) = watcher("media", Arc::clone(&store));
        let mut session = FakeSession::with_messages(vec![
            message_with_attachment("bad.jpg"),
            message_with_attachment("good.jpg"),
        ]);

        watcher.drain(&mut session).await.unwrap();

        let stored = store.stored.lock().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1, "email/good.jpg");

        // No event for the failed attachment.
        assert_eq!(rx.try_recv().unwrap().key, "email/good.jpg");
        assert!(rx.try_recv().is_err());

        // The message is still expunged: re-delivery is not attempted
        // for individual attachment failures.
        assert_eq!(session.deletes, vec![(1, 2)]);
    }

    #[tokio::test]
    async fn message_without_attachments_is_just_expunged() {
        let store = Arc::new(FakeStore::default());
        let (watcher, mut rx) = watcher("media", Arc::clone(&store));
        let plain = b"From: a@b.c\r\nSubject: hi\r\n\r\njust text\r\n".to_vec();
        let mut session = FakeSession::with_messages(vec![plain]);

        watcher.drain(&mut session).await.unwrap();

        assert!(store.stored.lock().await.is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(session.deletes, vec![(1, 1)]);
    }

    #[test]
    fn attachment_extraction_finds_nested_parts() {
        let raw = message_with_attachment("photo.jpg");
        let parsed = mailparse::parse_mail(&raw).unwrap();
        let mut out = Vec::new();
        collect_attachments(&parsed, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].filename, "photo.jpg");
        assert_eq!(out[0].data, b"jpegdata");
    }
}
