//! Event sources: long-lived watchers that feed the publisher.

use thiserror::Error;

use crate::mail::MailError;

pub mod fs;
pub mod mail;

pub use fs::FsWatcher;
pub use mail::MailWatcher;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to start filesystem watcher: {0}")]
    Init(#[from] notify::Error),

    #[error(transparent)]
    Mail(#[from] MailError),
}
