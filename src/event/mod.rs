// SPDX-License-Identifier: MIT
//! Canonical change-event record shared by every watcher and sink.
//!
//! A [`ChangeEvent`] describes one detected create/remove of a logical
//! object: which source saw it, the destination bucket, and the URL-safe
//! key the object lives under. Events are immutable once constructed and
//! serialize losslessly to JSON for the broker wire.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which source produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Filesystem,
    Mailbox,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSource::Filesystem => write!(f, "filesystem"),
            EventSource::Mailbox => write!(f, "mailbox"),
        }
    }
}

/// What happened to the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Created,
    Removed,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventAction::Created => write!(f, "created"),
            EventAction::Removed => write!(f, "removed"),
        }
    }
}

/// Errors constructing an event. Invalid events are dropped, never
/// retried.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("bucket name is empty")]
    EmptyBucket,

    #[error("{path} is outside the watched root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("{0} has no key relative to the watched root")]
    EmptyKey(PathBuf),

    #[error("no usable file name in {0}")]
    BadFileName(PathBuf),
}

/// One detected change to a logical object.
///
/// `key` is the escaped path of the object inside `bucket` and is what
/// downstream consumers see; `source_path` is the local origin and is
/// only ever used for local I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub source: EventSource,
    pub action: EventAction,
    pub bucket: String,
    pub key: String,
    pub source_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an event for a path under a watched filesystem root.
    ///
    /// The key is the path relative to `root`, escaped per segment so
    /// separators survive: `root/sub dir/a.txt` → `sub%20dir/a.txt`.
    pub fn for_path(
        action: EventAction,
        bucket: &str,
        root: &Path,
        path: &Path,
    ) -> Result<Self, EventError> {
        if bucket.is_empty() {
            return Err(EventError::EmptyBucket);
        }
        let relative = path
            .strip_prefix(root)
            .map_err(|_| EventError::OutsideRoot {
                path: path.to_path_buf(),
                root: root.to_path_buf(),
            })?;
        if relative.as_os_str().is_empty() {
            return Err(EventError::EmptyKey(path.to_path_buf()));
        }
        Ok(Self {
            source: EventSource::Filesystem,
            action,
            bucket: bucket.to_string(),
            key: escape_key(relative),
            source_path: path.to_path_buf(),
            timestamp: Utc::now(),
        })
    }

    /// Build an event for a stored mail attachment.
    ///
    /// The key is `email/<filename>`, matching where the object store
    /// put the attachment; `local` is the scratch file it was saved to.
    pub fn for_attachment(
        bucket: &str,
        filename: &str,
        local: &Path,
    ) -> Result<Self, EventError> {
        if bucket.is_empty() {
            return Err(EventError::EmptyBucket);
        }
        if filename.is_empty() {
            return Err(EventError::BadFileName(local.to_path_buf()));
        }
        Ok(Self {
            source: EventSource::Mailbox,
            action: EventAction::Created,
            bucket: bucket.to_string(),
            key: format!("email/{}", urlencoding::encode(filename)),
            source_path: local.to_path_buf(),
            timestamp: Utc::now(),
        })
    }
}

/// Escape a relative path for transport: each segment percent-encoded,
/// `/` separators preserved.
fn escape_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| urlencoding::encode(&c.as_os_str().to_string_lossy()).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
