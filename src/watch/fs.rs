// SPDX-License-Identifier: MIT
//! Filesystem event source.
//!
//! Walks the watched root once, keeps a live set of per-directory
//! watches, and turns raw notifications into published change events.
//! Directories are watched one level deep each; recursion comes from
//! registering a new watch whenever a directory appears. Notifications
//! are never debounced or coalesced: one event per notification.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{AccessKind, AccessMode, EventKind};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::event::{ChangeEvent, EventAction};
use crate::publish::Publisher;

use super::WatchError;

/// Buffer between the notify callback thread and the async event loop.
const EVENT_BUFFER: usize = 1024;

/// What a raw notification means for the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classified {
    /// A path was created or finished being written.
    Created,
    /// A path went away.
    Removed,
}

fn classify(kind: &EventKind) -> Option<Classified> {
    match kind {
        EventKind::Create(_) => Some(Classified::Created),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(Classified::Created),
        EventKind::Remove(_) => Some(Classified::Removed),
        _ => None,
    }
}

/// Watches a directory tree and publishes one event per notification.
pub struct FsWatcher<P> {
    root: PathBuf,
    bucket: String,
    publisher: Arc<P>,
}

impl<P: Publisher> FsWatcher<P> {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>, publisher: Arc<P>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            publisher,
        }
    }

    /// Walk the root, arm the watches, and run the event loop until the
    /// notification channel closes.
    pub async fn run(self) -> Result<(), WatchError> {
        let (tx, mut rx) = mpsc::channel::<Result<Event, notify::Error>>(EVENT_BUFFER);

        // notify callbacks run on a notify-internal thread; forward
        // them into the async loop.
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.blocking_send(res);
            },
            Config::default(),
        )?;

        let mut watched: HashSet<PathBuf> = HashSet::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_dir() {
                add_watch(&mut watcher, &mut watched, entry.path());
            }
        }
        info!(root = %self.root.display(), dirs = watched.len(), "filesystem watcher started");

        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) => self.handle(&mut watcher, &mut watched, event).await,
                // Transient backend errors must not kill the watcher.
                Err(e) => warn!(err = %e, "watch backend error"),
            }
        }
        Ok(())
    }

    async fn handle(
        &self,
        watcher: &mut RecommendedWatcher,
        watched: &mut HashSet<PathBuf>,
        event: Event,
    ) {
        let Some(class) = classify(&event.kind) else {
            return;
        };
        for path in event.paths {
            match class {
                Classified::Created => self.handle_created(watcher, watched, &path).await,
                Classified::Removed => self.handle_removed(watcher, watched, &path).await,
            }
        }
    }

    async fn handle_created(
        &self,
        watcher: &mut RecommendedWatcher,
        watched: &mut HashSet<PathBuf>,
        path: &Path,
    ) {
        match std::fs::metadata(path) {
            // New directory: watch it so changes to its children are
            // seen. No event is published for the directory itself.
            Ok(meta) if meta.is_dir() => add_watch(watcher, watched, path),
            Ok(meta) if meta.is_file() => self.publish(EventAction::Created, path).await,
            // Sockets and fifos are not objects.
            Ok(_) => {}
            Err(e) => {
                debug!(path = %path.display(), err = %e, "created path vanished before stat");
            }
        }
    }

    async fn handle_removed(
        &self,
        watcher: &mut RecommendedWatcher,
        watched: &mut HashSet<PathBuf>,
        path: &Path,
    ) {
        self.publish(EventAction::Removed, path).await;
        if watched.remove(path) {
            // The OS usually dropped the watch with the directory;
            // a failing unwatch here is expected.
            if let Err(e) = watcher.unwatch(path) {
                debug!(path = %path.display(), err = %e, "unwatch after removal");
            }
            debug!(path = %path.display(), "directory unwatched");
        }
    }

    /// One bad event must not stop the stream: construction and publish
    /// failures are logged and dropped.
    async fn publish(&self, action: EventAction, path: &Path) {
        let event = match ChangeEvent::for_path(action, &self.bucket, &self.root, path) {
            Ok(event) => event,
            Err(e) => {
                warn!(path = %path.display(), err = %e, "dropping unpublishable event");
                return;
            }
        };
        debug!(key = %event.key, action = %event.action, "filesystem change");
        if let Err(e) = self.publisher.publish(&event).await {
            warn!(key = %event.key, err = %e, "publish failed — event dropped");
        }
    }
}

/// Insert a directory into the watch set. Idempotent: re-adding an
/// already-watched directory is a no-op.
fn add_watch(watcher: &mut RecommendedWatcher, watched: &mut HashSet<PathBuf>, path: &Path) {
    if !watched.insert(path.to_path_buf()) {
        return;
    }
    if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
        warn!(path = %path.display(), err = %e, "could not watch directory");
        watched.remove(path);
    } else {
        debug!(path = %path.display(), "watching directory");
    }
}
