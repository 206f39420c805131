//! The default [`Watcher`](crate::Watcher): native file notification via
//! the `notify` crate where the host platform supports it (inotify,
//! FSEvents, ReadDirectoryChangesW), with [`NoopWatcher`] as the documented
//! fallback everywhere else.

use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;

use protocol::path::AbsPath;

use crate::Watcher;

/// Failure establishing or running a filesystem watch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The underlying `notify` backend could not be initialized or failed
    /// mid-watch.
    #[error("filesystem watch failed: {0}")]
    Backend(#[from] notify::Error),
    /// The event channel closed (the watcher was dropped from under us).
    #[error("filesystem watch channel closed")]
    ChannelClosed,
}

/// A [`Watcher`] that never reports a change. Used on platforms `notify`
/// does not support, and by tests that prefer to drive change detection
/// through the anti-entropy loop's periodic rescans alone rather than
/// through inotify/FSEvents timing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWatcher;

impl Watcher for NoopWatcher {
    fn watch(&self, _root: &AbsPath, _on_change: &mut dyn FnMut(AbsPath)) -> Result<(), WatchError> {
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }
}

/// The native-backend [`Watcher`], backed by `notify`'s recommended
/// platform watcher in recursive mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyWatcher;

impl Watcher for NotifyWatcher {
    fn watch(&self, root: &AbsPath, on_change: &mut dyn FnMut(AbsPath)) -> Result<(), WatchError> {
        use notify::Watcher as _;

        let (tx, rx) = mpsc::channel();
        let mut backend = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // The closure runs on the backend's own thread; forward
            // raw results and let the calling thread interpret them.
            let _ = tx.send(res);
        })?;
        backend.watch(root.as_path(), notify::RecursiveMode::Recursive)?;

        loop {
            match rx.recv() {
                Ok(Ok(event)) => {
                    for path in event.paths {
                        on_change(AbsPath::new(path));
                    }
                }
                Ok(Err(err)) => return Err(WatchError::Backend(err)),
                Err(_) => return Err(WatchError::ChannelClosed),
            }
        }
    }
}
