use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::WatchError;
use super::store::StatementStore;

/// Definition file change, as delivered to the apply task
#[derive(Debug, PartialEq, Clone)]
pub enum WatchEvent {
    /// File created or modified
    Changed(PathBuf),
    /// File removed or renamed away
    Removed(PathBuf),
    /// Re-read every root from disk
    Rescan,
}

/// Requests a full rescan from outside the watcher (admin endpoint, CLI)
#[derive(Clone)]
pub struct RescanHandle {
    events: mpsc::Sender<WatchEvent>,
    overflow: Arc<AtomicBool>,
}

impl RescanHandle {
    pub fn request(&self) {
        queue(&self.events, &self.overflow, WatchEvent::Rescan);
    }
}

/// Keeps the statement store in sync with the definition files on disk.
///
/// The notify callback only classifies events and queues them on a bounded
/// channel; parsing happens on a separate apply task. When the channel fills
/// up, or notify reports an error, the next event triggers a full rescan
/// instead.
pub struct DefinitionWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::Sender<WatchEvent>,
    overflow: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl DefinitionWatcher {
    /// Start watching every root of `store`. Must be called inside a tokio runtime.
    pub fn start(store: Arc<StatementStore>, capacity: usize) -> Result<Self, WatchError> {
        let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
        let overflow = Arc::new(AtomicBool::new(false));

        let callback_tx = event_tx.clone();
        let callback_overflow = Arc::clone(&overflow);
        let ext = store.ext().to_string();

        let mut watcher = notify::recommended_watcher(move |res: NotifyResult<Event>| match res {
            Ok(event) => {
                for classified in classify(&event, &ext) {
                    queue(&callback_tx, &callback_overflow, classified);
                }
            }
            Err(e) => {
                error!("Statement watch error: {}", e);
                callback_overflow.store(true, Ordering::SeqCst);
                queue(&callback_tx, &callback_overflow, WatchEvent::Rescan);
            }
        })?;

        for (alias, dir) in store.roots() {
            if !dir.is_dir() {
                return Err(WatchError::Root {
                    alias: alias.clone(),
                    path: dir.clone(),
                    reason: "not a directory".to_string(),
                });
            }
            debug!("Watching statement root {} at {}", alias, dir.display());
            watcher.watch(dir, RecursiveMode::Recursive)?;
        }

        let task = tokio::spawn(apply_loop(store, event_rx, Arc::clone(&overflow)));
        info!("Statement watcher started");

        Ok(Self {
            _watcher: watcher,
            events: event_tx,
            overflow,
            task,
        })
    }

    pub fn rescan_handle(&self) -> RescanHandle {
        RescanHandle {
            events: self.events.clone(),
            overflow: Arc::clone(&self.overflow),
        }
    }

    /// Stop notification delivery and the apply task
    pub fn shutdown(self) {
        info!("Statement watcher stopped");
    }
}

impl Drop for DefinitionWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn queue(events: &mpsc::Sender<WatchEvent>, overflow: &AtomicBool, event: WatchEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(dropped)) => {
            warn!("Statement watch queue full, dropping {:?}; a rescan will follow", dropped);
            overflow.store(true, Ordering::SeqCst);
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Turn a notify event into watch events. Directory-level changes cannot be
/// attributed to single definitions and become a rescan. Directories are told
/// apart by event kind or by what is on disk, never by their name.
fn classify(event: &Event, ext: &str) -> Vec<WatchEvent> {
    let mut out = Vec::new();
    let rescan = |out: &mut Vec<WatchEvent>| {
        if !out.contains(&WatchEvent::Rescan) {
            out.push(WatchEvent::Rescan);
        }
    };

    for path in &event.paths {
        let is_statement = path.extension().map_or(false, |e| e == ext) && !path.is_dir();
        match event.kind {
            EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => rescan(&mut out),
            EventKind::Create(_) if path.is_dir() => rescan(&mut out),
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any)
                if is_statement =>
            {
                out.push(WatchEvent::Changed(path.clone()));
            }
            // Rename halves arrive as separate events; existence decides add vs remove
            EventKind::Modify(ModifyKind::Name(_)) if is_statement => {
                out.push(WatchEvent::Changed(path.clone()));
            }
            // A renamed directory may carry definitions in or out of a root
            EventKind::Modify(ModifyKind::Name(_)) => rescan(&mut out),
            EventKind::Remove(_) if is_statement => {
                out.push(WatchEvent::Removed(path.clone()));
            }
            _ => {}
        }
    }
    out
}

async fn apply_loop(store: Arc<StatementStore>, mut events: mpsc::Receiver<WatchEvent>, overflow: Arc<AtomicBool>) {
    while let Some(event) = events.recv().await {
        let event = if overflow.swap(false, Ordering::SeqCst) {
            WatchEvent::Rescan
        } else {
            event
        };

        let store = Arc::clone(&store);
        if let Err(e) = tokio::task::spawn_blocking(move || apply_event(&store, &event)).await {
            error!("Statement reload task failed: {}", e);
        }
    }
    debug!("Statement watch channel closed");
}

/// Apply one event to the store. File existence decides between reload and
/// removal, which also covers renames delivered as two separate events.
pub fn apply_event(store: &StatementStore, event: &WatchEvent) {
    let path = match event {
        WatchEvent::Rescan => {
            store.scan();
            return;
        }
        WatchEvent::Changed(path) | WatchEvent::Removed(path) => path,
    };

    let Some((alias, relative)) = store.locate(path) else {
        debug!("Ignoring change outside statement roots: {}", path.display());
        return;
    };
    if !store.is_statement_file(&relative) {
        return;
    }

    if path.is_file() {
        match store.reload_file(&alias, &relative) {
            Ok(def) => info!("Reloaded statement {} (revision {})", def.path, def.revision),
            Err(e) => warn!("Keeping last good definition for {}: {}", relative.display(), e),
        }
    } else if let Some(def) = store.remove_file(&alias, &relative) {
        info!("Removed statement {}", def.path);
    }
}
