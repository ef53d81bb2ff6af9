//! Watch mode is built from two parts:
//!
//! 1. **Event source**: anything sending batches of changed paths, relative
//!    to the project root, over an mpsc channel. With the `live` feature the
//!    `notify` debouncer is used to monitor the watch roots recursively.
//! 2. **Bindings**: one per task, pairing the watch patterns of its category
//!    with a delay. A matching path arms the binding's deadline, each new
//!    match pushes it back, and once it passes the task runs.
//!
//! Events arriving while a task runs wait in the channel and are coalesced
//! into a single later run.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use petgraph::graph::NodeIndex;

use crate::error::WatchError;
use crate::resource::{ResourceCategory, expand_braces};

/// Links the watch patterns of a category to the task processing it.
#[derive(Debug, Clone)]
pub struct WatchBinding<'a> {
    pub(crate) task: &'a str,
    pub(crate) category: &'a ResourceCategory,
    pub(crate) delay: Duration,
    pub(crate) tasks: HashSet<NodeIndex>,
}

impl WatchBinding<'_> {
    pub fn task(&self) -> &str {
        self.task
    }

    pub fn category(&self) -> &ResourceCategory {
        self.category
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Feeds change batches from `rx` through `bindings`, calling `fire` once for
/// each binding whose deadline passed. Returns when the sender hangs up,
/// after the bindings still armed at that point have fired.
pub(crate) fn debounce<F>(bindings: &[WatchBinding<'_>], rx: &Receiver<Vec<Utf8PathBuf>>, mut fire: F)
where
    F: FnMut(&WatchBinding<'_>),
{
    let mut pending: HashMap<usize, Instant> = HashMap::new();

    let arm = |pending: &mut HashMap<usize, Instant>, batch: Vec<Utf8PathBuf>| {
        let now = Instant::now();
        for path in &batch {
            for (i, binding) in bindings.iter().enumerate() {
                if binding.category.matches(path) {
                    tracing::debug!(task = binding.task, "change in {path}");
                    pending.insert(i, now + binding.delay);
                }
            }
        }
    };

    loop {
        let deadline = pending.values().min().copied();

        let received = match deadline {
            None => match rx.recv() {
                Ok(batch) => batch,
                Err(_) => return,
            },
            Some(deadline) => {
                match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                    Ok(batch) => batch,
                    Err(RecvTimeoutError::Timeout) => {
                        while let Ok(batch) = rx.try_recv() {
                            arm(&mut pending, batch);
                        }
                        fire_due(bindings, &mut pending, &mut fire);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        };

        arm(&mut pending, received);
    }

    // The source is gone, flush whatever is still armed.
    while let Some(deadline) = pending.values().min().copied() {
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        fire_due(bindings, &mut pending, &mut fire);
    }
}

fn fire_due<F>(bindings: &[WatchBinding<'_>], pending: &mut HashMap<usize, Instant>, fire: &mut F)
where
    F: FnMut(&WatchBinding<'_>),
{
    let now = Instant::now();

    let mut due: Vec<_> = pending
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(&i, &deadline)| (deadline, i))
        .collect();
    due.sort();

    for (_, i) in due {
        pending.remove(&i);
        fire(&bindings[i]);
    }
}

/// Directories that need a recursive watch to see every change matched by
/// `bindings`.
pub(crate) fn watch_roots(root: &Utf8Path, bindings: &[WatchBinding<'_>]) -> Vec<Utf8PathBuf> {
    let mut roots = HashSet::new();

    for binding in bindings {
        for pattern in binding.category.watch().iter().flat_map(|p| expand_braces(p)) {
            match resolve_watch_root(root, &pattern) {
                Ok(path) => {
                    roots.insert(path);
                }
                Err(e) => tracing::warn!(task = binding.task, "{e}, not watching"),
            }
        }
    }

    collapse_watch_paths(roots)
}

/// Finds the canonical directory to watch for a glob: its static prefix, or
/// the parent directory when the glob names a single file, so that atomic
/// writes replacing the file are caught.
///
/// A prefix that doesn't exist yet is replaced by its closest existing
/// ancestor inside `root`, so the directory is picked up once created. Only
/// a missing `root` is an error.
pub(crate) fn resolve_watch_root(root: &Utf8Path, pattern: &str) -> Result<Utf8PathBuf, WatchError> {
    let path = Utf8Path::new(pattern);

    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[', '{']))
        .unwrap_or(components.len());

    let static_part: Utf8PathBuf = components.iter().take(split_idx).collect();

    let base = root
        .canonicalize_utf8()
        .map_err(|_| WatchError::Root(pattern.to_string()))?;

    let mut candidate = base.join(static_part);
    let absolute = loop {
        if let Ok(path) = candidate.canonicalize_utf8() {
            break path;
        }
        match candidate.parent() {
            Some(parent) if parent.starts_with(&base) => candidate = parent.to_path_buf(),
            _ => break base,
        }
    };

    if absolute.is_file() {
        let parent = absolute.parent().unwrap_or(&absolute).to_path_buf();
        Ok(parent)
    } else {
        Ok(absolute)
    }
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// Watches are recursive, so a path below an already accepted one adds
/// nothing. Sorting puts every parent right before its children.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut roots: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if roots.last().is_some_and(|last| path.starts_with(last)) {
            continue;
        }
        roots.push(path);
    }

    roots
}

#[cfg(feature = "live")]
pub(crate) use source::{NotifySource, notify_source};

#[cfg(feature = "live")]
mod source {
    use std::sync::mpsc::Sender;
    use std::time::Duration;

    use camino::{Utf8Path, Utf8PathBuf};
    use notify::{EventKind, RecommendedWatcher, RecursiveMode};
    use notify_debouncer_full::{
        DebounceEventResult, DebouncedEvent, Debouncer, RecommendedCache, new_debouncer,
    };

    use crate::error::WatchError;

    /// Short settle window of the filesystem watcher itself. Task delays are
    /// applied on top of it.
    const SETTLE: Duration = Duration::from_millis(50);

    pub(crate) type NotifySource = Debouncer<RecommendedWatcher, RecommendedCache>;

    /// Watches `roots` recursively and sends every batch of changed paths,
    /// relative to `root`, into `tx`. Watching stops when the returned
    /// debouncer is dropped.
    pub(crate) fn notify_source(
        root: &Utf8Path,
        roots: &[Utf8PathBuf],
        tx: Sender<Vec<Utf8PathBuf>>,
    ) -> Result<NotifySource, WatchError> {
        // Events carry canonical absolute paths, like the watch roots.
        let base = root
            .canonicalize_utf8()
            .map_err(|_| WatchError::Root(root.to_string()))?;

        let mut debouncer = new_debouncer(SETTLE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths = changed_paths(&base, &events);
                    if !paths.is_empty() {
                        let _ = tx.send(paths);
                    }
                }
                Err(errors) => {
                    for e in errors {
                        tracing::error!("watch error: {e}");
                    }
                }
            }
        })?;

        for path in roots {
            tracing::info!("watching {path}");
            debouncer.watch(path, RecursiveMode::Recursive)?;
        }

        Ok(debouncer)
    }

    fn changed_paths(root: &Utf8Path, events: &[DebouncedEvent]) -> Vec<Utf8PathBuf> {
        let mut paths: Vec<_> = events
            .iter()
            .filter(|de| {
                matches!(
                    de.event.kind,
                    EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                )
            })
            .flat_map(|de| &de.event.paths)
            .filter_map(|path| Utf8Path::from_path(path))
            .filter_map(|path| path.strip_prefix(root).ok())
            .map(Utf8Path::to_path_buf)
            .collect();

        paths.sort();
        paths.dedup();
        paths
    }
}
