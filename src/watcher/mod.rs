//! File watcher: turns filesystem events into workspace change kinds.
//!
//! Stands in for the IDE's own change notifications when the host runs
//! standalone. Edits to the manifest or to a project file are structural;
//! anything else under a watched root is a document change.

use notify::Watcher;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, DebouncedEventKind};
use std::collections::HashSet;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::host::manifest::ManifestWorkspace;
use crate::host::workspace::ChangeKind;

/// Default debounce duration for file events.
const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Directories whose contents never affect generated output.
const IGNORED_DIRS: &[&str] = &[".git", ".vs", "bin", "obj", "node_modules", "target"];

/// Start watching the manifest and every project root.
///
/// `on_change` is called from the watcher's thread once per relevant
/// debounced batch. Returns a handle that keeps the watcher alive.
pub fn start_watching<F>(
    workspace: Arc<ManifestWorkspace>,
    debounce_ms: u64,
    on_change: F,
) -> Result<WatcherHandle, notify::Error>
where
    F: Fn(ChangeKind) + Send + 'static,
{
    let debounce = if debounce_ms == 0 {
        Duration::from_millis(DEFAULT_DEBOUNCE_MS)
    } else {
        Duration::from_millis(debounce_ms)
    };

    let roots = workspace.roots();
    let handler_workspace = Arc::clone(&workspace);

    let mut debouncer = new_debouncer(
        debounce,
        move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
            Ok(events) => {
                let events = events.iter().map(|e| (e.path.as_path(), e.kind));
                for kind in handle_events(events, &handler_workspace) {
                    on_change(kind);
                }
            }
            Err(e) => {
                warn!(error = %e, "file watcher error");
            }
        },
    )?;

    for root in &roots {
        debouncer.watcher().watch(root, notify::RecursiveMode::Recursive)?;
    }

    info!(roots = roots.len(), debounce_ms = debounce.as_millis() as u64, "file watcher started");

    Ok(WatcherHandle { _debouncer: debouncer })
}

/// Classify a batch of events, reloading the manifest if it changed.
/// Returns each distinct change kind once.
fn handle_events<'a>(
    events: impl IntoIterator<Item = (&'a Path, DebouncedEventKind)>,
    workspace: &ManifestWorkspace,
) -> Vec<ChangeKind> {
    let mut kinds = Vec::new();
    let mut seen = HashSet::new();

    for (path, event_kind) in events {
        if event_kind == DebouncedEventKind::AnyContinuous {
            debug!(file = %path.display(), "skipping continuous write");
            continue;
        }

        let Some(kind) = classify(path, workspace) else {
            continue;
        };

        if !seen.insert(kind) {
            continue;
        }
        if kind == ChangeKind::SolutionChanged {
            if let Err(e) = workspace.reload() {
                warn!(error = %e, "manifest reload failed, keeping previous projects");
            }
        }
        kinds.push(kind);
    }

    if !kinds.is_empty() {
        debug!(?kinds, "workspace events");
    }
    kinds
}

fn classify(path: &Path, workspace: &ManifestWorkspace) -> Option<ChangeKind> {
    if path == workspace.manifest_path() {
        return Some(ChangeKind::SolutionChanged);
    }
    let base = workspace.manifest_path().parent().unwrap_or(Path::new(""));
    if should_ignore(path.strip_prefix(base).unwrap_or(path)) {
        return None;
    }
    if workspace.is_project_file(path) {
        return Some(ChangeKind::ProjectChanged);
    }
    Some(ChangeKind::DocumentChanged)
}

/// Check if a path passes through an ignored directory.
fn should_ignore(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => IGNORED_DIRS.contains(&name.to_string_lossy().as_ref()),
        _ => false,
    })
}

/// Handle that keeps the file watcher alive.
/// Drop this to stop watching.
pub struct WatcherHandle {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}
