//! Synchronizer: debounces workspace changes into periodic broadcasts.
//!
//! Change notifications only flip two dirty flags. A timer tick takes both
//! flags and, in this order, broadcasts a fresh project list (if the
//! solution was dirty) and schedules a metadata batch (if metadata was
//! dirty and no earlier batch is still running). Any number of changes
//! between two ticks yields at most one broadcast of each kind.

use rayon::prelude::*;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::listener::Broadcast;
use super::workspace::{solution_message, ChangeKind, EmittedMetadata, Workspace};
use crate::error::Result;
use crate::protocol::{Message, MetadataBody, ProjectDescriptor};

/// Pending work, guarded by the synchronizer's lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirtyFlags {
    pub solution: bool,
    pub metadata: bool,
}

impl DirtyFlags {
    pub fn mark(&mut self, kind: ChangeKind) {
        if kind.is_structural() {
            self.solution = true;
        }
        self.metadata = true;
    }

    /// Return the current flags and clear them. A flag set after this
    /// call stays set for the next one.
    pub fn take(&mut self) -> DirtyFlags {
        std::mem::take(self)
    }
}

/// A metadata batch running in the background.
pub struct MetadataBatch {
    thread: JoinHandle<usize>,
}

impl MetadataBatch {
    /// Wait for the batch; returns how many metadata messages were broadcast.
    pub fn wait(self) -> usize {
        self.thread.join().unwrap_or_else(|_| {
            warn!("metadata batch panicked");
            0
        })
    }
}

/// What one tick did.
pub struct TickOutcome {
    pub solution_sent: bool,
    pub batch: Option<MetadataBatch>,
}

/// Flags plus whether a metadata batch is still running, under one lock.
#[derive(Debug, Default)]
struct SyncState {
    flags: DirtyFlags,
    batch_in_flight: bool,
}

/// Clears `batch_in_flight` when the batch ends, however it ends.
struct InFlight(Arc<Mutex<SyncState>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.0).batch_in_flight = false;
    }
}

pub struct Synchronizer {
    workspace: Arc<dyn Workspace>,
    broadcaster: Arc<dyn Broadcast>,
    state: Arc<Mutex<SyncState>>,
}

impl Synchronizer {
    pub fn new(workspace: Arc<dyn Workspace>, broadcaster: Arc<dyn Broadcast>) -> Self {
        Self { workspace, broadcaster, state: Arc::new(Mutex::new(SyncState::default())) }
    }

    /// Record a workspace change. Safe to call from any thread.
    pub fn on_change(&self, kind: ChangeKind) {
        debug!(?kind, "workspace changed");
        lock(&self.state).flags.mark(kind);
    }

    pub fn flags(&self) -> DirtyFlags {
        lock(&self.state).flags
    }

    /// Act on the dirty flags once.
    ///
    /// The lock is held only to take the flags. The project list is
    /// broadcast before this returns; metadata compiles run on a
    /// background batch so the caller never waits on them. Only one batch
    /// runs at a time: while one is in flight, `metadata` stays dirty and
    /// a later tick picks it up, so batches broadcast in tick order.
    pub fn tick(&self) -> TickOutcome {
        let flags = {
            let mut state = lock(&self.state);
            let mut flags = state.flags.take();
            if flags.metadata {
                if state.batch_in_flight {
                    debug!("metadata batch still running, deferring");
                    state.flags.metadata = true;
                    flags.metadata = false;
                } else {
                    state.batch_in_flight = true;
                }
            }
            flags
        };
        let mut outcome = TickOutcome { solution_sent: false, batch: None };

        if flags.solution {
            let workspace = &self.workspace;
            self.broadcaster.broadcast_snapshot(&|| {
                let projects = workspace.projects();
                info!(projects = projects.len(), "updating solution");
                solution_message(projects)
            });
            outcome.solution_sent = true;
        }

        if flags.metadata {
            let projects = self.workspace.projects();
            info!(projects = projects.len(), "updating metadata");
            match self.begin_metadata_batch(projects) {
                Ok(batch) => outcome.batch = Some(batch),
                Err(e) => {
                    warn!(error = %e, "cannot start metadata batch");
                    lock(&self.state).flags.metadata = true;
                }
            }
        }

        outcome
    }

    fn begin_metadata_batch(&self, projects: Vec<ProjectDescriptor>) -> Result<MetadataBatch> {
        let workspace = Arc::clone(&self.workspace);
        let broadcaster = Arc::clone(&self.broadcaster);
        // Dropped with the closure, so also when the spawn itself fails.
        let in_flight = InFlight(Arc::clone(&self.state));

        let thread = thread::Builder::new()
            .name("tether-metadata".to_string())
            .spawn(move || {
                let _in_flight = in_flight;
                let results: Vec<(ProjectDescriptor, Result<EmittedMetadata>)> = projects
                    .into_par_iter()
                    .map(|project| {
                        debug!(project = %project.name, "compiling");
                        let emitted = workspace.emit_metadata(&project);
                        (project, emitted)
                    })
                    .collect();

                let mut sent = 0;
                for (project, emitted) in results {
                    match emitted {
                        Ok(emitted) => {
                            info!(project = %project.name, bytes = emitted.bytes.len(), "emit success");
                            broadcaster.broadcast(&Message::Metadata(MetadataBody {
                                id: project.id,
                                project_name: project.name,
                                assembly_name: emitted.assembly_name,
                                bytes: emitted.bytes,
                            }));
                            sent += 1;
                        }
                        Err(e) => warn!(project = %project.name, error = %e, "emit failed"),
                    }
                }
                sent
            })?;

        Ok(MetadataBatch { thread })
    }

    /// Tick every `interval` on a dedicated thread until the returned
    /// timer is stopped or dropped.
    pub fn start(self: &Arc<Self>, interval: Duration) -> Result<Timer> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let synchronizer = Arc::clone(self);

        let thread = thread::Builder::new()
            .name("tether-timer".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        // Batches finish on their own.
                        let _ = synchronizer.tick();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("timer stopped");
                        return;
                    }
                }
            })?;

        Ok(Timer { stop: Some(stop_tx), thread: Some(thread) })
    }

}

fn lock(state: &Mutex<SyncState>) -> MutexGuard<'_, SyncState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to the tick thread. A tick in progress always completes.
pub struct Timer {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TetherError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingBroadcaster {
        sent: Mutex<Vec<Message>>,
    }

    impl RecordingBroadcaster {
        fn kinds(&self) -> Vec<&'static str> {
            self.sent.lock().unwrap().iter().map(Message::kind).collect()
        }
    }

    impl Broadcast for RecordingBroadcaster {
        fn broadcast(&self, message: &Message) {
            self.sent.lock().unwrap().push(message.clone());
        }
    }

    struct FakeWorkspace {
        projects: Vec<ProjectDescriptor>,
        failing: Vec<Uuid>,
    }

    impl FakeWorkspace {
        fn with(names: &[&str]) -> Self {
            let projects = names
                .iter()
                .map(|name| ProjectDescriptor {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    path: format!("/src/{0}/{0}.csproj", name),
                    references: Vec::new(),
                })
                .collect();
            Self { projects, failing: Vec::new() }
        }
    }

    impl Workspace for FakeWorkspace {
        fn projects(&self) -> Vec<ProjectDescriptor> {
            self.projects.clone()
        }

        fn emit_metadata(&self, project: &ProjectDescriptor) -> Result<EmittedMetadata> {
            if self.failing.contains(&project.id) {
                return Err(TetherError::Compile {
                    project: project.name.clone(),
                    reason: "CS0246".to_string(),
                });
            }
            Ok(EmittedMetadata {
                assembly_name: Some(project.name.clone()),
                bytes: project.name.as_bytes().to_vec(),
            })
        }
    }

    fn setup(workspace: FakeWorkspace) -> (Synchronizer, Arc<RecordingBroadcaster>) {
        setup_with(Arc::new(workspace))
    }

    fn setup_with(workspace: Arc<dyn Workspace>) -> (Synchronizer, Arc<RecordingBroadcaster>) {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let sync = Synchronizer::new(workspace, broadcaster.clone());
        (sync, broadcaster)
    }

    #[test]
    fn test_change_policy() {
        let mut flags = DirtyFlags::default();
        flags.mark(ChangeKind::DocumentChanged);
        assert_eq!(flags, DirtyFlags { solution: false, metadata: true });
        flags.mark(ChangeKind::ProjectAdded);
        assert_eq!(flags, DirtyFlags { solution: true, metadata: true });

        assert_eq!(flags.take(), DirtyFlags { solution: true, metadata: true });
        assert_eq!(flags, DirtyFlags::default());
    }

    #[test]
    fn test_clean_tick_does_nothing() {
        let (sync, broadcaster) = setup(FakeWorkspace::with(&["Web"]));
        let outcome = sync.tick();
        assert!(!outcome.solution_sent);
        assert!(outcome.batch.is_none());
        assert!(broadcaster.kinds().is_empty());
    }

    #[test]
    fn test_structural_burst_coalesces() {
        let (sync, broadcaster) = setup(FakeWorkspace::with(&["Web", "Lib"]));
        for _ in 0..50 {
            sync.on_change(ChangeKind::ProjectChanged);
            sync.on_change(ChangeKind::DocumentChanged);
        }

        let outcome = sync.tick();
        assert!(outcome.solution_sent);
        assert_eq!(outcome.batch.unwrap().wait(), 2);
        assert_eq!(broadcaster.kinds(), vec!["solution", "metadata", "metadata"]);

        // Nothing left for the next tick.
        let outcome = sync.tick();
        assert!(!outcome.solution_sent);
        assert!(outcome.batch.is_none());
        assert_eq!(broadcaster.kinds().len(), 3);
    }

    #[test]
    fn test_solution_only_flag_sends_only_solution() {
        let (sync, broadcaster) = setup(FakeWorkspace::with(&["Web"]));
        lock(&sync.state).flags.solution = true;

        let outcome = sync.tick();
        assert!(outcome.solution_sent);
        assert!(outcome.batch.is_none());
        assert_eq!(broadcaster.kinds(), vec!["solution"]);
    }

    #[test]
    fn test_document_change_sends_only_metadata() {
        let (sync, broadcaster) = setup(FakeWorkspace::with(&["Web"]));
        sync.on_change(ChangeKind::DocumentChanged);

        let outcome = sync.tick();
        assert!(!outcome.solution_sent);
        assert_eq!(outcome.batch.unwrap().wait(), 1);
        assert_eq!(broadcaster.kinds(), vec!["metadata"]);
    }

    #[test]
    fn test_failed_emit_is_isolated() {
        let mut workspace = FakeWorkspace::with(&["Web", "Broken", "Lib"]);
        workspace.failing.push(workspace.projects[1].id);
        let lib_id = workspace.projects[2].id;
        let (sync, broadcaster) = setup(workspace);
        sync.on_change(ChangeKind::DocumentChanged);

        assert_eq!(sync.tick().batch.unwrap().wait(), 2);

        let sent = broadcaster.sent.lock().unwrap();
        let names: Vec<_> = sent
            .iter()
            .filter_map(|m| match m {
                Message::Metadata(body) => Some(body.project_name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["Web", "Lib"]);
        assert!(sent.iter().any(|m| matches!(m, Message::Metadata(b) if b.id == lib_id && b.bytes == b"Lib")));
    }

    /// The first emit is slow and returns stale bytes; later ones are fast.
    struct SlowFirstEmit {
        project: ProjectDescriptor,
        calls: AtomicUsize,
    }

    impl Workspace for SlowFirstEmit {
        fn projects(&self) -> Vec<ProjectDescriptor> {
            vec![self.project.clone()]
        }

        fn emit_metadata(&self, _project: &ProjectDescriptor) -> Result<EmittedMetadata> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(300));
                return Ok(EmittedMetadata { assembly_name: None, bytes: b"old".to_vec() });
            }
            Ok(EmittedMetadata { assembly_name: None, bytes: b"new".to_vec() })
        }
    }

    #[test]
    fn test_one_batch_in_flight_keeps_tick_order() {
        let workspace = SlowFirstEmit {
            project: FakeWorkspace::with(&["Web"]).projects.remove(0),
            calls: AtomicUsize::new(0),
        };
        let (sync, broadcaster) = setup_with(Arc::new(workspace));

        sync.on_change(ChangeKind::DocumentChanged);
        let first = sync.tick().batch.expect("first batch");

        sync.on_change(ChangeKind::DocumentChanged);
        assert!(sync.tick().batch.is_none(), "second batch must wait");
        assert!(sync.flags().metadata, "deferred change stays dirty");

        assert_eq!(first.wait(), 1);
        let second = sync.tick().batch.expect("deferred batch");
        assert_eq!(second.wait(), 1);

        let sent = broadcaster.sent.lock().unwrap();
        let bytes: Vec<&[u8]> = sent
            .iter()
            .filter_map(|m| match m {
                Message::Metadata(body) => Some(body.bytes.as_slice()),
                _ => None,
            })
            .collect();
        assert_eq!(bytes, vec![&b"old"[..], &b"new"[..]]);
        assert_eq!(sync.flags(), DirtyFlags::default());
    }

    #[test]
    fn test_change_after_take_survives() {
        let (sync, _broadcaster) = setup(FakeWorkspace::with(&[]));
        sync.on_change(ChangeKind::SolutionChanged);
        let _ = sync.tick();
        sync.on_change(ChangeKind::DocumentChanged);
        assert_eq!(sync.flags(), DirtyFlags { solution: false, metadata: true });
    }

    #[test]
    fn test_timer_ticks_and_stops() {
        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let sync = Arc::new(Synchronizer::new(
            Arc::new(FakeWorkspace::with(&["Web"])),
            broadcaster.clone(),
        ));
        sync.on_change(ChangeKind::SolutionAdded);

        let timer = sync.start(Duration::from_millis(20)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while broadcaster.kinds().len() < 2 {
            assert!(std::time::Instant::now() < deadline, "timer never fired");
            thread::sleep(Duration::from_millis(10));
        }
        timer.stop();

        assert_eq!(sync.flags(), DirtyFlags::default());
        assert_eq!(broadcaster.kinds(), vec!["solution", "metadata"]);
    }
}
