//! The host's view of the IDE workspace.

use crate::error::Result;
use crate::protocol::{Message, ProjectDescriptor, SolutionBody, VersionBody};

/// Kind of a workspace change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    SolutionAdded,
    SolutionChanged,
    SolutionCleared,
    SolutionReloaded,
    SolutionRemoved,
    ProjectAdded,
    ProjectChanged,
    ProjectReloaded,
    ProjectRemoved,
    DocumentAdded,
    DocumentChanged,
    DocumentReloaded,
    DocumentRemoved,
    AdditionalDocumentAdded,
    AdditionalDocumentChanged,
    AdditionalDocumentRemoved,
}

impl ChangeKind {
    /// Whether the change can alter which projects or documents exist.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            ChangeKind::SolutionAdded
                | ChangeKind::SolutionChanged
                | ChangeKind::SolutionCleared
                | ChangeKind::SolutionReloaded
                | ChangeKind::SolutionRemoved
                | ChangeKind::ProjectAdded
                | ChangeKind::ProjectChanged
                | ChangeKind::ProjectReloaded
                | ChangeKind::ProjectRemoved
        )
    }
}

/// Compiled metadata for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedMetadata {
    pub assembly_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// The workspace model the host synchronizes from.
///
/// Implementations are called from the timer thread, the accept thread
/// and the compile batch, possibly at the same time.
pub trait Workspace: Send + Sync {
    /// Current snapshot of all projects.
    fn projects(&self) -> Vec<ProjectDescriptor>;

    /// Compile a project down to its metadata-only image.
    fn emit_metadata(&self, project: &ProjectDescriptor) -> Result<EmittedMetadata>;
}

pub fn solution_message(projects: Vec<ProjectDescriptor>) -> Message {
    Message::Solution(SolutionBody { projects })
}

/// What a newly connected client receives before anything else.
pub fn greeting(workspace: &dyn Workspace, version: i32) -> Vec<Message> {
    vec![
        Message::Version(VersionBody { version }),
        solution_message(workspace.projects()),
    ]
}
