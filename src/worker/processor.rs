//! Processor thread: applies messages to worker state and drives codegen.

use std::fs::File;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::queue::MessageQueue;
use super::state::{ProjectState, ReferenceCache, State};
use crate::codegen::{CompilationUnit, Generation, ReferenceHandle, SourceUnit, Toolchain};
use crate::config::PROTOCOL_VERSION;
use crate::error::{Result, TetherError};
use crate::protocol::{
    ErrorMessage, Message, MetadataBody, ProjectBody, SolutionBody, UnknownMessage, VersionBody,
};

/// What became of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// State changed or a pass ran.
    Applied,
    /// Logged and otherwise ignored.
    Dropped,
}

/// Summary of one metadata pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub generated: usize,
    pub failed: usize,
    pub errors: usize,
}

pub struct Processor {
    state: State,
    /// Outlives every project-list reset.
    references: ReferenceCache,
    toolchain: Toolchain,
    extension: String,
}

impl Processor {
    pub fn new(toolchain: Toolchain, extension: impl Into<String>) -> Self {
        Self {
            state: State::new(),
            references: ReferenceCache::new(),
            toolchain,
            extension: extension.into(),
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn references(&self) -> &ReferenceCache {
        &self.references
    }

    /// Take and handle messages until the queue is completed or cancelled.
    pub fn run(&mut self, queue: &MessageQueue) {
        loop {
            let message = match queue.take() {
                Ok(message) => message,
                Err(TetherError::Cancelled) => {
                    debug!("processor cancelled");
                    return;
                }
                Err(_) => {
                    debug!("queue completed");
                    return;
                }
            };
            self.handle(message);
        }
    }

    /// Run on a dedicated thread.
    pub fn spawn(mut self, queue: Arc<MessageQueue>) -> Result<ProcessorHandle> {
        let thread = {
            let queue = Arc::clone(&queue);
            thread::Builder::new()
                .name("tether-processor".to_string())
                .spawn(move || {
                    self.run(&queue);
                    self
                })?
        };
        Ok(ProcessorHandle { queue, thread })
    }

    pub fn handle(&mut self, message: Message) -> Disposition {
        match message {
            Message::Version(body) => self.on_version(body),
            Message::Solution(body) => self.on_solution(body),
            Message::Project(body) => self.on_project(body),
            Message::Metadata(body) => self.on_metadata(body).0,
            Message::Error(err) => on_error(err),
            Message::Unknown(unknown) => on_unknown(unknown),
        }
    }

    fn on_version(&mut self, body: VersionBody) -> Disposition {
        if body.version == PROTOCOL_VERSION {
            info!(version = body.version, "host protocol version");
        } else {
            warn!(
                version = body.version,
                supported = PROTOCOL_VERSION,
                "unsupported host protocol version, continuing"
            );
        }
        Disposition::Applied
    }

    fn on_solution(&mut self, body: SolutionBody) -> Disposition {
        info!(previous = self.state.len(), "clearing projects");

        let extension = &self.extension;
        let projects = body.projects.iter().map(|descriptor| {
            let project = ProjectState::from_descriptor(descriptor, extension);
            info!(project = %project.name, documents = project.documents.len(), "adding project");
            for document in &project.documents {
                debug!(document = %document.display(), "found document");
            }
            project
        });
        self.state.replace_all(projects);

        Disposition::Applied
    }

    fn on_project(&mut self, body: ProjectBody) -> Disposition {
        let Some(project) = self.state.get_mut(&body.id) else {
            warn!(id = %body.id, "reference update for unknown project, dropping");
            return Disposition::Dropped;
        };

        debug!(project = %project.name, references = body.references.len(), "updating references");
        project.set_references(&body.references);
        Disposition::Applied
    }

    /// Store metadata for a known project and run a full
    /// generate-and-compile pass over its documents.
    pub fn on_metadata(&mut self, body: MetadataBody) -> (Disposition, Option<PassSummary>) {
        let toolchain = &self.toolchain;
        let Some(project) = self.state.get_mut(&body.id) else {
            warn!(id = %body.id, project = %body.project_name, "metadata for unknown project, dropping");
            return (Disposition::Dropped, None);
        };

        info!(project = %project.name, bytes = body.bytes.len(), "updating metadata");
        project.last_metadata = Some(body.bytes);

        let (references, failures) =
            self.references.resolve_all(&project.references, toolchain.resolver.as_ref());
        for (path, reason) in failures {
            warn!(project = %project.name, reference = %path.display(), error = %reason, "unresolved reference");
        }

        let summary = run_pass(project, references, toolchain);
        info!(
            project = %project.name,
            generated = summary.generated,
            failed = summary.failed,
            errors = summary.errors,
            "updated documents"
        );
        (Disposition::Applied, Some(summary))
    }
}

fn run_pass(project: &ProjectState, references: Vec<ReferenceHandle>, toolchain: &Toolchain) -> PassSummary {
    let mut summary = PassSummary::default();

    let mut unit = CompilationUnit {
        name: format!("{}-{}", project.name, Uuid::new_v4().simple()),
        self_reference: project
            .last_metadata
            .as_ref()
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| Arc::from(bytes.as_slice())),
        references,
        sources: Vec::with_capacity(project.documents.len()),
    };

    for document in &project.documents {
        let relative = project.relative_path(document);
        debug!(document = %relative, "generating");

        let mut file = match File::open(document) {
            Ok(file) => file,
            Err(e) => {
                warn!(document = %document.display(), error = %e, "cannot open document");
                summary.failed += 1;
                continue;
            }
        };

        match toolchain.generator.generate(&relative, &mut file) {
            Generation::Generated(text) => {
                debug!(document = %relative, len = text.len(), "generated");
                unit.sources.push(SourceUnit { path: document.clone(), text });
                summary.generated += 1;
            }
            Generation::Failed(errors) => {
                for error in &errors {
                    warn!(document = %relative, error = %error, "parser error");
                }
                summary.failed += 1;
            }
        }
    }

    match toolchain.compiler.compile(&unit) {
        Ok(outcome) => {
            for diagnostic in outcome.errors() {
                warn!(project = %project.name, diagnostic = %diagnostic.message, "compile error");
                summary.errors += 1;
            }
        }
        Err(e) => warn!(project = %project.name, error = %e, "compiler failed"),
    }

    summary
}

fn on_error(err: ErrorMessage) -> Disposition {
    warn!(
        detail = err.detail.as_deref().unwrap_or("none"),
        text = %err.original_text,
        "error message"
    );
    Disposition::Dropped
}

fn on_unknown(unknown: UnknownMessage) -> Disposition {
    info!(type_tag = %unknown.type_tag, body = %unknown.body, "unknown message");
    Disposition::Dropped
}

/// Handle to a running processor thread.
pub struct ProcessorHandle {
    queue: Arc<MessageQueue>,
    thread: JoinHandle<Processor>,
}

impl ProcessorHandle {
    /// Cancel the queue and wait. Pending messages are not processed.
    pub fn stop(self) -> Option<Processor> {
        self.queue.cancel();
        self.join()
    }

    /// Wait for the processor to drain a completed queue.
    pub fn join(self) -> Option<Processor> {
        match self.thread.join() {
            Ok(processor) => Some(processor),
            Err(_) => {
                warn!("processor thread panicked");
                None
            }
        }
    }
}
