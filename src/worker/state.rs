//! Worker-side mirror of the host's projects.
//!
//! Owned by the processor thread alone, so nothing here is synchronized.
//! If compilation is ever parallelized, [`ReferenceCache`] needs a lock or
//! a per-project owner.

use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::codegen::{ReferenceHandle, ReferenceResolver};
use crate::protocol::ProjectDescriptor;

/// One project as last described by the host.
#[derive(Debug, Clone)]
pub struct ProjectState {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    /// Directory containing the project file.
    pub source_root: PathBuf,
    pub documents: Vec<PathBuf>,
    pub references: Vec<PathBuf>,
    pub last_metadata: Option<Vec<u8>>,
}

impl ProjectState {
    /// Build fresh state for a descriptor, enumerating its documents.
    pub fn from_descriptor(descriptor: &ProjectDescriptor, extension: &str) -> Self {
        let path = PathBuf::from(&descriptor.path);
        let source_root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let documents = enumerate_documents(&source_root, extension);

        Self {
            id: descriptor.id,
            name: descriptor.name.clone(),
            path,
            source_root,
            documents,
            references: descriptor.references.iter().map(PathBuf::from).collect(),
            last_metadata: None,
        }
    }

    pub fn set_references(&mut self, paths: &[String]) {
        self.references = paths.iter().map(PathBuf::from).collect();
    }

    /// Path of `document` relative to the source root, `/`-separated with
    /// a leading slash.
    pub fn relative_path(&self, document: &Path) -> String {
        let relative = document.strip_prefix(&self.source_root).unwrap_or(document);
        let mut out = String::new();
        for component in relative.components() {
            out.push('/');
            out.push_str(&component.as_os_str().to_string_lossy());
        }
        out
    }
}

/// Reference path -> resolved handle, kept for the life of the worker.
///
/// Project-list resets do not touch it: a path resolved once is never
/// resolved again. A failed resolution is not cached and is retried on
/// the next pass that needs it.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    handles: HashMap<PathBuf, ReferenceHandle>,
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles for `paths` in order, resolving the ones not seen yet.
    /// Paths that fail are left out and returned with the reason.
    pub fn resolve_all(
        &mut self,
        paths: &[PathBuf],
        resolver: &dyn ReferenceResolver,
    ) -> (Vec<ReferenceHandle>, Vec<(PathBuf, String)>) {
        let mut handles = Vec::with_capacity(paths.len());
        let mut failures = Vec::new();

        for path in paths {
            if let Some(handle) = self.handles.get(path) {
                handles.push(handle.clone());
                continue;
            }
            match resolver.resolve(path) {
                Ok(handle) => {
                    self.handles.insert(path.clone(), handle.clone());
                    handles.push(handle);
                }
                Err(e) => failures.push((path.clone(), e.to_string())),
            }
        }
        (handles, failures)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.handles.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// All project states, keyed by id.
#[derive(Debug, Default)]
pub struct State {
    projects: HashMap<Uuid, ProjectState>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything and install `projects`. A later entry with a
    /// repeated id replaces an earlier one.
    pub fn replace_all(&mut self, projects: impl IntoIterator<Item = ProjectState>) {
        self.projects.clear();
        for project in projects {
            self.projects.insert(project.id, project);
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<&ProjectState> {
        self.projects.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut ProjectState> {
        self.projects.get_mut(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &Uuid> {
        self.projects.keys()
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Recursively collect files under `root` with the given extension, in a
/// stable order. Hidden and ignored files are included.
pub fn enumerate_documents(root: &Path, extension: &str) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut documents: Vec<PathBuf> = WalkBuilder::new(root)
        .standard_filters(false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map_or(false, |ft| ft.is_file()))
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case(extension))
        })
        .map(|entry| entry.into_path())
        .collect();

    documents.sort();
    documents
}
