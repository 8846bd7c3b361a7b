//! Manifest-backed workspace for the standalone host.
//!
//! The manifest is a TOML file listing projects:
//!
//! ```toml
//! [[project]]
//! id = "4f1c2e0a-6a53-4c39-9d0b-0d1f5a7e2b11"
//! name = "Web"
//! path = "Web/Web.csproj"          # relative to the manifest
//! references = ["/usr/lib/dotnet/System.Runtime.dll"]
//! ```
//!
//! Metadata is produced by an external command run once per project with
//! the project path appended; its stdout is the metadata image.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};
use uuid::Uuid;

use super::workspace::{EmittedMetadata, Workspace};
use crate::error::{Result, TetherError};
use crate::protocol::ProjectDescriptor;

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default, rename = "project")]
    projects: Vec<ManifestProject>,
}

#[derive(Debug, Deserialize)]
struct ManifestProject {
    id: Uuid,
    name: String,
    path: PathBuf,
    #[serde(default)]
    references: Vec<String>,
    assembly_name: Option<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    descriptor: ProjectDescriptor,
    assembly_name: Option<String>,
}

pub struct ManifestWorkspace {
    manifest_path: PathBuf,
    metadata_command: Vec<String>,
    entries: RwLock<Vec<Entry>>,
}

impl ManifestWorkspace {
    pub fn load(manifest_path: &Path, metadata_command: Vec<String>) -> Result<Self> {
        let manifest_path = manifest_path.canonicalize()?;
        let entries = read_manifest(&manifest_path)?;
        info!(manifest = %manifest_path.display(), projects = entries.len(), "manifest loaded");

        Ok(Self { manifest_path, metadata_command, entries: RwLock::new(entries) })
    }

    /// Re-read the manifest. On error the previous project list is kept.
    pub fn reload(&self) -> Result<()> {
        let entries = read_manifest(&self.manifest_path)?;
        debug!(projects = entries.len(), "manifest reloaded");
        *self.entries.write().unwrap_or_else(|p| p.into_inner()) = entries;
        Ok(())
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Directories worth watching: the manifest's own and every project root.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.manifest_path.parent().map(Path::to_path_buf).into_iter().collect();
        for entry in self.read().iter() {
            if let Some(parent) = Path::new(&entry.descriptor.path).parent() {
                if !roots.iter().any(|r| parent.starts_with(r)) {
                    roots.push(parent.to_path_buf());
                }
            }
        }
        roots
    }

    /// Whether `path` is one of the listed project files.
    pub fn is_project_file(&self, path: &Path) -> bool {
        self.read().iter().any(|e| Path::new(&e.descriptor.path) == path)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(|p| p.into_inner())
    }
}

fn read_manifest(path: &Path) -> Result<Vec<Entry>> {
    let text = fs::read_to_string(path)?;
    let manifest: Manifest = toml::from_str(&text)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    Ok(manifest
        .projects
        .into_iter()
        .map(|p| {
            let project_path = if p.path.is_absolute() { p.path } else { base.join(p.path) };
            Entry {
                descriptor: ProjectDescriptor {
                    id: p.id,
                    name: p.name,
                    path: project_path.display().to_string(),
                    references: p.references,
                },
                assembly_name: p.assembly_name,
            }
        })
        .collect())
}

impl Workspace for ManifestWorkspace {
    fn projects(&self) -> Vec<ProjectDescriptor> {
        self.read().iter().map(|e| e.descriptor.clone()).collect()
    }

    fn emit_metadata(&self, project: &ProjectDescriptor) -> Result<EmittedMetadata> {
        let Some((program, args)) = self.metadata_command.split_first() else {
            return Err(TetherError::Config("no metadata command configured".to_string()));
        };

        let output = Command::new(program).args(args).arg(&project.path).output()?;
        if !output.status.success() {
            return Err(TetherError::Compile {
                project: project.name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let assembly_name = self
            .read()
            .iter()
            .find(|e| e.descriptor.id == project.id)
            .and_then(|e| e.assembly_name.clone())
            .or_else(|| Some(project.name.clone()));

        Ok(EmittedMetadata { assembly_name, bytes: output.stdout })
    }
}
