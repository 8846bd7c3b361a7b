//! Collaborators the worker drives on every metadata pass.
//!
//! The template generator, the compiler and the reference resolver live
//! outside this crate. The processor only sees the traits below; the
//! worker binary wires in process-backed implementations from
//! [`external`], or the trivial ones here when nothing is configured.

pub mod external;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TetherError};

pub use external::{CommandCompiler, CommandGenerator};

/// A structured error reported by the template generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub location: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {}", location, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Result of generating source for one template document.
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Generated(String),
    Failed(Vec<ParseError>),
}

/// Template-to-source generator.
pub trait Generator {
    /// `relative_path` is rooted at the project directory and uses `/`.
    fn generate(&self, relative_path: &str, input: &mut dyn Read) -> Generation;
}

/// A resolved binary dependency, cheap to clone into every compilation unit.
#[derive(Debug, Clone)]
pub struct ReferenceHandle {
    pub path: PathBuf,
    /// File contents, for compilers that link in-process. `None` when the
    /// compiler only needs the path.
    pub image: Option<Arc<[u8]>>,
}

/// Turns a reference path into a handle.
pub trait ReferenceResolver {
    fn resolve(&self, path: &Path) -> Result<ReferenceHandle>;
}

/// Generated source ready to be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// Path of the template the source came from.
    pub path: PathBuf,
    pub text: String,
}

/// Everything the compiler needs for one pass over a project.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub name: String,
    /// The project's own metadata, referenced like any other library.
    pub self_reference: Option<Arc<[u8]>>,
    pub references: Vec<ReferenceHandle>,
    pub sources: Vec<SourceUnit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Hidden,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.severity, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutcome {
    pub success: bool,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutcome {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error)
    }
}

/// Compiler backend.
pub trait Compiler {
    fn compile(&self, unit: &CompilationUnit) -> Result<CompileOutcome>;
}

/// The three collaborators, bundled so they can move onto the processor thread.
pub struct Toolchain {
    pub generator: Box<dyn Generator + Send>,
    pub compiler: Box<dyn Compiler + Send>,
    pub resolver: Box<dyn ReferenceResolver + Send>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            generator: Box::new(VerbatimGenerator),
            compiler: Box::new(NullCompiler),
            resolver: Box::new(FileResolver),
        }
    }
}

/// Treats every template as already-generated source.
pub struct VerbatimGenerator;

impl Generator for VerbatimGenerator {
    fn generate(&self, relative_path: &str, input: &mut dyn Read) -> Generation {
        let mut text = String::new();
        match input.read_to_string(&mut text) {
            Ok(_) => Generation::Generated(text),
            Err(e) => Generation::Failed(vec![ParseError {
                message: e.to_string(),
                location: Some(relative_path.to_string()),
            }]),
        }
    }
}

/// Accepts every unit without diagnostics.
pub struct NullCompiler;

impl Compiler for NullCompiler {
    fn compile(&self, _unit: &CompilationUnit) -> Result<CompileOutcome> {
        Ok(CompileOutcome { success: true, diagnostics: Vec::new() })
    }
}

/// Resolves a reference by reading the file at its path.
pub struct FileResolver;

impl ReferenceResolver for FileResolver {
    fn resolve(&self, path: &Path) -> Result<ReferenceHandle> {
        let bytes = fs::read(path).map_err(|e| reference_error(path, e))?;
        Ok(ReferenceHandle { path: path.to_path_buf(), image: Some(Arc::from(bytes)) })
    }
}

/// Resolves a reference by checking that a file exists at its path,
/// without loading it. For compilers that open references themselves.
pub struct PathResolver;

impl ReferenceResolver for PathResolver {
    fn resolve(&self, path: &Path) -> Result<ReferenceHandle> {
        let metadata = fs::metadata(path).map_err(|e| reference_error(path, e))?;
        if !metadata.is_file() {
            return Err(TetherError::Reference {
                path: path.display().to_string(),
                reason: "not a file".to_string(),
            });
        }
        Ok(ReferenceHandle { path: path.to_path_buf(), image: None })
    }
}

fn reference_error(path: &Path, e: std::io::Error) -> TetherError {
    TetherError::Reference { path: path.display().to_string(), reason: e.to_string() }
}
