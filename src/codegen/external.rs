//! Process-backed generator and compiler.
//!
//! Generator protocol: `<argv...> <relative-path>`, template bytes on stdin.
//! Exit status 0 means stdout is the generated source; anything else means
//! each non-empty stderr line is a parse error.
//!
//! Compiler protocol: a JSON [`CompileRequest`] on stdin, a JSON
//! [`CompileOutcome`] on stdout.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use tracing::debug;

use super::{CompilationUnit, CompileOutcome, Compiler, Generation, Generator, ParseError};
use crate::error::{Result, TetherError};

pub struct CommandGenerator {
    argv: Vec<String>,
}

impl CommandGenerator {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(TetherError::Config("generator command is empty".to_string()));
        }
        Ok(Self { argv })
    }
}

impl Generator for CommandGenerator {
    fn generate(&self, relative_path: &str, input: &mut dyn Read) -> Generation {
        let mut stdin = Vec::new();
        if let Err(e) = input.read_to_end(&mut stdin) {
            return failed(relative_path, e.to_string());
        }

        let output = match run(&self.argv, &[relative_path], stdin) {
            Ok(output) => output,
            Err(e) => return failed(relative_path, format!("cannot run generator: {}", e)),
        };

        if output.status.success() {
            return Generation::Generated(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let errors: Vec<ParseError> = String::from_utf8_lossy(&output.stderr)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| ParseError {
                message: line.to_string(),
                location: Some(relative_path.to_string()),
            })
            .collect();

        if errors.is_empty() {
            return failed(relative_path, format!("generator exited with {}", output.status));
        }
        Generation::Failed(errors)
    }
}

fn failed(relative_path: &str, message: String) -> Generation {
    Generation::Failed(vec![ParseError { message, location: Some(relative_path.to_string()) }])
}

pub struct CommandCompiler {
    argv: Vec<String>,
}

impl CommandCompiler {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(TetherError::Config("compiler command is empty".to_string()));
        }
        Ok(Self { argv })
    }
}

/// What the compiler process reads on stdin.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest<'a> {
    pub name: &'a str,
    pub references: Vec<&'a Path>,
    pub self_reference: Option<String>,
    pub sources: Vec<SourceEntry<'a>>,
}

#[derive(Serialize)]
pub struct SourceEntry<'a> {
    pub path: &'a Path,
    pub text: &'a str,
}

impl<'a> CompileRequest<'a> {
    pub fn from_unit(unit: &'a CompilationUnit) -> Self {
        Self {
            name: &unit.name,
            references: unit.references.iter().map(|r| r.path.as_path()).collect(),
            self_reference: unit.self_reference.as_ref().map(|bytes| STANDARD.encode(bytes)),
            sources: unit
                .sources
                .iter()
                .map(|s| SourceEntry { path: &s.path, text: &s.text })
                .collect(),
        }
    }
}

impl Compiler for CommandCompiler {
    fn compile(&self, unit: &CompilationUnit) -> Result<CompileOutcome> {
        let request = serde_json::to_vec(&CompileRequest::from_unit(unit))?;
        let output = run(&self.argv, &[], request)?;

        if output.stdout.is_empty() && !output.status.success() {
            return Err(TetherError::Compile {
                project: unit.name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// Run `argv` with extra arguments, feeding `stdin` from a separate thread
/// so a child that writes before it finishes reading cannot deadlock us.
fn run(argv: &[String], extra: &[&str], stdin: Vec<u8>) -> io::Result<Output> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

    debug!(program = %program, "spawning");
    let mut child = Command::new(program)
        .args(args)
        .args(extra)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let writer = child.stdin.take().map(|mut pipe| {
        thread::spawn(move || {
            // The child may exit without reading everything.
            let _ = pipe.write_all(&stdin);
        })
    });

    let output = child.wait_with_output()?;
    if let Some(writer) = writer {
        let _ = writer.join();
    }
    Ok(output)
}
