//! Worker: the out-of-process side of the connection.
//!
//! ## Architecture
//!
//! ```text
//!   host ──tcp──▶ Reader thread ──▶ MessageQueue ──▶ Processor thread
//!                 (frames → messages)                (state, codegen, compile)
//! ```
//!
//! The worker connects once at startup. When the host closes the
//! connection the reader completes the queue, the processor drains it and
//! [`run`] returns.

pub mod processor;
pub mod queue;
pub mod reader;
pub mod state;

use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use tracing::info;

use crate::codegen::{CommandCompiler, CommandGenerator, PathResolver, Toolchain};
use crate::config::WorkerConfig;
use crate::error::Result;

pub use processor::{Disposition, PassSummary, Processor, ProcessorHandle};
pub use queue::MessageQueue;
pub use reader::Reader;
pub use state::{ProjectState, ReferenceCache, State};

/// Build the toolchain described by the config.
///
/// An external compiler receives reference paths only, so references are
/// checked for existence instead of being read into memory.
pub fn toolchain(config: &WorkerConfig) -> Result<Toolchain> {
    let mut toolchain = Toolchain::default();
    if !config.generator_command.is_empty() {
        toolchain.generator = Box::new(CommandGenerator::new(config.generator_command.clone())?);
    }
    if !config.compiler_command.is_empty() {
        toolchain.compiler = Box::new(CommandCompiler::new(config.compiler_command.clone())?);
        toolchain.resolver = Box::new(PathResolver);
    }
    Ok(toolchain)
}

/// Connect to the host on the loopback port and run until it disconnects.
pub fn run(port: u16, config: &WorkerConfig, toolchain: Toolchain) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    info!(%addr, "connecting");
    let stream = TcpStream::connect(addr)?;
    info!(%addr, "connected");

    serve(stream, config, toolchain)
}

/// Run the reader/processor pair over an established stream.
pub fn serve(stream: TcpStream, config: &WorkerConfig, toolchain: Toolchain) -> Result<()> {
    let queue = Arc::new(MessageQueue::new());
    let reader = Reader::start(stream, Arc::clone(&queue), config.max_frame_len)?;
    let processor = Processor::new(toolchain, config.template_extension.clone()).spawn(queue)?;

    reader.join();
    processor.join();
    info!("worker finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::ReferenceResolver;
    use tempfile::tempdir;

    #[test]
    fn test_default_toolchain_loads_reference_images() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dll");
        std::fs::write(&path, [7u8]).unwrap();

        let toolchain = toolchain(&WorkerConfig::default()).unwrap();
        let handle = toolchain.resolver.resolve(&path).unwrap();
        assert_eq!(handle.image.as_deref(), Some(&[7u8][..]));
    }

    #[test]
    fn test_external_compiler_gets_path_only_references() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dll");
        std::fs::write(&path, [7u8]).unwrap();

        let config = WorkerConfig { compiler_command: vec!["compile".to_string()], ..WorkerConfig::default() };
        let toolchain = toolchain(&config).unwrap();
        let handle = toolchain.resolver.resolve(&path).unwrap();
        assert_eq!(handle.path, path);
        assert!(handle.image.is_none());
    }
}
