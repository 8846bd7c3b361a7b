//! End-to-end checks over real loopback sockets.

use std::io::BufReader;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tether::codegen::{CompilationUnit, CompileOutcome, Compiler, FileResolver, Toolchain, VerbatimGenerator};
use tether::config::{HostConfig, WorkerConfig};
use tether::host::{ChangeKind, EmittedMetadata, Host, Workspace};
use tether::protocol::{
    decode_message, read_frame, write_frame, Message, MetadataBody, ProjectDescriptor, SolutionBody,
    VersionBody,
};
use tether::worker::{self, MessageQueue, Processor, Reader};
use tether::Result;
use uuid::Uuid;

struct FixedWorkspace {
    projects: Vec<ProjectDescriptor>,
}

impl FixedWorkspace {
    fn new(names: &[&str]) -> Self {
        let projects = names
            .iter()
            .map(|name| ProjectDescriptor {
                id: Uuid::new_v4(),
                name: name.to_string(),
                path: format!("/nonexistent/{0}/{0}.csproj", name),
                references: vec![format!("/nonexistent/lib/{}.dll", name)],
            })
            .collect();
        Self { projects }
    }
}

impl Workspace for FixedWorkspace {
    fn projects(&self) -> Vec<ProjectDescriptor> {
        self.projects.clone()
    }

    fn emit_metadata(&self, project: &ProjectDescriptor) -> Result<EmittedMetadata> {
        Ok(EmittedMetadata { assembly_name: None, bytes: project.name.as_bytes().to_vec() })
    }
}

fn slow_ticks() -> HostConfig {
    HostConfig { tick_interval_ms: 60_000, ..HostConfig::default() }
}

fn next(reader: &mut BufReader<TcpStream>) -> Message {
    decode_message(&read_frame(reader, 1 << 20).expect("frame"))
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn new_client_gets_version_then_full_project_list() {
    let workspace = FixedWorkspace::new(&["Web", "Admin"]);
    let expected = workspace.projects.clone();
    let host = Host::start(Arc::new(workspace), &slow_ticks()).unwrap();

    let mut reader = BufReader::new(TcpStream::connect(("127.0.0.1", host.port())).unwrap());
    assert_eq!(next(&mut reader), Message::Version(VersionBody { version: 1 }));
    assert_eq!(next(&mut reader), Message::Solution(SolutionBody { projects: expected.clone() }));

    // A reconnect gets exactly the same resync.
    let mut again = BufReader::new(TcpStream::connect(("127.0.0.1", host.port())).unwrap());
    assert_eq!(next(&mut again), Message::Version(VersionBody { version: 1 }));
    assert_eq!(next(&mut again), Message::Solution(SolutionBody { projects: expected }));

    host.stop();
}

#[test]
fn structural_burst_yields_one_project_list_then_metadata() {
    let host = Host::start(Arc::new(FixedWorkspace::new(&["Web"])), &slow_ticks()).unwrap();
    let stream = TcpStream::connect(("127.0.0.1", host.port())).unwrap();
    stream.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    let mut reader = BufReader::new(stream);
    next(&mut reader);
    next(&mut reader);
    wait_for("registration", || host.listener().client_count() == 1);

    let sync = host.synchronizer();
    sync.on_change(ChangeKind::ProjectAdded);
    let outcome = sync.tick();
    assert!(outcome.solution_sent);
    assert_eq!(outcome.batch.expect("batch").wait(), 1);
    assert!(matches!(next(&mut reader), Message::Solution(_)));
    assert!(matches!(next(&mut reader), Message::Metadata(_)));

    sync.on_change(ChangeKind::SolutionReloaded);
    sync.on_change(ChangeKind::ProjectRemoved);
    sync.on_change(ChangeKind::DocumentChanged);
    let outcome = sync.tick();
    assert!(outcome.solution_sent);
    outcome.batch.expect("batch").wait();
    assert!(matches!(next(&mut reader), Message::Solution(_)));
    assert!(matches!(next(&mut reader), Message::Metadata(_)));

    // Nothing else arrives.
    assert!(read_frame(&mut reader, 1 << 20).is_err());
    host.stop();
}

#[derive(Clone, Default)]
struct RecordingCompiler {
    units: Arc<Mutex<Vec<CompilationUnit>>>,
}

impl Compiler for RecordingCompiler {
    fn compile(&self, unit: &CompilationUnit) -> Result<CompileOutcome> {
        self.units.lock().unwrap().push(unit.clone());
        Ok(CompileOutcome { success: true, diagnostics: Vec::new() })
    }
}

#[test]
fn worker_survives_garbage_and_applies_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Index.cshtml"), "<p/>").unwrap();
    let id = Uuid::new_v4();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (mut host_side, _) = listener.accept().unwrap();

    let queue = Arc::new(MessageQueue::new());
    let reader = Reader::start(client, Arc::clone(&queue), 1 << 20).unwrap();
    let compiler = RecordingCompiler::default();
    let toolchain = Toolchain {
        generator: Box::new(VerbatimGenerator),
        compiler: Box::new(compiler.clone()),
        resolver: Box::new(FileResolver),
    };
    let processor = Processor::new(toolchain, "cshtml").spawn(Arc::clone(&queue)).unwrap();

    let solution = Message::Solution(SolutionBody {
        projects: vec![ProjectDescriptor {
            id,
            name: "Web".to_string(),
            path: dir.path().join("Web.csproj").display().to_string(),
            references: Vec::new(),
        }],
    });
    let metadata = Message::Metadata(MetadataBody {
        id,
        project_name: "Web".to_string(),
        assembly_name: None,
        bytes: vec![1, 2, 3],
    });

    write_frame(&mut host_side, "not json at all").unwrap();
    write_frame(&mut host_side, r#"{"type":"metadata","body":{"id":"nope"}}"#).unwrap();
    write_frame(&mut host_side, &tether::encode(&solution).unwrap()).unwrap();
    write_frame(&mut host_side, r#"{"type":"diagnostics","body":{"level":3}}"#).unwrap();
    write_frame(&mut host_side, &tether::encode(&metadata).unwrap()).unwrap();
    drop(host_side);

    reader.join();
    let processor = processor.join().expect("processor");

    let project = processor.state().get(&id).expect("project state");
    assert_eq!(project.last_metadata, Some(vec![1, 2, 3]));
    let units = compiler.units.lock().unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].sources.len(), 1);
}

#[test]
fn worker_exits_when_host_stops() {
    let host = Host::start(Arc::new(FixedWorkspace::new(&["Web"])), &slow_ticks()).unwrap();
    let stream = TcpStream::connect(("127.0.0.1", host.port())).unwrap();
    let worker = thread::spawn(move || worker::serve(stream, &WorkerConfig::default(), Toolchain::default()));

    wait_for("registration", || host.listener().client_count() == 1);
    host.stop();

    worker.join().unwrap().unwrap();
}
