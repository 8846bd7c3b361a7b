//! Listener: accepts worker connections and fans out broadcasts.

use std::io::{self, BufWriter};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::protocol::{encode, write_frame, Message};

/// A write that stalls longer than this counts as a failed client.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that can deliver a message to every connected worker.
pub trait Broadcast: Send + Sync {
    fn broadcast(&self, message: &Message);

    /// Build a message from current state and deliver it. A client that
    /// connects concurrently gets either this message or a greeting built
    /// no earlier than it, never an older state after a newer one.
    fn broadcast_snapshot(&self, snapshot: &dyn Fn() -> Message) {
        self.broadcast(&snapshot());
    }
}

/// One connected worker.
pub struct Client {
    id: u64,
    peer: SocketAddr,
    writer: Mutex<BufWriter<TcpStream>>,
    control: TcpStream,
}

impl Client {
    fn new(id: u64, stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(SEND_TIMEOUT))?;
        let control = stream.try_clone()?;
        Ok(Self { id, peer, writer: Mutex::new(BufWriter::new(stream)), control })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Encode and send one message under this client's send lock.
    pub fn send(&self, message: &Message) -> Result<()> {
        let text = encode(message)?;
        self.send_text(&text)?;
        Ok(())
    }

    fn send_text(&self, text: &str) -> io::Result<()> {
        write_frame(&mut *self.lock_writer(), text)
    }

    fn lock_writer(&self) -> MutexGuard<'_, BufWriter<TcpStream>> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

type Greeting = dyn Fn() -> Vec<Message> + Send + Sync;

/// Loopback listener plus the set of connected clients.
pub struct Listener {
    port: u16,
    socket: Mutex<Option<TcpListener>>,
    clients: Mutex<Vec<Arc<Client>>>,
    next_id: AtomicU64,
    stopping: AtomicBool,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Listener {
    /// Bind to `127.0.0.1:port`; port 0 lets the OS choose.
    pub fn bind(port: u16) -> Result<Arc<Self>> {
        let socket = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
        let port = socket.local_addr()?.port();
        info!(port, "listening");

        Ok(Arc::new(Self {
            port,
            socket: Mutex::new(Some(socket)),
            clients: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            stopping: AtomicBool::new(false),
            accept_thread: Mutex::new(None),
        }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start the accept loop. Every accepted client is sent the messages
    /// produced by `greeting` before it can receive any broadcast.
    pub fn start<F>(self: &Arc<Self>, greeting: F) -> Result<()>
    where
        F: Fn() -> Vec<Message> + Send + Sync + 'static,
    {
        let Some(socket) = lock(&self.socket).take() else {
            warn!("listener already started");
            return Ok(());
        };

        let listener = Arc::clone(self);
        let greeting: Box<Greeting> = Box::new(greeting);
        let handle = thread::Builder::new()
            .name("tether-accept".to_string())
            .spawn(move || listener.accept_loop(socket, greeting.as_ref()))?;

        *lock(&self.accept_thread) = Some(handle);
        Ok(())
    }

    fn accept_loop(&self, socket: TcpListener, greeting: &Greeting) {
        for stream in socket.incoming() {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            match stream {
                Ok(stream) => self.on_accepted(stream, greeting),
                Err(e) => {
                    error!(error = %e, "accept failed, stopping listener");
                    return;
                }
            }
        }
        debug!("listener stopped");
    }

    fn on_accepted(&self, stream: TcpStream, greeting: &Greeting) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let client = match Client::new(id, stream) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(error = %e, "cannot set up client");
                return;
            }
        };

        // Hold the client's send lock across registration and greeting so
        // a concurrent broadcast queues up behind the greeting instead of
        // overtaking it, and nothing sent after registration is missed.
        // The greeting is built under the set lock, which orders it against
        // snapshot broadcasts.
        let mut writer = client.lock_writer();
        let messages = {
            let mut clients = lock(&self.clients);
            clients.push(Arc::clone(&client));
            greeting()
        };

        for message in messages {
            let sent = encode(&message)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
                .and_then(|text| write_frame(&mut *writer, &text));
            if let Err(e) = sent {
                warn!(client = id, error = %e, "greeting failed, dropping client");
                drop(writer);
                self.remove(&[id]);
                client.close();
                return;
            }
        }
        drop(writer);

        info!(client = id, peer = %client.peer(), "accepted client");
    }

    /// Send one message to every client, pruning those whose write fails.
    /// Returns the number of clients that received it.
    pub fn send_all(&self, message: &Message) -> Result<usize> {
        let text = encode(message)?;
        let clients: Vec<Arc<Client>> = lock(&self.clients).clone();
        Ok(self.deliver(&text, clients))
    }

    /// Like [`send_all`](Self::send_all), but `snapshot` runs under the
    /// client set lock, so no greeting is built while it does.
    pub fn send_snapshot(&self, snapshot: &dyn Fn() -> Message) -> Result<(Message, usize)> {
        let (message, clients) = {
            let clients = lock(&self.clients);
            (snapshot(), clients.clone())
        };
        let text = encode(&message)?;
        let sent = self.deliver(&text, clients);
        Ok((message, sent))
    }

    fn deliver(&self, text: &str, clients: Vec<Arc<Client>>) -> usize {
        let mut failed = Vec::new();
        for client in &clients {
            if let Err(e) = client.send_text(text) {
                warn!(client = client.id(), error = %e, "send failed, pruning client");
                client.close();
                failed.push(client.id());
            }
        }

        if !failed.is_empty() {
            self.remove(&failed);
        }
        clients.len() - failed.len()
    }

    fn remove(&self, ids: &[u64]) {
        lock(&self.clients).retain(|c| !ids.contains(&c.id()));
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    /// Stop accepting and disconnect every client.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        // Wake the blocking accept; the loop sees `stopping` and exits.
        let _ = TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, self.port)));
        if let Some(handle) = lock(&self.accept_thread).take() {
            let _ = handle.join();
        }

        for client in lock(&self.clients).drain(..) {
            client.close();
        }
        info!("listener disposed");
    }
}

impl Broadcast for Listener {
    fn broadcast(&self, message: &Message) {
        match self.send_all(message) {
            Ok(n) => debug!(kind = message.kind(), clients = n, "broadcast"),
            Err(e) => error!(kind = message.kind(), error = %e, "cannot encode broadcast"),
        }
    }

    fn broadcast_snapshot(&self, snapshot: &dyn Fn() -> Message) {
        match self.send_snapshot(snapshot) {
            Ok((message, n)) => debug!(kind = message.kind(), clients = n, "broadcast"),
            Err(e) => error!(error = %e, "cannot encode broadcast"),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
