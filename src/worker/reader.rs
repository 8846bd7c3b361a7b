//! Reader thread: frames off the socket, messages into the queue.

use std::io::{self, BufReader};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use super::queue::MessageQueue;
use crate::error::Result;
use crate::protocol::{decode_message, read_frame, Message};

/// Handle to a running reader thread.
pub struct Reader {
    cancel: Arc<AtomicBool>,
    stream: TcpStream,
    thread: Option<JoinHandle<()>>,
}

impl Reader {
    /// Spawn the reader over `stream`.
    ///
    /// When the stream ends or fails the reader stops and completes the
    /// queue, so the processor drains what is left and exits.
    pub fn start(stream: TcpStream, queue: Arc<MessageQueue>, max_frame_len: usize) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let control = stream.try_clone()?;

        let thread = {
            let cancel = Arc::clone(&cancel);
            thread::Builder::new()
                .name("tether-reader".to_string())
                .spawn(move || {
                    read_messages(BufReader::new(stream), &queue, &cancel, max_frame_len);
                    queue.complete();
                })?
        };

        Ok(Self { cancel, stream: control, thread: Some(thread) })
    }

    /// Ask the reader to stop and wait for it. Unblocks a pending read by
    /// shutting the socket down.
    pub fn stop(mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        // Already closed by the peer is fine.
        let _ = self.stream.shutdown(Shutdown::Both);
        self.join_inner();
    }

    /// Wait for the reader to finish on its own.
    pub fn join(mut self) {
        self.join_inner();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    fn join_inner(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }
}

/// Read frames until cancelled or the transport fails.
pub fn read_messages<R: io::Read>(
    mut reader: R,
    queue: &MessageQueue,
    cancel: &AtomicBool,
    max_frame_len: usize,
) {
    while !cancel.load(Ordering::SeqCst) {
        let text = match read_frame(&mut reader, max_frame_len) {
            Ok(text) => text,
            Err(e) => {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    info!("connection closed, shutting down");
                } else {
                    info!(error = %e, "read failed, shutting down");
                }
                cancel.store(true, Ordering::SeqCst);
                return;
            }
        };

        let message = decode_message(&text);
        match &message {
            Message::Error(err) => {
                warn!(detail = err.detail.as_deref().unwrap_or(""), text = %text, "parse error");
            }
            other => debug!(kind = other.kind(), "got message"),
        }

        // A stop that raced with the read drops the frame.
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        queue.enqueue(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{write_frame, VersionBody};
    use std::io::Cursor;
    use std::net::TcpListener;

    fn frames(texts: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        for text in texts {
            write_frame(&mut buf, text).unwrap();
        }
        buf
    }

    #[test]
    fn test_malformed_frame_does_not_stop_loop() {
        let bytes = frames(&[
            r#"{"type":"version","body":{"version":1}}"#,
            r#"{"type":"version","body":"#,
            r#"{"type":"solution","body":[]}"#,
            r#"{"type":"custom","body":{}}"#,
            r#"{"type":"version","body":{"version":2}}"#,
        ]);
        let queue = MessageQueue::new();
        let cancel = AtomicBool::new(false);

        read_messages(Cursor::new(bytes), &queue, &cancel, 1024);

        assert!(cancel.load(Ordering::SeqCst), "eof sets cancellation");
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.take().unwrap(), Message::Version(VersionBody { version: 1 }));
        assert!(matches!(queue.take().unwrap(), Message::Error(_)));
        assert!(matches!(queue.take().unwrap(), Message::Error(_)));
        assert!(matches!(queue.take().unwrap(), Message::Unknown(_)));
        assert_eq!(queue.take().unwrap(), Message::Version(VersionBody { version: 2 }));
    }

    #[test]
    fn test_oversized_frame_is_terminal() {
        let bytes = frames(&[r#"{"type":"version","body":{"version":1}}"#, "x"]);
        let queue = MessageQueue::new();
        let cancel = AtomicBool::new(false);

        read_messages(Cursor::new(bytes), &queue, &cancel, 8);

        assert!(queue.is_empty());
        assert!(cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_reader_completes_queue_on_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let queue = Arc::new(MessageQueue::new());
        let reader = Reader::start(client, Arc::clone(&queue), 1024).unwrap();

        write_frame(&mut server, r#"{"type":"version","body":{"version":1}}"#).unwrap();
        drop(server);

        reader.join();
        assert_eq!(queue.take().unwrap(), Message::Version(VersionBody { version: 1 }));
        assert!(queue.is_completed());
    }

    #[test]
    fn test_stop_unblocks_pending_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (_server, _) = listener.accept().unwrap();

        let queue = Arc::new(MessageQueue::new());
        let reader = Reader::start(client, Arc::clone(&queue), 1024).unwrap();
        reader.stop();

        assert!(queue.is_empty());
        assert!(queue.is_completed());
    }
}
