//! Transport plumbing: the plain/TLS stream, the send/close handle, and
//! the one-shot read notifications.
//!
//! A connection's stream is shared between its worker and a dedicated
//! reader thread behind one mutex. Unlike `TcpStream::try_clone()`, a TLS
//! stream cannot be cloned, so a single locked handle serves both
//! variants. The reader thread waits for a rearm token before every read;
//! each token buys exactly one notification (data, close, or error) on
//! the connection's inbox, which is what bounds read-ahead to one
//! notification's worth. Reads hold the lock in short timeout slices so a
//! writer is never starved while the reader waits for bytes.
//!
//! ```text
//! worker thread                reader thread
//!     |                            |
//!     | rearm() ---- token ----->  | (blocked until armed)
//!     |                            | lock, read slice, unlock, retry
//!     | send() under the lock      |
//!     | <--- Data/Closed/Error --- | one event per token
//! ```

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use rustls::{ServerConnection, StreamOwned};

/// How long one locked read attempt may block before releasing the
/// stream lock to writers.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Read buffer size for one notification.
const READ_CHUNK: usize = 4096;

/// Which transport variant carries the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Plain TCP; advertised locations use `ws://`.
    Plain,
    /// TLS over TCP; advertised locations use `wss://`.
    Tls,
}

impl TransportKind {
    /// The location URI scheme for this variant.
    pub fn scheme(self) -> &'static str {
        match self {
            TransportKind::Plain => "ws",
            TransportKind::Tls => "wss",
        }
    }
}

/// A server-side connection stream, plain or TLS.
/// Both variants implement Read + Write; the read timeout passthrough
/// applies to the underlying TCP socket either way.
pub enum Stream {
    Plain(TcpStream),
    Tls(StreamOwned<ServerConnection, TcpStream>),
}

impl Stream {
    /// The transport variant, for scheme selection and handler init.
    pub fn kind(&self) -> TransportKind {
        match self {
            Stream::Plain(_) => TransportKind::Plain,
            Stream::Tls(_) => TransportKind::Tls,
        }
    }

    /// Set the read timeout on the underlying TcpStream.
    pub fn set_read_timeout(&self, dur: Option<Duration>) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.set_read_timeout(dur),
            Stream::Tls(s) => s.get_ref().set_read_timeout(dur),
        }
    }

    /// Shut down the underlying socket in both directions. Errors are
    /// ignored; the socket may already be gone.
    pub(crate) fn shutdown(&self) {
        let tcp = match self {
            Stream::Plain(s) => s,
            Stream::Tls(s) => s.get_ref(),
        };
        let _ = tcp.shutdown(Shutdown::Both);
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport handle and reader thread
// ---------------------------------------------------------------------------

/// A notification from the reader thread.
#[derive(Debug)]
pub enum TransportEvent {
    /// One read's worth of bytes. At most one of these per rearm.
    Data(Vec<u8>),
    /// The peer closed the stream (clean end-of-stream). Terminal.
    Closed,
    /// The stream failed. Terminal.
    Error(std::io::Error),
}

/// Send/close/rearm handle for one connection's stream.
///
/// Owned by the connection worker. Dropping the handle closes the socket
/// and stops the reader thread.
pub struct Transport {
    stream: Arc<Mutex<Stream>>,
    kind: TransportKind,
    rearm_tx: Sender<()>,
    armed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl Transport {
    /// Wrap `stream` and start its reader thread. Notifications are
    /// delivered through `events`; nothing is read until the first
    /// [`rearm`](Transport::rearm), so bytes the peer pipelined early
    /// stay in the socket until the worker is ready for them.
    pub fn start(stream: Stream, events: Sender<TransportEvent>) -> std::io::Result<Transport> {
        let kind = stream.kind();
        stream.set_read_timeout(Some(READ_SLICE))?;
        let stream = Arc::new(Mutex::new(stream));
        let armed = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        // Capacity 1 is enough: the armed flag guarantees at most one
        // token is ever outstanding, so send() below never blocks.
        let (rearm_tx, rearm_rx) = bounded::<()>(1);

        let reader = ReaderThread {
            stream: Arc::clone(&stream),
            armed: Arc::clone(&armed),
            closed: Arc::clone(&closed),
            rearm_rx,
            events,
        };
        thread::Builder::new()
            .name("hixie76-reader".to_string())
            .spawn(move || reader.run())?;

        Ok(Transport {
            stream,
            kind,
            rearm_tx,
            armed,
            closed,
        })
    }

    /// The stream variant this transport carries.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Write all of `bytes` to the peer and flush.
    pub fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        let mut stream = self.stream.lock();
        stream.write_all(bytes)?;
        stream.flush()
    }

    /// Request exactly one more read notification.
    ///
    /// Idempotent: calling again while a notification is outstanding does
    /// nothing, so the worker may rearm on every loop iteration without
    /// accumulating read-ahead.
    pub fn rearm(&self) {
        if !self.armed.swap(true, Ordering::SeqCst) {
            let _ = self.rearm_tx.send(());
        }
    }

    /// Shut the socket down and stop the reader thread.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stream.lock().shutdown();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

struct ReaderThread {
    stream: Arc<Mutex<Stream>>,
    armed: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    rearm_rx: Receiver<()>,
    events: Sender<TransportEvent>,
}

impl ReaderThread {
    /// One successful read per rearm token. Exits when the transport
    /// handle is dropped (token channel disconnects), the stream ends, or
    /// the handle is closed.
    fn run(self) {
        let mut buf = [0u8; READ_CHUNK];
        while self.rearm_rx.recv().is_ok() {
            loop {
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }
                let result = self.stream.lock().read(&mut buf);
                match result {
                    Ok(0) => {
                        let _ = self.events.send(TransportEvent::Closed);
                        return;
                    }
                    Ok(n) => {
                        // Disarm before delivery: once the worker sees the
                        // event it may immediately rearm, and that rearm
                        // must issue a fresh token.
                        self.armed.store(false, Ordering::SeqCst);
                        let _ = self.events.send(TransportEvent::Data(buf[..n].to_vec()));
                        break;
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        // Timeout slice elapsed with no data; the lock was
                        // released for writers. Still armed, try again.
                        continue;
                    }
                    Err(e) => {
                        if self.closed.load(Ordering::SeqCst) {
                            // The worker shut the socket down; this error
                            // is ours, not the peer's.
                            return;
                        }
                        let _ = self.events.send(TransportEvent::Error(e));
                        return;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, Stream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, Stream::Plain(server))
    }

    #[test]
    fn test_nothing_is_read_until_armed() {
        let (mut client, stream) = socket_pair();
        let (tx, rx) = unbounded();
        let transport = Transport::start(stream, tx).unwrap();

        client.write_all(b"early").unwrap();
        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "unarmed transport must not deliver"
        );

        transport.rearm();
        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            TransportEvent::Data(data) => assert_eq!(data, b"early"),
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_one_notification_per_token() {
        let (mut client, stream) = socket_pair();
        let (tx, rx) = unbounded();
        let transport = Transport::start(stream, tx).unwrap();

        client.write_all(b"first").unwrap();
        thread::sleep(Duration::from_millis(50));
        transport.rearm();
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            TransportEvent::Data(_)
        ));

        // More data arrives, but no token is outstanding.
        client.write_all(b"second").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        transport.rearm();
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            TransportEvent::Data(_)
        ));
    }

    #[test]
    fn test_rearm_while_armed_is_noop() {
        let (mut client, stream) = socket_pair();
        let (tx, rx) = unbounded();
        let transport = Transport::start(stream, tx).unwrap();

        // Two rearms with nothing to read collapse into one token.
        transport.rearm();
        transport.rearm();
        client.write_all(b"ping").unwrap();
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            TransportEvent::Data(_)
        ));

        // Had the second rearm queued a token, this write would be
        // delivered without anyone asking for it.
        client.write_all(b"pong").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_peer_close_delivers_closed() {
        let (client, stream) = socket_pair();
        let (tx, rx) = unbounded();
        let transport = Transport::start(stream, tx).unwrap();

        transport.rearm();
        drop(client);
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            TransportEvent::Closed
        ));
    }

    #[test]
    fn test_send_does_not_deadlock_against_armed_reader() {
        let (mut client, stream) = socket_pair();
        let (tx, _rx) = unbounded();
        let transport = Transport::start(stream, tx).unwrap();

        // The reader is armed and waiting for bytes that never come; a
        // send must still get the lock within a read slice.
        transport.rearm();
        transport.send(b"hello").unwrap();

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_scheme_selection() {
        assert_eq!(TransportKind::Plain.scheme(), "ws");
        assert_eq!(TransportKind::Tls.scheme(), "wss");
        let (_client, stream) = socket_pair();
        assert_eq!(stream.kind(), TransportKind::Plain);
    }
}
