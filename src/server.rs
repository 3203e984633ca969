//! Accept-loop batteries for servers without their own listener.
//!
//! The connection core ([`handle_connection`]) takes any accepted stream;
//! this module supplies the common wrapping around it: a TCP listener, an
//! accept thread, optional TLS, one worker thread per connection, and the
//! factory wiring that gives every handler its connection's event sender
//! before the handshake begins.
//!
//! ```text
//! serve(config, factory)
//!     |
//!     v  accept thread
//! TcpListener::incoming
//!     |
//!     +-- wrap (plain or TLS)
//!     +-- event_channel() -> factory(sender) -> handler
//!     +-- spawn worker: handle_connection(stream, handler, inbox, ...)
//! ```

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use rustls::{ServerConnection, StreamOwned};

use crate::conn::{event_channel, handle_connection, ConnConfig, EventSender};
use crate::handler::Handler;
use crate::transport::Stream;

/// Listener configuration.
#[derive(Clone)]
pub struct ServerConfig {
    addr: String,
    location_host: Option<String>,
    idle_timeout: Option<Duration>,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl ServerConfig {
    /// Listen on `addr` ("host:port"; port 0 picks a free one).
    pub fn new(addr: impl Into<String>) -> Self {
        ServerConfig {
            addr: addr.into(),
            location_host: None,
            idle_timeout: None,
            tls: None,
        }
    }

    /// Advertise this host in handshake location URIs instead of the
    /// bound address. Useful when clients connect through a name the
    /// listener does not see.
    pub fn location_host(mut self, host: impl Into<String>) -> Self {
        self.location_host = Some(host.into());
        self
    }

    /// Close connections idle for this long (default: never).
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Accept TLS connections with this rustls configuration; locations
    /// switch to `wss://`.
    pub fn tls(mut self, tls: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// A running server. The accept thread is detached; the handle reports
/// where it ended up listening.
pub struct Server {
    local_addr: SocketAddr,
}

impl Server {
    /// The address the listener actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Bind and start accepting connections.
///
/// `factory` runs once per accepted connection, receives that
/// connection's [`EventSender`], and returns the handler instance for it.
/// Handing the sender out before init lets handlers register themselves
/// wherever their events will come from.
pub fn serve<H, F>(config: ServerConfig, factory: F) -> io::Result<Server>
where
    H: Handler,
    F: Fn(EventSender<H::Event>) -> H + Send + 'static,
{
    let listener = TcpListener::bind(&config.addr)?;
    let local_addr = listener.local_addr()?;
    let host = config
        .location_host
        .clone()
        .unwrap_or_else(|| local_addr.ip().to_string());
    let port = local_addr.port();

    thread::Builder::new()
        .name(format!("hixie76-accept-{}", port))
        .spawn(move || accept_loop(listener, config, host, port, factory))?;

    debug!("listening on {}", local_addr);
    Ok(Server { local_addr })
}

fn accept_loop<H, F>(
    listener: TcpListener,
    config: ServerConfig,
    host: String,
    port: u16,
    factory: F,
) where
    H: Handler,
    F: Fn(EventSender<H::Event>) -> H + Send + 'static,
{
    for accepted in listener.incoming() {
        let tcp = match accepted {
            Ok(tcp) => tcp,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        let peer = tcp
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let stream = match wrap_stream(tcp, config.tls.as_ref()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("could not set up stream for {}: {}", peer, e);
                continue;
            }
        };

        let mut conn_config = ConnConfig::new(host.clone(), port);
        if let Some(timeout) = config.idle_timeout {
            conn_config = conn_config.idle_timeout(timeout);
        }
        let (sender, inbox) = event_channel::<H::Event>();
        let handler = factory(sender);

        let spawned = thread::Builder::new()
            .name(format!("hixie76-conn-{}", peer))
            .spawn(move || {
                debug!("accepted connection from {}", peer);
                handle_connection(stream, handler, inbox, conn_config);
            });
        if let Err(e) = spawned {
            error!("could not spawn connection worker: {}", e);
        }
    }
}

/// Wrap an accepted socket in the configured stream variant. The TLS
/// handshake itself happens lazily on first read/write.
fn wrap_stream(tcp: TcpStream, tls: Option<&Arc<rustls::ServerConfig>>) -> io::Result<Stream> {
    match tls {
        None => Ok(Stream::Plain(tcp)),
        Some(tls) => {
            let session = ServerConnection::new(Arc::clone(tls))
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Stream::Tls(StreamOwned::new(session, tcp)))
        }
    }
}

// ---------------------------------------------------------------------------
