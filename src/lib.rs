//! Legacy WebSocket (draft hixie-76) upgrade and framing server core.
//!
//! Long before RFC 6455, browsers spoke an interim WebSocket draft with a
//! numeric-key handshake and bare delimiter framing; some embedded and
//! legacy deployments still do. This crate implements that draft's server
//! side: the 101 upgrade with its MD5 challenge proof, the `0x00 .. 0xFF`
//! frame codec, and a thread-per-connection worker loop that feeds decoded
//! frames and caller-injected events to a pluggable [`Handler`], with
//! handler panics contained to the connection that caused them.
//!
//! ## Modules
//!
//! - [`challenge`]: numeric-key reduction and the 16-byte MD5 proof
//! - [`handshake`]: upgrade validation and the 101/400 responses
//! - [`frame`]: delimiter frame codec and the pending byte buffer
//! - [`request`]: upgrade request reading without overshoot
//! - [`handler`]: the pluggable application handler and its outcomes
//! - [`transport`]: plain/TLS streams and one-shot read notifications
//! - [`conn`]: the per-connection state machine and event channel
//! - [`server`]: accept-loop batteries for servers without a listener
//!
//! ## A minimal echo server
//!
//! ```no_run
//! use hixie76::{
//!     serve, CloseReason, Handler, Init, Message, Outcome, Request, ServerConfig, TransportKind,
//! };
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     type State = ();
//!     type Event = ();
//!
//!     fn init(&mut self, _kind: TransportKind, request: Request) -> Init<()> {
//!         Init::ok(request, ())
//!     }
//!
//!     fn handle(&mut self, message: Message<()>, _request: &Request, _state: &mut ()) -> Outcome {
//!         match message {
//!             Message::Frame(payload) => Outcome::Reply(payload),
//!             Message::Event(()) => Outcome::Continue,
//!         }
//!     }
//!
//!     fn terminate(&mut self, _reason: &CloseReason, _request: &Request, _state: &mut ()) {}
//! }
//!
//! let server = serve(ServerConfig::new("127.0.0.1:8010"), |_events| Echo)
//!     .expect("bind echo server");
//! println!("listening on ws://{}", server.local_addr());
//! loop {
//!     std::thread::park();
//! }
//! ```
//!
//! Servers with their own accept loop skip [`serve`] and call
//! [`handle_connection`] directly with whatever stream they accepted.

pub mod challenge;
pub mod conn;
pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod request;
pub mod server;
pub mod transport;

pub use conn::{event_channel, handle_connection, ConnConfig, EventInbox, EventSender};
pub use error::{CloseReason, HandshakeError};
pub use frame::{decode_frame, encode_frame, Decoded, PendingBuffer, CLOSING_SENTINEL};
pub use handler::{Handler, Init, Message, Outcome};
pub use handshake::{location, validate_upgrade, Handshake, UpgradeKeys};
pub use request::{read_key3, read_request, Request};
pub use server::{serve, Server, ServerConfig};
pub use transport::{Stream, Transport, TransportEvent, TransportKind};
