//! The per-connection state machine.
//!
//! One worker thread owns one connection end to end: handshake, handler
//! initialization, the receive/dispatch loop, and termination. The machine
//! is an explicit state enum stepped by a transition function; each state
//! method returns the next state, and the resources a state needs ride in
//! its variant, so ownership moves through the machine instead of living
//! in optional fields.
//!
//! ```text
//! Handshaking -> HandlerInit -> SendResponse -> Receiving <-> Dispatching
//!      |              |              |              |             |
//!      +--------------+----------+---+-------------+-------------+
//!                                v
//!                             Closing -> Terminated
//! ```
//!
//! Per iteration the worker blocks at exactly one multiplexed wait over
//! three named sources: the transport inbox (readable/closed/error), the
//! caller's external event channel, and the idle timer. The transport is
//! rearmed for one read at the top of every wait; the rearm is idempotent,
//! so iterations that consumed an event rather than a read cost nothing.
//!
//! Nothing a connection does escapes its worker: handshake failures,
//! transport errors, and handler crashes all end in a state transition,
//! never a propagated panic or error.

use std::time::Duration;

use crossbeam_channel::{after, never, select, unbounded, Receiver, RecvError};
use log::{debug, trace};

use crate::error::CloseReason;
use crate::frame::{decode_frame, encode_frame, Decoded, PendingBuffer, CLOSING_SENTINEL};
use crate::handler::{dispatch_handle, dispatch_init, Handler, Init, Message, Outcome};
use crate::handshake::{
    location, validate_upgrade, write_accept_response, write_bad_request, Handshake,
};
use crate::request::{read_key3, read_request, Request};
use crate::transport::{Stream, Transport, TransportEvent};

// ---------------------------------------------------------------------------
// External event channel
// ---------------------------------------------------------------------------

/// Sending half of a connection's external event channel.
///
/// Cheap to clone and safe to use from any thread; events arrive at the
/// handler in send order, interleaved with decoded frames.
pub struct EventSender<E>(crossbeam_channel::Sender<E>);

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        EventSender(self.0.clone())
    }
}

impl<E> EventSender<E> {
    /// Queue an event for the connection. Returns the event if the
    /// connection has terminated and its inbox is gone.
    pub fn send(&self, event: E) -> Result<(), E> {
        self.0.send(event).map_err(|e| e.into_inner())
    }
}

/// Receiving half of a connection's external event channel; handed to
/// [`handle_connection`], which forwards every event to the handler.
pub struct EventInbox<E> {
    rx: Receiver<E>,
    // Keeps the channel connected after every caller-side sender is
    // dropped. The wait treats "no senders" as "no events", not an error.
    _keepalive: crossbeam_channel::Sender<E>,
}

/// Create the external event channel for one connection.
pub fn event_channel<E>() -> (EventSender<E>, EventInbox<E>) {
    let (tx, rx) = unbounded();
    (
        EventSender(tx.clone()),
        EventInbox { rx, _keepalive: tx },
    )
}

// ---------------------------------------------------------------------------
// Connection configuration
// ---------------------------------------------------------------------------

/// Per-connection settings supplied by whoever accepted the socket.
///
/// `host` and `port` are what the 101 response advertises in its location
/// URI; they describe the listener, not the peer. The idle timeout
/// defaults to unbounded, and handlers get one chance to override it in
/// their init result.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    host: String,
    port: u16,
    idle_timeout: Option<Duration>,
}

impl ConnConfig {
    /// Advertise `host:port` in the accepted connection's location URI.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnConfig {
            host: host.into(),
            port,
            idle_timeout: None,
        }
    }

    /// Close the connection after this long with no traffic and no
    /// events. The timer covers one wait, so any activity resets it.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Everything a running (post-switch) connection owns.
struct Session<S> {
    transport: Transport,
    inbox: Receiver<TransportEvent>,
    request: Request,
    state: S,
}

/// How a connection ends. Split by what still exists at that point: a
/// refused connection has only the raw stream, an aborted one has handler
/// state but no switched protocol, a closed one has the full session.
enum Ending<S> {
    /// Pre-switch failure (bad handshake, handler refusal). The peer gets
    /// the bare 400; no handler state exists, so `terminate` never runs.
    Refuse { stream: Stream },
    /// Handler init succeeded but the 101 never reached the peer. No
    /// sentinel (the protocol was never switched); `terminate` runs.
    Abort { request: Request, state: S, reason: CloseReason },
    /// An upgraded connection ends. Sentinel policy applies, the socket
    /// closes, and `terminate` runs.
    Close { session: Session<S>, reason: CloseReason },
}

enum ConnState<S> {
    /// Read the request head, validate headers, read the raw key.
    Handshaking { stream: Stream },
    /// Run the handler's init with the validated request.
    HandlerInit {
        stream: Stream,
        request: Request,
        handshake: Handshake,
    },
    /// Write the 101 and start the reader thread.
    SendResponse {
        stream: Stream,
        handshake: Handshake,
        location: String,
        request: Request,
        state: S,
    },
    /// Block on the multiplexed wait for the next unit of work.
    Receiving { session: Session<S> },
    /// Drain decodable frames from the pending buffer.
    Dispatching { session: Session<S> },
    /// Send whatever goodbye applies and run `terminate`.
    Closing(Ending<S>),
    Terminated,
}

/// What one multiplexed wait produced.
enum Inbound<E> {
    Transport(Result<TransportEvent, RecvError>),
    External(Result<E, RecvError>),
    TimedOut,
}

/// The sentinel goes to peers still believed reachable; a dropped or
/// failed transport gets nothing.
fn sentinel_applies(reason: &CloseReason) -> bool {
    !matches!(reason, CloseReason::Dropped | CloseReason::Transport(_))
}

/// Drive one accepted stream through the full connection lifecycle.
///
/// Blocks the calling thread until the connection terminates. Every
/// failure mode is absorbed here; callers learn nothing and need to know
/// nothing about how the connection went.
pub fn handle_connection<H: Handler>(
    stream: Stream,
    handler: H,
    events: EventInbox<H::Event>,
    config: ConnConfig,
) {
    let idle = config.idle_timeout;
    let conn = ConnectionLoop {
        handler,
        config,
        events,
        pending: PendingBuffer::new(),
        idle,
    };
    conn.run(stream);
}

struct ConnectionLoop<H: Handler> {
    handler: H,
    config: ConnConfig,
    events: EventInbox<H::Event>,
    pending: PendingBuffer,
    /// Live idle timeout: starts at the configured value, may be replaced
    /// once by the handler's init result.
    idle: Option<Duration>,
}

impl<H: Handler> ConnectionLoop<H> {
    fn run(mut self, stream: Stream) {
        let mut st = ConnState::Handshaking { stream };
        loop {
            st = match st {
                ConnState::Handshaking { stream } => self.handshaking(stream),
                ConnState::HandlerInit {
                    stream,
                    request,
                    handshake,
                } => self.handler_init(stream, request, handshake),
                ConnState::SendResponse {
                    stream,
                    handshake,
                    location,
                    request,
                    state,
                } => self.send_response(stream, handshake, location, request, state),
                ConnState::Receiving { session } => self.receiving(session),
                ConnState::Dispatching { session } => self.dispatching(session),
                ConnState::Closing(ending) => self.closing(ending),
                ConnState::Terminated => break,
            };
        }
    }

    /// Read and validate the upgrade request. Headers are checked before
    /// the raw key is read, so a request that was never going to pass
    /// cannot stall the worker waiting for body bytes.
    fn handshaking(&mut self, mut stream: Stream) -> ConnState<H::State> {
        let request = match read_request(&mut stream) {
            Ok(request) => request,
            Err(e) => {
                debug!("unreadable upgrade request: {}", e);
                return ConnState::Closing(Ending::Refuse { stream });
            }
        };
        let keys = match validate_upgrade(&request) {
            Ok(keys) => keys,
            Err(e) => {
                debug!("upgrade rejected: {}", e);
                return ConnState::Closing(Ending::Refuse { stream });
            }
        };
        let key3 = match read_key3(&mut stream) {
            Ok(key3) => key3,
            Err(e) => {
                debug!("raw key unreadable: {}", e);
                return ConnState::Closing(Ending::Refuse { stream });
            }
        };
        match keys.complete(&key3) {
            Ok(handshake) => ConnState::HandlerInit {
                stream,
                request,
                handshake,
            },
            Err(e) => {
                debug!("upgrade rejected: {}", e);
                ConnState::Closing(Ending::Refuse { stream })
            }
        }
    }

    /// Run the handler's init before the 101 goes out, so a refusal still
    /// reaches the peer as plain HTTP. The location URI is fixed from the
    /// original request path here, before the handler can rewrite it.
    fn handler_init(
        &mut self,
        stream: Stream,
        request: Request,
        handshake: Handshake,
    ) -> ConnState<H::State> {
        let location = location(
            stream.kind(),
            &self.config.host,
            self.config.port,
            request.path(),
        );
        match dispatch_init(&mut self.handler, stream.kind(), request) {
            Some(Init::Continue {
                request,
                state,
                timeout,
            }) => {
                if let Some(timeout) = timeout {
                    self.idle = Some(timeout);
                }
                ConnState::SendResponse {
                    stream,
                    handshake,
                    location,
                    request,
                    state,
                }
            }
            Some(Init::Reject) => {
                debug!("handler refused the connection");
                ConnState::Closing(Ending::Refuse { stream })
            }
            // Init panicked; dispatch_init already logged it.
            None => ConnState::Closing(Ending::Refuse { stream }),
        }
    }

    /// Commit to the protocol switch: flush the 101, then hand the stream
    /// to the reader thread. Frames the peer pipelined behind its
    /// handshake are still in the socket and surface on the first rearm.
    fn send_response(
        &mut self,
        mut stream: Stream,
        handshake: Handshake,
        location: String,
        request: Request,
        state: H::State,
    ) -> ConnState<H::State> {
        if let Err(e) = write_accept_response(&mut stream, &handshake, &location) {
            return ConnState::Closing(Ending::Abort {
                request,
                state,
                reason: CloseReason::Transport(e),
            });
        }
        debug!("connection established at {}", location);

        let (events_tx, inbox) = unbounded();
        match Transport::start(stream, events_tx) {
            Ok(transport) => ConnState::Receiving {
                session: Session {
                    transport,
                    inbox,
                    request,
                    state,
                },
            },
            Err(e) => ConnState::Closing(Ending::Abort {
                request,
                state,
                reason: CloseReason::Transport(e),
            }),
        }
    }

    /// The multiplexed wait. Exactly one blocking point per iteration,
    /// over three named sources; the timer is re-created per wait, so any
    /// activity resets the idle clock.
    fn receiving(&mut self, session: Session<H::State>) -> ConnState<H::State> {
        session.transport.rearm();
        let timer = match self.idle {
            Some(idle) => after(idle),
            None => never(),
        };
        let inbound = select! {
            recv(session.inbox) -> event => Inbound::Transport(event),
            recv(self.events.rx) -> event => Inbound::External(event),
            recv(timer) -> _ => Inbound::TimedOut,
        };
        match inbound {
            Inbound::Transport(Ok(TransportEvent::Data(bytes))) => {
                trace!("{} bytes from peer", bytes.len());
                self.pending.extend(&bytes);
                ConnState::Dispatching { session }
            }
            Inbound::Transport(Ok(TransportEvent::Closed)) | Inbound::Transport(Err(_)) => {
                ConnState::Closing(Ending::Close {
                    session,
                    reason: CloseReason::Dropped,
                })
            }
            Inbound::Transport(Ok(TransportEvent::Error(e))) => ConnState::Closing(Ending::Close {
                session,
                reason: CloseReason::Transport(e),
            }),
            Inbound::External(Ok(event)) => match self.apply_handler(Message::Event(event), session)
            {
                Ok(session) => ConnState::Receiving { session },
                Err(ending) => ConnState::Closing(ending),
            },
            // Unreachable while the inbox keepalive exists; re-enter the
            // wait rather than guessing at a close reason.
            Inbound::External(Err(_)) => ConnState::Receiving { session },
            Inbound::TimedOut => ConnState::Closing(Ending::Close {
                session,
                reason: CloseReason::Timeout,
            }),
        }
    }

    /// Drain one decodable frame per step, looping back until the buffer
    /// runs dry or something ends the connection. Ordered decode checks
    /// live in [`decode_frame`]; this just maps its verdicts onto states.
    fn dispatching(&mut self, session: Session<H::State>) -> ConnState<H::State> {
        match decode_frame(self.pending.as_slice()) {
            Decoded::Incomplete => ConnState::Receiving { session },
            Decoded::Close => {
                debug!("peer sent closing sentinel");
                ConnState::Closing(Ending::Close {
                    session,
                    reason: CloseReason::Remote,
                })
            }
            Decoded::Malformed(marker) => {
                debug!("unsupported frame marker 0x{:02X}", marker);
                ConnState::Closing(Ending::Close {
                    session,
                    reason: CloseReason::BadFrame,
                })
            }
            Decoded::Frame { payload, consumed } => {
                self.pending.consume(consumed);
                trace!("decoded frame, {} byte payload", payload.len());
                match self.apply_handler(Message::Frame(payload), session) {
                    Ok(session) => ConnState::Dispatching { session },
                    Err(ending) => ConnState::Closing(ending),
                }
            }
        }
    }

    /// Run one handler call and apply its outcome. Returns the session if
    /// the loop keeps going, or the ending it must transition to.
    fn apply_handler(
        &mut self,
        message: Message<H::Event>,
        mut session: Session<H::State>,
    ) -> Result<Session<H::State>, Ending<H::State>> {
        match dispatch_handle(
            &mut self.handler,
            message,
            &session.request,
            &mut session.state,
        ) {
            Ok(Outcome::Continue) => Ok(session),
            Ok(Outcome::Reply(payload)) => {
                let frame = encode_frame(&payload);
                match session.transport.send(&frame) {
                    Ok(()) => Ok(session),
                    Err(e) => Err(Ending::Close {
                        session,
                        reason: CloseReason::Transport(e),
                    }),
                }
            }
            Ok(Outcome::Shutdown) => Err(Ending::Close {
                session,
                reason: CloseReason::Shutdown,
            }),
            Err(reason) => Err(Ending::Close { session, reason }),
        }
    }

    /// Say goodbye as the ending dictates, close the socket, and give the
    /// handler its terminate call. Always reaches `Terminated`.
    fn closing(&mut self, ending: Ending<H::State>) -> ConnState<H::State> {
        match ending {
            Ending::Refuse { mut stream } => {
                if let Err(e) = write_bad_request(&mut stream) {
                    trace!("could not write 400: {}", e);
                }
                stream.shutdown();
                debug!("connection refused before protocol switch");
            }
            Ending::Abort {
                request,
                mut state,
                reason,
            } => {
                debug!("connection aborted: {}", reason);
                self.handler.terminate(&reason, &request, &mut state);
            }
            Ending::Close {
                mut session,
                reason,
            } => {
                if sentinel_applies(&reason) {
                    if let Err(e) = session.transport.send(&CLOSING_SENTINEL) {
                        trace!("could not send closing sentinel: {}", e);
                    }
                }
                session.transport.close();
                debug!("connection closed: {}", reason);
                self.handler
                    .terminate(&reason, &session.request, &mut session.state);
            }
        }
        ConnState::Terminated
    }
}

// ---------------------------------------------------------------------------
