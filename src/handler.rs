//! The pluggable application handler and its dispatch boundary.
//!
//! A connection drives exactly three handler capabilities: [`Handler::init`]
//! before the protocol switch, [`Handler::handle`] for every decoded frame
//! or external event, and [`Handler::terminate`] once, best-effort, as the
//! connection closes. The first two run behind a `catch_unwind` boundary: a
//! panic inside them becomes a refusal (init) or a typed close reason
//! (handle) instead of tearing down the worker thread. `terminate` is
//! deliberately not isolated; it is the last thing the core does for a
//! connection, and a panic there has nothing left to protect.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use log::debug;

use crate::error::CloseReason;
use crate::request::Request;
use crate::transport::TransportKind;

/// Result of [`Handler::init`].
pub enum Init<S> {
    /// Proceed with the protocol switch.
    Continue {
        /// The request to thread through later handler calls. Usually the
        /// one `init` received, possibly rewritten.
        request: Request,
        /// The connection state owned by the loop from here on.
        state: S,
        /// One-time idle timeout override; `None` keeps the configured
        /// default.
        timeout: Option<Duration>,
    },
    /// Refuse the connection. The peer gets the same bare 400 as a failed
    /// handshake, and no further handler method runs.
    Reject,
}

impl<S> Init<S> {
    /// Continue with the configured idle timeout.
    pub fn ok(request: Request, state: S) -> Self {
        Init::Continue {
            request,
            state,
            timeout: None,
        }
    }

    /// Continue and override the idle timeout for this connection.
    pub fn with_timeout(request: Request, state: S, timeout: Duration) -> Self {
        Init::Continue {
            request,
            state,
            timeout: Some(timeout),
        }
    }
}

/// One unit of work delivered to [`Handler::handle`].
#[derive(Debug)]
pub enum Message<E> {
    /// A decoded frame payload from the peer.
    Frame(Vec<u8>),
    /// An event from this connection's external event channel, forwarded
    /// verbatim.
    Event(E),
}

/// Result of [`Handler::handle`].
#[derive(Debug)]
pub enum Outcome {
    /// Keep the connection running.
    Continue,
    /// Send one reply frame with this payload, then keep running.
    Reply(Vec<u8>),
    /// Close the connection gracefully; `terminate` sees a shutdown
    /// reason classified as normal.
    Shutdown,
}

/// Application logic plugged into a connection.
///
/// One handler value exists per connection; its fields are its options.
/// `State` is created by `init`, borrowed mutably by every later call, and
/// dropped after `terminate` returns. The core never inspects it.
pub trait Handler: Send + 'static {
    /// Per-connection state created by [`init`](Handler::init).
    type State: Send + 'static;
    /// External events accepted through the connection's event channel.
    type Event: Send + 'static;

    /// Runs after header validation and before the 101 response is sent,
    /// so a refusal here still reaches the peer as a plain HTTP error. A
    /// panic counts as a refusal.
    fn init(&mut self, kind: TransportKind, request: Request) -> Init<Self::State>;

    /// Handles one frame or external event. A panic here closes the
    /// connection with a handler-crash reason; the connection worker
    /// itself survives.
    fn handle(
        &mut self,
        message: Message<Self::Event>,
        request: &Request,
        state: &mut Self::State,
    ) -> Outcome;

    /// Runs exactly once as the connection closes, whenever `init` had
    /// succeeded. Best-effort: failures here are the handler's own
    /// problem.
    fn terminate(&mut self, reason: &CloseReason, request: &Request, state: &mut Self::State);
}

/// Render a caught panic payload as text. `panic!` with a literal or a
/// `String` yields that text; anything else gets a fixed description.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `Handler::init` inside the crash boundary. A panic becomes `None`,
/// which the connection treats exactly like `Init::Reject`.
pub(crate) fn dispatch_init<H: Handler>(
    handler: &mut H,
    kind: TransportKind,
    request: Request,
) -> Option<Init<H::State>> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.init(kind, request))) {
        Ok(init) => Some(init),
        Err(payload) => {
            debug!("handler init panicked: {}", panic_message(payload));
            None
        }
    }
}

/// Run `Handler::handle` inside the crash boundary. A panic becomes a
/// `HandlerCrash` close reason carrying the panic text; the state stays
/// with the caller either way, so `terminate` still receives it.
pub(crate) fn dispatch_handle<H: Handler>(
    handler: &mut H,
    message: Message<H::Event>,
    request: &Request,
    state: &mut H::State,
) -> Result<Outcome, CloseReason> {
    panic::catch_unwind(AssertUnwindSafe(|| handler.handle(message, request, state)))
        .map_err(|payload| CloseReason::HandlerCrash(panic_message(payload)))
}

// ---------------------------------------------------------------------------
