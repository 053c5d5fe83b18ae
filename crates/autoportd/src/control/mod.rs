//! Loopback control socket.
//!
//! The listener accepts one envelope per connection on a background accept
//! loop. The request is read and queued on that loop, so commands run in the
//! order clients connected; only replies owed to `get_env` and `stop` are
//! awaited on a separate thread.

mod errors;
mod handler;
mod listener;

pub use errors::ListenerError;
pub(crate) use handler::{ConnectionHandler, ControlHandler, PendingReply};
pub(crate) use listener::{ControlListener, ListenerHandle};

const CONTROL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::control");
