//! Command decoding and the FIFO dispatcher.
//!
//! Control connections turn each `it<function>@<payload>` line into an
//! [`Envelope`] and push it onto the command queue. A single dispatcher
//! thread pops envelopes in submission order, decodes them into
//! [`Command`]s and applies them to the session. Unknown functions are
//! ignored so newer clients keep working against older daemons.

mod dispatcher;
mod envelope;
mod queue;

pub(crate) use dispatcher::Dispatcher;
pub use envelope::{Command, DisconnectTarget, Envelope, EnvelopeError};
pub use queue::{CommandReceiver, CommandSender, QueueClosed, command_channel};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
