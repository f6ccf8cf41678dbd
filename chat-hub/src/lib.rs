//! Line-oriented TCP chat hub.
//!
//! Clients connect, start out named after their peer address, and exchange
//! broadcast or direct messages through a central relay. The interesting
//! part is the session/broadcast engine:
//!
//! - [`session`] holds per-connection state, the outbound queue and the
//!   single writer task, plus the idempotent teardown state machine.
//! - [`registry`] is the name -> session directory behind one `RwLock`.
//! - [`hub`] owns the registry and the dispatch task that fans broadcasts
//!   out to every session.
//! - [`command`] and [`router`] turn an inbound line into a hub operation.
//!
//! The remaining modules are glue: [`line`] framing, the [`server`] accept
//! loop, the [`cli`] and a small terminal [`client`].

pub mod cli;
pub mod client;
pub mod command;
pub mod error;
pub mod hub;
pub mod line;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;

pub use error::{HubError, HubResult};
