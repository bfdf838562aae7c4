//! Relay core for the offline stall server: it sits between game clients
//! and the gate, forwarding frames verbatim while keeping a character's
//! market stall trading after its client disconnects.

pub mod bridge;
pub mod buf;
pub mod crypt;
pub mod handler;
pub mod ipbook;
pub mod pool;
pub mod proto;
pub mod registry;
pub mod server;
pub mod session;
pub mod support;

pub use crate::bridge::{Bridge, Side};
pub use crate::server::{Server, ServerCtx, ServerStats, Settings};
pub use crate::support::{ErrorKind, ErrorUtils, RelayError, RelayResult};
