//! Gated request/reply middleware between a simulation loop and one peer.
//!
//! The simulation pushes snapshots through [`GatedPublisher::publish`]; the
//! publisher holds them back until the peer has made contact and then keeps
//! sends and receives in strict alternation.

pub mod address;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod publisher;
pub mod snapshot;
pub mod wire;

pub use address::BindAddress;
pub use dispatch::{CommandDispatch, CommandError, CommandHandler, CommandRequest};
pub use error::MiddlewareError;
pub use gate::GateState;
pub use publisher::{GatedPublisher, PublishStats};
pub use snapshot::Snapshot;

/// This side of the exchange is always the server; a client SDK answers `false`.
pub fn is_server() -> bool {
    true
}
