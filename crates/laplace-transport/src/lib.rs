//! Transport abstractions for the Laplace middleware.
//!
//! The gated publisher only depends on the strictly alternating
//! request/reply contract defined in this crate.

pub mod adapter;
pub mod cancel;
pub mod frames;

pub use adapter::{
    BindReplyChannel, InMemoryReplyChannel, InMemoryReplyError, ReplyChannel, ReplyChannelError,
    ReplyEvent, ReplyHealthSnapshot,
};
pub use cancel::CancelToken;
pub use frames::{PeerMessage, ReplyFrames};
