//! Reply encoding shared with peers.
//!
//! Each reply is two frames: an empty leading frame, then the UTF-8 JSON text
//! of the snapshot. REQ peers read the body from the second frame, so the
//! delimiter frame is always present.

use laplace_transport::ReplyFrames;
use serde::Serialize;

use crate::snapshot::Snapshot;

pub fn encode_reply<S: Serialize + ?Sized>(state: &S) -> Result<ReplyFrames, serde_json::Error> {
    let body = serde_json::to_vec(state)?;
    Ok(ReplyFrames::with_empty_delimiter(body))
}

pub fn decode_snapshot(body: &[u8]) -> Result<Snapshot, serde_json::Error> {
    serde_json::from_slice(body)
}
