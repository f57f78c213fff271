use bytes::Bytes;

/// Raw multipart message received from the peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMessage {
    frames: Vec<Bytes>,
}

impl PeerMessage {
    pub fn new(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }

    /// Builds a one-frame message.
    pub fn single(frame: impl Into<Bytes>) -> Self {
        Self {
            frames: vec![frame.into()],
        }
    }

    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// True when no frame carries any byte.
    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(|frame| frame.is_empty())
    }

    /// Last frame of the message, where request bodies live.
    pub fn body(&self) -> Option<&Bytes> {
        self.frames.last()
    }

    /// All frames concatenated in order.
    pub fn payload(&self) -> Vec<u8> {
        let len = self.frames.iter().map(Bytes::len).sum();
        let mut out = Vec::with_capacity(len);
        for frame in &self.frames {
            out.extend_from_slice(frame);
        }
        out
    }

    /// Lossy UTF-8 rendering of the payload, for logs.
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.payload()).into_owned()
    }
}

impl From<&str> for PeerMessage {
    fn from(text: &str) -> Self {
        Self::single(Bytes::copy_from_slice(text.as_bytes()))
    }
}

impl From<Vec<u8>> for PeerMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::single(bytes)
    }
}

/// Outgoing multipart reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyFrames {
    frames: Vec<Bytes>,
}

impl ReplyFrames {
    /// Reply shaped as an empty leading frame followed by `body`.
    pub fn with_empty_delimiter(body: impl Into<Bytes>) -> Self {
        Self {
            frames: vec![Bytes::new(), body.into()],
        }
    }

    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.frames.last()
    }

    /// Sum of all frame lengths in bytes.
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Bytes::len).sum()
    }
}
