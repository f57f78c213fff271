use std::collections::VecDeque;

use thiserror::Error;

use crate::cancel::CancelToken;
use crate::frames::{PeerMessage, ReplyFrames};

/// Coarse per-channel transport health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyHealthSnapshot {
    pub requests_received: u64,
    pub replies_sent: u64,
    pub send_errors: u64,
    pub receive_errors: u64,
    pub last_error: Option<String>,
}

/// Errors surfaced by a [`ReplyChannel`].
pub trait ReplyChannelError: std::error::Error + Send + Sync + 'static {
    /// Whether the failure came from a cancelled receive rather than the transport.
    fn is_cancelled(&self) -> bool {
        false
    }

    /// Whether a failed send also dropped the request it answered.
    ///
    /// When true the channel no longer owes a reply and the next operation
    /// must be a receive.
    fn reply_obligation_lost(&self) -> bool {
        false
    }
}

/// Strictly alternating request/reply contract with one remote peer.
///
/// A reply may only be sent after a request has been received, and the next
/// request may only be received once that reply was sent.
pub trait ReplyChannel {
    /// Transport-specific error.
    type Error: ReplyChannelError;

    /// Blocks until the next peer request arrives or `cancel` fires.
    fn receive_next(&mut self, cancel: &CancelToken) -> Result<PeerMessage, Self::Error>;

    /// Returns once the transport has accepted `reply` for delivery, or
    /// early if `cancel` fires.
    fn send_reply(
        &mut self,
        reply: &ReplyFrames,
        cancel: &CancelToken,
    ) -> Result<(), Self::Error>;

    /// Resolved endpoint this channel is bound to, if known.
    fn endpoint(&self) -> Option<&str> {
        None
    }

    /// Best-effort transport health counters.
    fn health_snapshot(&self) -> ReplyHealthSnapshot {
        ReplyHealthSnapshot::default()
    }
}

/// Channels that can be bound from a bare endpoint string.
pub trait BindReplyChannel: ReplyChannel + Sized {
    fn bind(endpoint: &str) -> Result<Self, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InMemoryReplyError {
    #[error("receive cancelled")]
    Cancelled,
    #[error("no pending request")]
    NoPendingRequest,
    #[error("injected receive failure")]
    ReceiveFailed,
    #[error("injected send failure")]
    SendFailed,
    #[error("injected send failure, request dropped")]
    RequestLost,
    #[error("reply sent without a pending request")]
    ReplyWithoutRequest,
    #[error("request received while a reply is still owed")]
    RequestWhileReplyOwed,
    #[error("invalid endpoint")]
    InvalidEndpoint,
}

impl ReplyChannelError for InMemoryReplyError {
    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    fn reply_obligation_lost(&self) -> bool {
        matches!(self, Self::RequestLost)
    }
}

/// Transport operation recorded by [`InMemoryReplyChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyEvent {
    Received,
    Sent,
}

/// In-memory reply socket for tests and simulations.
///
/// Enforces the reply discipline: sending without an outstanding request, or
/// receiving while a reply is owed, is rejected. An empty inbound queue fails
/// the receive instead of blocking.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReplyChannel {
    endpoint: Option<String>,
    inbound: VecDeque<PeerMessage>,
    outbound: Vec<ReplyFrames>,
    events: Vec<ReplyEvent>,
    owes_reply: bool,
    fail_sends: u32,
    lose_requests: u32,
    fail_receives: u32,
    health: ReplyHealthSnapshot,
}

impl InMemoryReplyChannel {
    /// Queues a request as if the peer had sent it.
    pub fn enqueue_request(&mut self, message: impl Into<PeerMessage>) {
        self.inbound.push_back(message.into());
    }

    /// Drains and returns all replies captured so far.
    pub fn take_replies(&mut self) -> Vec<ReplyFrames> {
        std::mem::take(&mut self.outbound)
    }

    /// Ordered log of successful receives and sends.
    pub fn events(&self) -> &[ReplyEvent] {
        &self.events
    }

    /// Fails the next `count` sends.
    pub fn fail_next_sends(&mut self, count: u32) {
        self.fail_sends = count;
    }

    /// Fails the next `count` sends and drops the request each one answered,
    /// like a peer that disconnects while a reply is owed.
    pub fn lose_next_requests(&mut self, count: u32) {
        self.lose_requests = count;
    }

    /// Fails the next `count` receives.
    pub fn fail_next_receives(&mut self, count: u32) {
        self.fail_receives = count;
    }

    pub fn owes_reply(&self) -> bool {
        self.owes_reply
    }

    pub fn pending_requests(&self) -> usize {
        self.inbound.len()
    }

    fn record_error(&mut self, err: InMemoryReplyError) -> InMemoryReplyError {
        self.health.last_error = Some(err.to_string());
        err
    }
}

impl ReplyChannel for InMemoryReplyChannel {
    type Error = InMemoryReplyError;

    fn receive_next(&mut self, cancel: &CancelToken) -> Result<PeerMessage, Self::Error> {
        if cancel.is_cancelled() {
            return Err(InMemoryReplyError::Cancelled);
        }
        if self.owes_reply {
            self.health.receive_errors += 1;
            return Err(self.record_error(InMemoryReplyError::RequestWhileReplyOwed));
        }
        if self.fail_receives > 0 {
            self.fail_receives -= 1;
            self.health.receive_errors += 1;
            return Err(self.record_error(InMemoryReplyError::ReceiveFailed));
        }
        let Some(message) = self.inbound.pop_front() else {
            self.health.receive_errors += 1;
            return Err(self.record_error(InMemoryReplyError::NoPendingRequest));
        };
        self.owes_reply = true;
        self.events.push(ReplyEvent::Received);
        self.health.requests_received += 1;
        Ok(message)
    }

    fn send_reply(
        &mut self,
        reply: &ReplyFrames,
        cancel: &CancelToken,
    ) -> Result<(), Self::Error> {
        if cancel.is_cancelled() {
            return Err(InMemoryReplyError::Cancelled);
        }
        if !self.owes_reply {
            self.health.send_errors += 1;
            return Err(self.record_error(InMemoryReplyError::ReplyWithoutRequest));
        }
        if self.fail_sends > 0 {
            self.fail_sends -= 1;
            self.health.send_errors += 1;
            return Err(self.record_error(InMemoryReplyError::SendFailed));
        }
        if self.lose_requests > 0 {
            self.lose_requests -= 1;
            self.owes_reply = false;
            self.health.send_errors += 1;
            return Err(self.record_error(InMemoryReplyError::RequestLost));
        }
        self.owes_reply = false;
        self.outbound.push(reply.clone());
        self.events.push(ReplyEvent::Sent);
        self.health.replies_sent += 1;
        Ok(())
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    fn health_snapshot(&self) -> ReplyHealthSnapshot {
        self.health.clone()
    }
}

impl BindReplyChannel for InMemoryReplyChannel {
    fn bind(endpoint: &str) -> Result<Self, Self::Error> {
        if endpoint.trim().is_empty() {
            return Err(InMemoryReplyError::InvalidEndpoint);
        }
        Ok(Self {
            endpoint: Some(endpoint.to_string()),
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BindReplyChannel, InMemoryReplyChannel, InMemoryReplyError, ReplyChannel,
        ReplyChannelError, ReplyEvent, ReplyHealthSnapshot,
    };
    use crate::cancel::CancelToken;
    use crate::frames::ReplyFrames;

    #[test]
    fn in_memory_channel_alternates_receive_and_send() {
        let mut channel = InMemoryReplyChannel::bind("inproc://test").expect("bind");
        channel.enqueue_request("hello");
        channel.enqueue_request("ack");
        let cancel = CancelToken::never();

        let first = channel.receive_next(&cancel).expect("first request");
        assert_eq!(first.as_text(), "hello");
        assert!(channel.owes_reply());

        let err = channel
            .receive_next(&cancel)
            .expect_err("second receive must wait for a reply");
        assert_eq!(err, InMemoryReplyError::RequestWhileReplyOwed);

        channel
            .send_reply(&ReplyFrames::with_empty_delimiter(b"{}".to_vec()), &cancel)
            .expect("reply");
        let second = channel.receive_next(&cancel).expect("second request");
        assert_eq!(second.as_text(), "ack");

        assert_eq!(
            channel.events(),
            &[ReplyEvent::Received, ReplyEvent::Sent, ReplyEvent::Received]
        );
        assert_eq!(channel.endpoint(), Some("inproc://test"));
        assert_eq!(channel.take_replies().len(), 1);
    }

    #[test]
    fn reply_without_request_is_rejected() {
        let mut channel = InMemoryReplyChannel::default();
        let cancel = CancelToken::never();
        let err = channel
            .send_reply(&ReplyFrames::with_empty_delimiter(b"{}".to_vec()), &cancel)
            .expect_err("nothing to reply to");
        assert_eq!(err, InMemoryReplyError::ReplyWithoutRequest);
        assert!(channel.take_replies().is_empty());
    }

    #[test]
    fn injected_failures_do_not_change_reply_obligation() {
        let mut channel = InMemoryReplyChannel::default();
        channel.enqueue_request("hello");
        channel.fail_next_receives(1);
        let cancel = CancelToken::never();

        assert_eq!(
            channel.receive_next(&cancel),
            Err(InMemoryReplyError::ReceiveFailed)
        );
        assert_eq!(channel.pending_requests(), 1);
        channel.receive_next(&cancel).expect("request after failure");

        channel.fail_next_sends(1);
        let reply = ReplyFrames::with_empty_delimiter(b"{\"x\":1}".to_vec());
        assert_eq!(
            channel.send_reply(&reply, &cancel),
            Err(InMemoryReplyError::SendFailed)
        );
        assert!(channel.owes_reply());
        channel.send_reply(&reply, &cancel).expect("retry succeeds");

        assert_eq!(
            channel.health_snapshot(),
            ReplyHealthSnapshot {
                requests_received: 1,
                replies_sent: 1,
                send_errors: 1,
                receive_errors: 1,
                last_error: Some("injected send failure".to_string()),
            }
        );
    }

    #[test]
    fn cancelled_receive_leaves_queue_untouched() {
        let mut channel = InMemoryReplyChannel::default();
        channel.enqueue_request("hello");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = channel.receive_next(&cancel).expect_err("cancelled");
        assert!(err.is_cancelled());
        assert_eq!(channel.pending_requests(), 1);
        assert_eq!(channel.health_snapshot().receive_errors, 0);
    }

    #[test]
    fn lost_request_releases_the_reply_obligation() {
        let mut channel = InMemoryReplyChannel::default();
        channel.enqueue_request("hello");
        channel.enqueue_request("again");
        channel.lose_next_requests(1);
        let cancel = CancelToken::never();
        channel.receive_next(&cancel).expect("request");

        let reply = ReplyFrames::with_empty_delimiter(b"{}".to_vec());
        let err = channel.send_reply(&reply, &cancel).expect_err("request lost");
        assert!(err.reply_obligation_lost());
        assert!(!err.is_cancelled());
        assert!(!channel.owes_reply());
        assert_eq!(
            channel.send_reply(&reply, &cancel),
            Err(InMemoryReplyError::ReplyWithoutRequest)
        );

        assert_eq!(channel.receive_next(&cancel).expect("next").as_text(), "again");
        channel.send_reply(&reply, &cancel).expect("reply to the new request");
        assert_eq!(channel.take_replies().len(), 1);
    }

    #[test]
    fn cancelled_send_keeps_the_reply_owed() {
        let mut channel = InMemoryReplyChannel::default();
        channel.enqueue_request("hello");
        channel.receive_next(&CancelToken::never()).expect("request");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = channel
            .send_reply(&ReplyFrames::with_empty_delimiter(b"{}".to_vec()), &cancel)
            .expect_err("cancelled");
        assert!(err.is_cancelled());
        assert!(!err.reply_obligation_lost());
        assert!(channel.owes_reply());
        assert_eq!(channel.health_snapshot().send_errors, 0);
    }

    #[test]
    fn blank_endpoint_is_rejected() {
        assert_eq!(
            InMemoryReplyChannel::bind("  ").err(),
            Some(InMemoryReplyError::InvalidEndpoint)
        );
    }
}
