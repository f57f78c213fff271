use laplace_transport::{
    BindReplyChannel, CancelToken, PeerMessage, ReplyChannel, ReplyChannelError,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::address::BindAddress;
use crate::dispatch::CommandDispatch;
use crate::error::MiddlewareError;
use crate::gate::{ExchangePhase, GateState};
use crate::snapshot::Snapshot;
use crate::wire::encode_reply;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub publishes: u64,
    pub replies_sent: u64,
    pub requests_received: u64,
    pub send_failures: u64,
    pub receive_failures: u64,
}

/// Gated publisher over one reply channel.
///
/// The first `publish` only waits for the peer's first request. Every later
/// call replies to the outstanding request with a snapshot and then waits for
/// the next request, so the peer never sees two snapshots without asking.
/// Failures leave the gate where it was; retrying `publish` resumes from there.
pub struct GatedPublisher<C: ReplyChannel> {
    channel: C,
    address: BindAddress,
    phase: ExchangePhase,
    dispatch: CommandDispatch,
    queued_reply: Option<Snapshot>,
    stats: PublishStats,
}

impl<C: ReplyChannel> GatedPublisher<C> {
    /// Wraps an already bound channel.
    pub fn new(channel: C, address: BindAddress) -> Self {
        Self {
            channel,
            address,
            phase: ExchangePhase::AwaitingContact,
            dispatch: CommandDispatch::with_default_handlers(),
            queued_reply: None,
            stats: PublishStats::default(),
        }
    }

    /// Binds a channel with `bind` and wraps it.
    pub fn bind_with<F>(address: BindAddress, bind: F) -> Result<Self, MiddlewareError>
    where
        F: FnOnce(&str) -> Result<C, C::Error>,
    {
        info!("starting laplace entangled middleware");
        info!("binding to: {}", address);
        let channel = bind(address.as_str()).map_err(|err| MiddlewareError::BindFailure {
            address: address.to_string(),
            reason: err.to_string(),
        })?;
        info!(
            "started laplace entangled middleware on {}",
            channel.endpoint().unwrap_or(address.as_str())
        );
        Ok(Self::new(channel, address))
    }

    /// Replaces the command table.
    pub fn with_dispatch(mut self, dispatch: CommandDispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Offers `state` to the peer and returns whatever it sent back.
    ///
    /// Returns `Ok(None)` on the first-contact call, which sends nothing.
    pub fn publish<S>(&mut self, state: &S) -> Result<Option<PeerMessage>, MiddlewareError>
    where
        S: Serialize + ?Sized,
    {
        self.publish_cancellable(state, &CancelToken::never())
    }

    /// Like [`publish`](Self::publish), with an abortable send and receive.
    ///
    /// Cancellation is reported as a transport failure. A cancelled receive
    /// leaves the gate unchanged; a cancelled send may release the reply
    /// obligation when the transport cannot take the reply back.
    pub fn publish_cancellable<S>(
        &mut self,
        state: &S,
        cancel: &CancelToken,
    ) -> Result<Option<PeerMessage>, MiddlewareError>
    where
        S: Serialize + ?Sized,
    {
        self.stats.publishes += 1;
        match self.phase {
            ExchangePhase::AwaitingContact => {
                let request = self.receive(cancel)?;
                info!("peer made first contact");
                self.phase = ExchangePhase::OwesReply;
                self.route(&request);
                Ok(None)
            }
            ExchangePhase::OwesReply => {
                let reply = match &self.queued_reply {
                    Some(queued) => encode_reply(queued)?,
                    None => encode_reply(state)?,
                };
                if let Err(err) = self.channel.send_reply(&reply, cancel) {
                    if err.reply_obligation_lost() {
                        // The request went with the failed send; the peer has to ask again.
                        self.phase = ExchangePhase::AwaitingRequest;
                    }
                    if err.is_cancelled() {
                        debug!("send cancelled");
                    } else {
                        self.stats.send_failures += 1;
                        warn!("snapshot send failed: {}", err);
                    }
                    return Err(MiddlewareError::transport(err));
                }
                self.stats.replies_sent += 1;
                self.queued_reply = None;
                self.phase = ExchangePhase::AwaitingRequest;
                self.await_request(cancel).map(Some)
            }
            ExchangePhase::AwaitingRequest => {
                // Nothing is owed to the peer; a send here would break alternation.
                debug!("resuming receive for the outstanding request");
                self.await_request(cancel).map(Some)
            }
        }
    }

    pub fn gate_state(&self) -> GateState {
        self.phase.gate_state()
    }

    /// True until the first peer request has been received.
    pub fn awaiting_first_request(&self) -> bool {
        self.phase == ExchangePhase::AwaitingContact
    }

    /// True while a received request has not been answered.
    pub fn owes_reply(&self) -> bool {
        self.phase == ExchangePhase::OwesReply
    }

    /// Snapshot queued by a command handler for the next send.
    pub fn queued_reply(&self) -> Option<&Snapshot> {
        self.queued_reply.as_ref()
    }

    pub fn address(&self) -> &BindAddress {
        &self.address
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn dispatch_mut(&mut self) -> &mut CommandDispatch {
        &mut self.dispatch
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    fn await_request(&mut self, cancel: &CancelToken) -> Result<PeerMessage, MiddlewareError> {
        let request = self.receive(cancel)?;
        self.phase = ExchangePhase::OwesReply;
        self.route(&request);
        Ok(request)
    }

    fn receive(&mut self, cancel: &CancelToken) -> Result<PeerMessage, MiddlewareError> {
        match self.channel.receive_next(cancel) {
            Ok(request) => {
                self.stats.requests_received += 1;
                debug!("laplace entangled received: {:?}", request.frames());
                Ok(request)
            }
            Err(err) => {
                if err.is_cancelled() {
                    debug!("receive cancelled");
                } else {
                    self.stats.receive_failures += 1;
                    warn!("request receive failed: {}", err);
                }
                Err(MiddlewareError::transport(err))
            }
        }
    }

    fn route(&mut self, request: &PeerMessage) {
        match self.dispatch.route(request) {
            Ok(Some(reply)) => self.queued_reply = Some(reply),
            Ok(None) => {}
            Err(err) => warn!("peer command failed: {}", err),
        }
    }
}

impl<C: BindReplyChannel> GatedPublisher<C> {
    /// Binds the channel type's default transport on `address`.
    pub fn start(address: BindAddress) -> Result<Self, MiddlewareError> {
        Self::bind_with(address, C::bind)
    }
}
