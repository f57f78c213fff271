/// Public view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No peer request has been received yet; publishing only listens.
    AwaitingContact,
    /// The peer has made contact; publishing sends then receives.
    Synchronized,
}

/// Where the exchange stands between two `publish` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExchangePhase {
    AwaitingContact,
    /// A request has been received and its reply has not gone out yet.
    OwesReply,
    /// The reply went out but the following request has not been received.
    AwaitingRequest,
}

impl ExchangePhase {
    pub(crate) fn gate_state(self) -> GateState {
        match self {
            Self::AwaitingContact => GateState::AwaitingContact,
            Self::OwesReply | Self::AwaitingRequest => GateState::Synchronized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExchangePhase, GateState};

    #[test]
    fn only_the_initial_phase_awaits_contact() {
        assert_eq!(
            ExchangePhase::AwaitingContact.gate_state(),
            GateState::AwaitingContact
        );
        assert_eq!(
            ExchangePhase::OwesReply.gate_state(),
            GateState::Synchronized
        );
        assert_eq!(
            ExchangePhase::AwaitingRequest.gate_state(),
            GateState::Synchronized
        );
    }
}
