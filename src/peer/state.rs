use std::fmt;

/// Negotiation progress of one connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    /// Created, no descriptors set
    Idle,
    /// Host: local offer created and transmitted
    OfferSent,
    /// Viewer: remote offer applied
    OfferReceived,
    /// Viewer: answer created and set as local description
    AnswerPending,
    /// ICE connectivity reported by the transport
    Connected,
    /// Terminal
    Closed,
}

impl NegotiationState {
    pub fn is_closed(self) -> bool {
        self == NegotiationState::Closed
    }

    /// States with a negotiation in flight, subject to the optional timeout.
    pub fn is_negotiating(self) -> bool {
        matches!(
            self,
            NegotiationState::OfferSent
                | NegotiationState::OfferReceived
                | NegotiationState::AnswerPending
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::OfferSent => "offer-sent",
            NegotiationState::OfferReceived => "offer-received",
            NegotiationState::AnswerPending => "answer-pending",
            NegotiationState::Connected => "connected",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}
