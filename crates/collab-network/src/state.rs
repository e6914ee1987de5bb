//! Explicit per-peer negotiation state machine (spec §9, replacing ad-hoc
//! promise chains with `Idle -> Offering -> GatheringLocal -> Offered ->
//! Answered -> Connected -> Closing -> Closed`, symmetric for the responder
//! via `Offered` reached directly from `Idle`).

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerConnState {
    Idle,
    Offering,
    GatheringLocal,
    Offered,
    Answered,
    Connected,
    Closing,
    Closed,
}

#[derive(Debug, thiserror::Error)]
#[error("illegal peer connection state transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: PeerConnState,
    pub to: PeerConnState,
}

impl PeerConnState {
    /// Validates and performs a transition, returning the new state.
    pub fn transition(self, to: PeerConnState) -> Result<PeerConnState, IllegalTransition> {
        use PeerConnState::{Answered, Closed, Closing, Connected, GatheringLocal, Idle, Offered, Offering};

        let allowed = matches!(
            (self, to),
            (Idle, Offering)
                | (Idle, Offered) // responder: offer arrives with no prior state
                | (Offering, GatheringLocal)
                | (GatheringLocal, Offered)
                | (Offered, Answered) // initiator: received the answer
                | (Offered, Connected) // responder: answer sent, channel opens
                | (Answered, Connected)
                | (_, Closing)
                | (Closing, Closed)
                | (_, Closed) // a transport-fatal event can short-circuit straight to Closed
        );
        if allowed {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerConnState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiator_happy_path() {
        let mut s = PeerConnState::Idle;
        for next in [
            PeerConnState::Offering,
            PeerConnState::GatheringLocal,
            PeerConnState::Offered,
            PeerConnState::Answered,
            PeerConnState::Connected,
            PeerConnState::Closing,
            PeerConnState::Closed,
        ] {
            s = s.transition(next).unwrap();
        }
        assert_eq!(s, PeerConnState::Closed);
    }

    #[test]
    fn responder_happy_path() {
        let mut s = PeerConnState::Idle;
        s = s.transition(PeerConnState::Offered).unwrap();
        s = s.transition(PeerConnState::Connected).unwrap();
        assert_eq!(s, PeerConnState::Connected);
    }

    #[test]
    fn any_state_can_close_immediately() {
        assert!(PeerConnState::Offering.transition(PeerConnState::Closed).is_ok());
        assert!(PeerConnState::Connected.transition(PeerConnState::Closed).is_ok());
    }

    #[test]
    fn closed_cannot_reopen() {
        assert!(PeerConnState::Closed.transition(PeerConnState::Offering).is_err());
    }
}
