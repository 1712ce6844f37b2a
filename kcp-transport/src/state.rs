//! Peer finite-state machine.
//!
//! ```text
//!  Connected ──Handshake (4-byte cookie)──▶ Authority
//!      │                                       │
//!      │  disconnect / timeout / dead link /   │
//!      │  queue overflow / protocol error      │
//!      ▼                                       ▼
//!  Disconnected ◀──────────────────────────────┘
//! ```
//!
//! Transitions live in [`crate::peer`]; this module only names the states.
//! States only move forward and `Disconnected` is terminal.

/// Lifecycle state of one [`crate::peer::Peer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// Handshake sent, remote cookie not yet known.
    #[default]
    Connected,
    /// Remote cookie verified; application traffic flows.
    Authority,
    /// Terminal.
    Disconnected,
}

impl PeerState {
    /// `true` once the handshake completed and before disconnect.
    pub fn is_authenticated(self) -> bool {
        self == PeerState::Authority
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: PeerState) -> bool {
        matches!(
            (self, next),
            (PeerState::Connected, PeerState::Authority)
                | (PeerState::Connected, PeerState::Disconnected)
                | (PeerState::Authority, PeerState::Disconnected)
        )
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
