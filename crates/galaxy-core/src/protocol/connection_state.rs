//! Linear Connection State Machine
//!
//! One [`ConnectionState`] per remote device. A state is consumed by
//! [`ConnectionState::transition`], which returns the next state together with
//! the effects the engine must carry out and an audit entry. Events that make
//! no sense for the current state return [`StateTransitionError`]; the engine
//! treats those as stale input from an already-resolved handshake.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceCode, Timestamp};

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// We dialed; channel not yet open or request not yet sent
    Dialing(DialingState),
    /// Remote dialed us; waiting for its pair-request
    Incoming(IncomingState),
    /// Handshake in flight
    Pending(PendingState),
    /// Handshake complete; transfers allowed
    Paired(PairedState),
    /// Terminal
    Closed(ClosedState),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialingState {
    pub code: DeviceCode,
    pub started: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingState {
    pub code: DeviceCode,
    pub opened: Timestamp,
}

/// Who the pending handshake is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Awaiting {
    /// Our pair-request is out; waiting for accept or reject
    Remote,
    /// Untrusted request received; waiting for the local user
    LocalDecision,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingState {
    pub code: DeviceCode,
    pub since: Timestamp,
    pub awaiting: Awaiting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedState {
    pub code: DeviceCode,
    pub paired_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Rejected,
    LocalDisconnect,
    ChannelClosed,
    ProtocolViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedState {
    pub code: DeviceCode,
    pub closed_at: Timestamp,
    pub reason: CloseReason,
}

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Our pair-request went out on a freshly opened channel
    RequestSent,
    /// Remote pair-request; `trusted` if we trust it or it claims mutual trust
    RequestReceived { trusted: bool },
    AcceptReceived,
    RejectReceived,
    LocalAccept,
    LocalReject,
    /// First message on an incoming channel was not a pair-request
    ProtocolViolation,
    ChannelClosed,
    Disconnect,
}

// ----------------------------------------------------------------------------
// State Transition Results
// ----------------------------------------------------------------------------

/// Notifications raised to the event surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingNotice {
    Prompt,
    Connected,
    Paired,
    Rejected,
    Disconnected,
}

/// Work the engine performs after a transition, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEffect {
    SendAccept,
    SendReject,
    PersistTrust,
    OpenTransferLane,
    Notify(PairingNotice),
    CloseChannel { after_grace: bool },
    Discard,
}

#[derive(Debug, Clone)]
pub struct StateTransition {
    pub new_state: ConnectionState,
    pub effects: Vec<ConnectionEffect>,
    pub audit_entry: AuditEntry,
}

/// Audit trail entry for state transitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub code: DeviceCode,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl ConnectionState {
    pub fn new_dialing(code: DeviceCode) -> Self {
        ConnectionState::Dialing(DialingState {
            code,
            started: Timestamp::now(),
        })
    }

    pub fn new_incoming(code: DeviceCode) -> Self {
        ConnectionState::Incoming(IncomingState {
            code,
            opened: Timestamp::now(),
        })
    }

    pub fn code(&self) -> &DeviceCode {
        match self {
            ConnectionState::Dialing(s) => &s.code,
            ConnectionState::Incoming(s) => &s.code,
            ConnectionState::Pending(s) => &s.code,
            ConnectionState::Paired(s) => &s.code,
            ConnectionState::Closed(s) => &s.code,
        }
    }

    /// Get current state name for logging/audit
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Dialing(_) => "Dialing",
            ConnectionState::Incoming(_) => "Incoming",
            ConnectionState::Pending(_) => "Pending",
            ConnectionState::Paired(_) => "Paired",
            ConnectionState::Closed(_) => "Closed",
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, ConnectionState::Paired(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }

    /// Our own dial that the remote has not answered yet
    pub fn is_unanswered_dial(&self) -> bool {
        matches!(
            self,
            ConnectionState::Dialing(_)
                | ConnectionState::Pending(PendingState {
                    awaiting: Awaiting::Remote,
                    ..
                })
        )
    }

    /// Whether a local accept/reject decision is outstanding
    pub fn awaits_local_decision(&self) -> bool {
        matches!(
            self,
            ConnectionState::Pending(PendingState {
                awaiting: Awaiting::LocalDecision,
                ..
            })
        )
    }

    /// Process an event and transition to new state (consumes self)
    pub fn transition(
        self,
        event: ConnectionEvent,
    ) -> Result<StateTransition, StateTransitionError> {
        use ConnectionEffect::*;

        let code = self.code().clone();
        let from_state = self.state_name().to_string();
        let event_name = format!("{:?}", event);
        let now = Timestamp::now();

        let paired = || {
            ConnectionState::Paired(PairedState {
                code: code.clone(),
                paired_at: now,
            })
        };
        let closed = |reason| {
            ConnectionState::Closed(ClosedState {
                code: code.clone(),
                closed_at: now,
                reason,
            })
        };

        let (new_state, effects) = match (self, event) {
            (ConnectionState::Dialing(_), ConnectionEvent::RequestSent) => (
                ConnectionState::Pending(PendingState {
                    code: code.clone(),
                    since: now,
                    awaiting: Awaiting::Remote,
                }),
                Vec::new(),
            ),

            (
                ConnectionState::Dialing(_) | ConnectionState::Incoming(_),
                ConnectionEvent::RequestReceived { trusted: true },
            ) => (
                paired(),
                vec![
                    SendAccept,
                    PersistTrust,
                    OpenTransferLane,
                    Notify(PairingNotice::Connected),
                ],
            ),

            (
                ConnectionState::Dialing(_) | ConnectionState::Incoming(_),
                ConnectionEvent::RequestReceived { trusted: false },
            ) => (
                ConnectionState::Pending(PendingState {
                    code: code.clone(),
                    since: now,
                    awaiting: Awaiting::LocalDecision,
                }),
                vec![Notify(PairingNotice::Prompt)],
            ),

            (
                ConnectionState::Dialing(_) | ConnectionState::Pending(_),
                ConnectionEvent::AcceptReceived,
            ) => (
                paired(),
                vec![
                    PersistTrust,
                    OpenTransferLane,
                    Notify(PairingNotice::Paired),
                ],
            ),

            (
                ConnectionState::Dialing(_) | ConnectionState::Pending(_),
                ConnectionEvent::RejectReceived,
            ) => (
                closed(CloseReason::Rejected),
                vec![
                    Notify(PairingNotice::Rejected),
                    CloseChannel { after_grace: false },
                    Discard,
                ],
            ),

            (ConnectionState::Pending(state), ConnectionEvent::LocalAccept)
                if state.awaiting == Awaiting::LocalDecision =>
            {
                (
                    paired(),
                    vec![
                        SendAccept,
                        PersistTrust,
                        OpenTransferLane,
                        Notify(PairingNotice::Connected),
                    ],
                )
            }

            (ConnectionState::Pending(state), ConnectionEvent::LocalReject)
                if state.awaiting == Awaiting::LocalDecision =>
            {
                (
                    closed(CloseReason::Rejected),
                    vec![SendReject, CloseChannel { after_grace: true }, Discard],
                )
            }

            (ConnectionState::Incoming(_), ConnectionEvent::ProtocolViolation) => (
                closed(CloseReason::ProtocolViolation),
                vec![CloseChannel { after_grace: false }, Discard],
            ),

            (state, ConnectionEvent::ChannelClosed) if !state.is_closed() => (
                closed(CloseReason::ChannelClosed),
                vec![Notify(PairingNotice::Disconnected), Discard],
            ),

            (state, ConnectionEvent::Disconnect) if !state.is_closed() => (
                closed(CloseReason::LocalDisconnect),
                vec![
                    CloseChannel { after_grace: false },
                    Notify(PairingNotice::Disconnected),
                    Discard,
                ],
            ),

            // Invalid transitions
            (_state, event) => {
                return Err(StateTransitionError::InvalidTransition {
                    from_state: from_state.clone(),
                    event: event_name,
                    reason: format!("Event {:?} not valid for state {}", event, from_state),
                });
            }
        };

        let audit_entry = AuditEntry {
            timestamp: now,
            code,
            from_state,
            to_state: new_state.state_name().to_string(),
            event: event_name,
        };

        Ok(StateTransition {
            new_state,
            effects,
            audit_entry,
        })
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    InvalidTransition {
        from_state: String,
        event: String,
        reason: String,
    },
}

impl fmt::Display for StateTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateTransitionError::InvalidTransition {
                from_state,
                event,
                reason,
            } => write!(
                f,
                "Invalid transition from {} on event {}: {}",
                from_state, event, reason
            ),
        }
    }
}

impl std::error::Error for StateTransitionError {}
