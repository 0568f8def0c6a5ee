//! Credential lifecycle state machine
//!
//! Pure transition function: receives the current state and an event,
//! returns the next state. `CredentialManager` performs the I/O each state
//! implies and feeds the outcome back in as an event.
//!
//! ```text
//! Uninitialized --Loaded{fresh}--> Valid | Expired
//! Uninitialized --NothingStored--> AwaitingConsent
//! Valid --ExpiryPassed / Invalidated--> Expired
//! Expired --RefreshAvailable--> Refreshing --RefreshSucceeded--> Valid
//! Expired --NoRefreshToken--> AwaitingConsent
//! Refreshing --RefreshFailed--> AwaitingConsent
//! AwaitingConsent --ConsentGranted--> Valid
//! AwaitingConsent --ConsentAbandoned--> Expired
//! any --Fault--> Dead
//! any --Reset--> Uninitialized
//! ```

use std::fmt;

/// Lifecycle states of the managed credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialState {
    /// Nothing loaded from the store yet
    Uninitialized,
    /// Holding a non-expired access token
    Valid,
    /// Access token expired or rejected upstream
    Expired,
    /// Refresh grant in flight
    Refreshing,
    /// Interactive consent in flight
    AwaitingConsent,
    /// Unrecoverable failure; only `Reset` leaves this state
    Dead,
}

impl CredentialState {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialState::Uninitialized => "uninitialized",
            CredentialState::Valid => "valid",
            CredentialState::Expired => "expired",
            CredentialState::Refreshing => "refreshing",
            CredentialState::AwaitingConsent => "awaiting_consent",
            CredentialState::Dead => "dead",
        }
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcomes observed by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Store returned a credential; `fresh` when its access token is unexpired
    Loaded { fresh: bool },
    /// Store has no credential
    NothingStored,
    /// Current time passed the credential's expiry
    ExpiryPassed,
    /// Upstream rejected the current access token
    Invalidated,
    /// Expired credential carries a refresh token
    RefreshAvailable,
    /// Expired credential has no refresh token
    NoRefreshToken,
    RefreshSucceeded,
    /// Refresh exhausted its attempts
    RefreshFailed,
    ConsentGranted,
    /// Timeout, cancellation, denial, or no free port; retryable
    ConsentAbandoned,
    /// Unexpected I/O or protocol error
    Fault,
    Reset,
}

/// Handle a state transition. Pure function: no I/O.
///
/// Events that make no sense in the current state leave it unchanged.
pub fn transition(state: CredentialState, event: LifecycleEvent) -> CredentialState {
    use CredentialState as S;
    use LifecycleEvent as E;

    match (state, event) {
        (_, E::Reset) => S::Uninitialized,
        (S::Dead, _) => S::Dead,
        (_, E::Fault) => S::Dead,

        (S::Uninitialized, E::Loaded { fresh: true }) => S::Valid,
        (S::Uninitialized, E::Loaded { fresh: false }) => S::Expired,
        (S::Uninitialized, E::NothingStored) => S::AwaitingConsent,

        (S::Valid, E::ExpiryPassed | E::Invalidated) => S::Expired,

        (S::Expired, E::RefreshAvailable) => S::Refreshing,
        (S::Expired, E::NoRefreshToken) => S::AwaitingConsent,

        (S::Refreshing, E::RefreshSucceeded) => S::Valid,
        (S::Refreshing, E::RefreshFailed) => S::AwaitingConsent,

        (S::AwaitingConsent, E::ConsentGranted) => S::Valid,
        (S::AwaitingConsent, E::ConsentAbandoned) => S::Expired,

        (state, _) => state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CredentialState as S;
    use LifecycleEvent as E;

    const ALL_STATES: [CredentialState; 6] = [
        S::Uninitialized,
        S::Valid,
        S::Expired,
        S::Refreshing,
        S::AwaitingConsent,
        S::Dead,
    ];

    #[test]
    fn load_paths_from_uninitialized() {
        assert_eq!(transition(S::Uninitialized, E::Loaded { fresh: true }), S::Valid);
        assert_eq!(transition(S::Uninitialized, E::Loaded { fresh: false }), S::Expired);
        assert_eq!(transition(S::Uninitialized, E::NothingStored), S::AwaitingConsent);
    }

    #[test]
    fn refresh_path() {
        let s = transition(S::Valid, E::ExpiryPassed);
        assert_eq!(s, S::Expired);
        let s = transition(s, E::RefreshAvailable);
        assert_eq!(s, S::Refreshing);
        assert_eq!(transition(s, E::RefreshSucceeded), S::Valid);
        assert_eq!(transition(s, E::RefreshFailed), S::AwaitingConsent);
    }

    #[test]
    fn consent_path() {
        assert_eq!(transition(S::Expired, E::NoRefreshToken), S::AwaitingConsent);
        assert_eq!(transition(S::AwaitingConsent, E::ConsentGranted), S::Valid);
        assert_eq!(transition(S::AwaitingConsent, E::ConsentAbandoned), S::Expired);
    }

    #[test]
    fn invalidation_only_expires_valid() {
        assert_eq!(transition(S::Valid, E::Invalidated), S::Expired);
        assert_eq!(transition(S::Refreshing, E::Invalidated), S::Refreshing);
        assert_eq!(transition(S::AwaitingConsent, E::Invalidated), S::AwaitingConsent);
    }

    #[test]
    fn fault_from_any_live_state_is_dead() {
        for state in ALL_STATES {
            assert_eq!(transition(state, E::Fault), S::Dead, "from {state}");
        }
    }

    #[test]
    fn dead_is_terminal_until_reset() {
        let events = [
            E::Loaded { fresh: true },
            E::NothingStored,
            E::ExpiryPassed,
            E::RefreshAvailable,
            E::RefreshSucceeded,
            E::ConsentGranted,
            E::ConsentAbandoned,
        ];
        for event in events {
            assert_eq!(transition(S::Dead, event), S::Dead, "on {event:?}");
        }
        assert_eq!(transition(S::Dead, E::Reset), S::Uninitialized);
    }

    #[test]
    fn reset_from_every_state() {
        for state in ALL_STATES {
            assert_eq!(transition(state, E::Reset), S::Uninitialized, "from {state}");
        }
    }

    #[test]
    fn unrelated_events_leave_state_unchanged() {
        assert_eq!(transition(S::Valid, E::RefreshSucceeded), S::Valid);
        assert_eq!(transition(S::Expired, E::ConsentGranted), S::Expired);
        assert_eq!(transition(S::Uninitialized, E::ExpiryPassed), S::Uninitialized);
    }

    #[test]
    fn labels_are_snake_case() {
        assert_eq!(S::AwaitingConsent.to_string(), "awaiting_consent");
        assert_eq!(S::Dead.label(), "dead");
    }
}
