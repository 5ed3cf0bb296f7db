//! Deployment state machine
//!
//! States are strictly ordered and never move backwards:
//! `pending → cloning → detecting → allocating → building → deploying → deployed`,
//! with `failed` reachable from any non-terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle state of a single deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    Pending,
    Cloning,
    Detecting,
    Allocating,
    Building,
    Deploying,
    Deployed,
    Failed,
}

/// Rejected attempt to move a deployment to a state out of order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal deployment state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: DeploymentState,
    pub to: DeploymentState,
}

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Cloning => "cloning",
            DeploymentState::Detecting => "detecting",
            DeploymentState::Allocating => "allocating",
            DeploymentState::Building => "building",
            DeploymentState::Deploying => "deploying",
            DeploymentState::Deployed => "deployed",
            DeploymentState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Deployed | DeploymentState::Failed)
    }

    /// The single forward step after this state on the success path
    pub fn next(&self) -> Option<DeploymentState> {
        match self {
            DeploymentState::Pending => Some(DeploymentState::Cloning),
            DeploymentState::Cloning => Some(DeploymentState::Detecting),
            DeploymentState::Detecting => Some(DeploymentState::Allocating),
            DeploymentState::Allocating => Some(DeploymentState::Building),
            DeploymentState::Building => Some(DeploymentState::Deploying),
            DeploymentState::Deploying => Some(DeploymentState::Deployed),
            DeploymentState::Deployed | DeploymentState::Failed => None,
        }
    }

    pub fn can_transition_to(&self, to: DeploymentState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == DeploymentState::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current state of one run and enforces legal transitions
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: DeploymentState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: DeploymentState::Pending,
        }
    }

    pub fn current(&self) -> DeploymentState {
        self.current
    }

    /// Moves to `to`, rejecting any transition that skips or rewinds a step
    pub fn advance(&mut self, to: DeploymentState) -> Result<DeploymentState, InvalidTransition> {
        if !self.current.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.current,
                to,
            });
        }
        self.current = to;
        Ok(to)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_success_path() {
        let mut sm = StateMachine::new();
        for state in [
            DeploymentState::Cloning,
            DeploymentState::Detecting,
            DeploymentState::Allocating,
            DeploymentState::Building,
            DeploymentState::Deploying,
            DeploymentState::Deployed,
        ] {
            assert!(sm.advance(state).is_ok());
        }
        assert_eq!(sm.current(), DeploymentState::Deployed);
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal_state() {
        let mut state = DeploymentState::Pending;
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(DeploymentState::Failed));
            state = next;
        }
    }

    #[test]
    fn test_rejects_skipping_steps() {
        let mut sm = StateMachine::new();
        let err = sm.advance(DeploymentState::Building).unwrap_err();
        assert_eq!(err.from, DeploymentState::Pending);
        assert_eq!(err.to, DeploymentState::Building);
        assert_eq!(sm.current(), DeploymentState::Pending);
    }

    #[test]
    fn test_rejects_backward_transitions() {
        let mut sm = StateMachine::new();
        sm.advance(DeploymentState::Cloning).unwrap();
        sm.advance(DeploymentState::Detecting).unwrap();
        assert!(sm.advance(DeploymentState::Cloning).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut sm = StateMachine::new();
        sm.advance(DeploymentState::Failed).unwrap();
        assert!(sm.advance(DeploymentState::Failed).is_err());
        assert!(sm.advance(DeploymentState::Cloning).is_err());
    }

    #[test]
    fn test_serializes_lowercase() {
        let json = serde_json::to_string(&DeploymentState::Allocating).unwrap();
        assert_eq!(json, "\"allocating\"");
    }
}
