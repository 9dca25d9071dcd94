use serde::{Deserialize, Serialize};
use statig::prelude::*;

use super::types::{EnrolleeState, SessionId};
use crate::error::EasySetupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnrolleeEvent {
    OnBoardStart,
    OnBoardSuccess,
    OnBoardFailure,
    ProvisionSuccess,
    ProvisionFailure,
    OwnershipTransferRequested,
    FactoryResetRequested,
}

/// Storage shared by every state of the enrollee machine.
///
/// `current` mirrors the active statig state and `transitions` counts accepted
/// edges, so the wrapper can tell a rejected event from an accepted one.
#[derive(Debug)]
pub struct EnrolleeLifecycle {
    session_id: SessionId,
    current: EnrolleeState,
    transitions: u64,
}

impl EnrolleeLifecycle {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            current: EnrolleeState::Init,
            transitions: 0,
        }
    }

    fn enter(&mut self, next: EnrolleeState, target: State) -> Outcome<State> {
        tracing::debug!(
            session_id = %self.session_id,
            from = %self.current,
            to = %next,
            "Enrollee state transition"
        );
        self.current = next;
        self.transitions += 1;
        Transition(target)
    }

    fn absorb(&self, event: &EnrolleeEvent) -> Outcome<State> {
        tracing::debug!(
            session_id = %self.session_id,
            state = %self.current,
            event = ?event,
            "Terminal state ignores event"
        );
        Handled
    }
}

#[state_machine(initial = "State::idle()")]
impl EnrolleeLifecycle {
    /// Escape transitions shared by every non-terminal state.
    #[superstate]
    fn active(&mut self, event: &EnrolleeEvent) -> Outcome<State> {
        match event {
            EnrolleeEvent::OwnershipTransferRequested => {
                self.enter(EnrolleeState::OwnershipTransfer, State::ownership_transfer())
            }
            EnrolleeEvent::FactoryResetRequested => {
                self.enter(EnrolleeState::FactoryReset, State::factory_reset())
            }
            _ => Handled,
        }
    }

    /// INIT
    #[state(superstate = "active")]
    fn idle(&mut self, event: &EnrolleeEvent) -> Outcome<State> {
        match event {
            EnrolleeEvent::OnBoardStart => {
                self.enter(EnrolleeState::OnBoarding, State::on_boarding())
            }
            _ => Super,
        }
    }

    #[state(superstate = "active")]
    fn on_boarding(&mut self, event: &EnrolleeEvent) -> Outcome<State> {
        match event {
            EnrolleeEvent::OnBoardSuccess => {
                self.enter(EnrolleeState::Provisioning, State::provisioning())
            }
            EnrolleeEvent::OnBoardFailure => {
                self.enter(EnrolleeState::ProvisioningFailed, State::provisioning_failed())
            }
            _ => Super,
        }
    }

    #[state(superstate = "active")]
    fn provisioning(&mut self, event: &EnrolleeEvent) -> Outcome<State> {
        match event {
            EnrolleeEvent::ProvisionSuccess => {
                self.enter(EnrolleeState::ProvisioningSuccess, State::provisioning_success())
            }
            EnrolleeEvent::ProvisionFailure => {
                self.enter(EnrolleeState::ProvisioningFailed, State::provisioning_failed())
            }
            _ => Super,
        }
    }

    #[state(superstate = "active")]
    fn ownership_transfer(&mut self, event: &EnrolleeEvent) -> Outcome<State> {
        match event {
            // Already transferring; a second request is not a new edge.
            EnrolleeEvent::OwnershipTransferRequested => Handled,
            _ => Super,
        }
    }

    #[state]
    fn provisioning_success(&mut self, event: &EnrolleeEvent) -> Outcome<State> {
        self.absorb(event)
    }

    #[state]
    fn provisioning_failed(&mut self, event: &EnrolleeEvent) -> Outcome<State> {
        self.absorb(event)
    }

    #[state]
    fn factory_reset(&mut self, event: &EnrolleeEvent) -> Outcome<State> {
        self.absorb(event)
    }
}

/// Transition guard over a single enrollee.
///
/// Events without an edge out of the current state are rejected with
/// [`EasySetupError::InvalidTransition`] and leave the state untouched.
pub struct EnrolleeStateMachine {
    machine: StateMachine<EnrolleeLifecycle>,
}

impl EnrolleeStateMachine {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            machine: EnrolleeLifecycle::new(session_id).state_machine(),
        }
    }

    pub fn state(&self) -> EnrolleeState {
        self.machine.inner().current
    }

    pub fn transition(&mut self, event: EnrolleeEvent) -> Result<EnrolleeState, EasySetupError> {
        let from = self.state();
        let accepted_before = self.machine.inner().transitions;

        self.machine.handle(&event);

        if self.machine.inner().transitions == accepted_before {
            tracing::warn!(
                session_id = %self.machine.inner().session_id,
                state = %from,
                event = ?event,
                "Rejected invalid enrollee transition"
            );
            return Err(EasySetupError::InvalidTransition { from, event });
        }

        Ok(self.state())
    }
}
