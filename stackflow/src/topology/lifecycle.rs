//! Per-unit lifecycle tracking.

use super::UnitOutputs;
use crate::core::UnitState;
use crate::errors::LifecycleError;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};

/// A recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// The state left.
    pub from: UnitState,
    /// The state entered.
    pub to: UnitState,
    /// When the change happened.
    pub at: Timestamp,
}

/// Lifecycle state of one unit plus its committed outputs.
///
/// Outputs are only committed on the transition into `Provisioned` and are
/// only readable while the unit stays there.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitLifecycle {
    state: UnitState,
    outputs: Option<UnitOutputs>,
    last_error: Option<String>,
    history: Vec<Transition>,
}

impl UnitLifecycle {
    /// Creates a lifecycle in the `Declared` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Outputs, if the unit is provisioned.
    #[must_use]
    pub fn outputs(&self) -> Option<&UnitOutputs> {
        if self.state.exposes_outputs() {
            self.outputs.as_ref()
        } else {
            None
        }
    }

    /// The error recorded by the last failed transition.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// All recorded transitions, oldest first.
    #[must_use]
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Moves to `next`, enforcing the unit state machine.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if the transition is not legal.
    pub fn transition(&mut self, unit: &str, next: UnitState) -> Result<UnitState, LifecycleError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(LifecycleError::new(unit, from, next));
        }
        self.state = next;
        self.history.push(Transition {
            from,
            to: next,
            at: crate::utils::now_utc(),
        });
        if next == UnitState::Destroyed {
            self.outputs = None;
        }
        Ok(from)
    }

    /// Commits outputs and enters `Provisioned`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] unless the unit is provisioning or updating.
    pub fn complete(
        &mut self,
        unit: &str,
        outputs: UnitOutputs,
    ) -> Result<UnitState, LifecycleError> {
        let from = self.transition(unit, UnitState::Provisioned)?;
        self.outputs = Some(outputs);
        self.last_error = None;
        Ok(from)
    }

    /// Records a failure and enters `Failed`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if the unit is not in flight.
    pub fn fail(
        &mut self,
        unit: &str,
        error: impl Into<String>,
    ) -> Result<UnitState, LifecycleError> {
        let from = self.transition(unit, UnitState::Failed)?;
        self.last_error = Some(error.into());
        Ok(from)
    }
}
