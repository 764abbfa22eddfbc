//! Status machines: fixed state sets with an explicit transition allow-list.
//!
//! Every lifecycle entity (item, order, invoice, subscription) has a status
//! type implementing [`StatusMachine`]. The allow-list is an immutable static
//! table owned by the type; there is no shared mutable rule state.
//!
//! Requesting a transition yields a [`Transition`] descriptor that stores use
//! for their conditional update (`... WHERE status = from`). An identity
//! request fails with [`DomainError::EqualState`], which callers normally treat
//! as a benign no-op. Anything outside the table fails with
//! [`DomainError::IllegalTransition`] and must never be silently ignored.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// A finite state set with an allow-list of transitions.
pub trait StatusMachine:
    Copy + Eq + core::fmt::Debug + core::fmt::Display + Send + Sync + 'static
{
    /// Machine name used in errors and logs ("order", "invoice", ...).
    const MACHINE: &'static str;

    /// Every state of the machine.
    const ALL: &'static [Self];

    /// Allowed `(from, to)` pairs. Identity pairs are implicit.
    const TRANSITIONS: &'static [(Self, Self)];

    /// Whether `self -> to` is allowed. Identity is always allowed as a no-op.
    fn can_transition(self, to: Self) -> bool {
        self == to || Self::TRANSITIONS.contains(&(self, to))
    }

    /// States reachable from `self` in one step.
    fn successors(self) -> impl Iterator<Item = Self> {
        Self::TRANSITIONS
            .iter()
            .filter(move |(from, _)| *from == self)
            .map(|(_, to)| *to)
    }

    /// A state with no outgoing transitions.
    fn is_terminal(self) -> bool {
        self.successors().next().is_none()
    }
}

/// A validated, not-yet-persisted state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition<S> {
    from: S,
    to: S,
}

impl<S: StatusMachine> Transition<S> {
    /// Validate `from -> to` against the machine's table.
    pub fn request(from: S, to: S) -> DomainResult<Self> {
        if from == to {
            return Err(DomainError::EqualState {
                machine: S::MACHINE,
                state: from.to_string(),
            });
        }
        if !from.can_transition(to) {
            return Err(DomainError::IllegalTransition {
                machine: S::MACHINE,
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(Self { from, to })
    }

    /// Like [`Transition::request`], but maps an equal-state request to `None`.
    pub fn request_or_noop(from: S, to: S) -> DomainResult<Option<Self>> {
        match Self::request(from, to) {
            Ok(transition) => Ok(Some(transition)),
            Err(e) if e.is_equal_state() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// State the store must observe for the update to apply.
    pub fn from(&self) -> S {
        self.from
    }

    pub fn to(&self) -> S {
        self.to
    }
}

impl<S: StatusMachine> core::fmt::Display for Transition<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {} -> {}", S::MACHINE, self.from, self.to)
    }
}
