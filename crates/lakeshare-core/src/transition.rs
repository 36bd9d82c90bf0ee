//! The transition table primitive shared by both state machines.
//!
//! A [`Transition`] names one action and lists the `(source, target)` pairs it
//! may take. One action can carry several disjoint mappings at once, which is
//! what lets a single action be applied in bulk to items sitting in
//! different states.

use std::fmt;

use crate::error::{CoreError, Result};

/// Outcome of checking a state against a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// The state already is one of the action's targets; nothing to do.
    NoOp,
    /// The state is an allowed source and the action will move it.
    Legal,
}

/// One named action and its `(source, target)` rules.
#[derive(Debug, Clone, Copy)]
pub struct Transition<S: 'static> {
    name: &'static str,
    rules: &'static [(S, S)],
}

impl<S> Transition<S>
where
    S: Copy + Eq + fmt::Display + 'static,
{
    /// Build a transition from its rules.
    pub const fn new(name: &'static str, rules: &'static [(S, S)]) -> Self {
        Self { name, rules }
    }

    /// The action name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Distinct target states, in rule order.
    pub fn targets(&self) -> Vec<S> {
        let mut out: Vec<S> = Vec::new();
        for (_, target) in self.rules {
            if !out.contains(target) {
                out.push(*target);
            }
        }
        out
    }

    /// Distinct allowed source states, in rule order.
    pub fn sources(&self) -> Vec<S> {
        let mut out: Vec<S> = Vec::new();
        for (source, _) in self.rules {
            if !out.contains(source) {
                out.push(*source);
            }
        }
        out
    }

    /// Check whether the action applies to `prev`.
    ///
    /// Target states are checked first so re-applying an action is always
    /// a no-op, even when the target is also listed as a source.
    pub fn validate(&self, prev: S) -> Result<Validity> {
        if self.rules.iter().any(|(_, target)| *target == prev) {
            return Ok(Validity::NoOp);
        }
        if self.rules.iter().any(|(source, _)| *source == prev) {
            return Ok(Validity::Legal);
        }
        Err(self.illegal(prev))
    }

    /// Compute the state after applying the action to `prev`.
    pub fn resolve(&self, prev: S) -> Result<S> {
        match self.validate(prev)? {
            Validity::NoOp => Ok(prev),
            Validity::Legal => self
                .rules
                .iter()
                .find(|(source, _)| *source == prev)
                .map(|(_, target)| *target)
                .ok_or_else(|| self.illegal(prev)),
        }
    }

    fn illegal(&self, prev: S) -> CoreError {
        CoreError::IllegalTransition {
            action: self.name.to_string(),
            state: prev.to_string(),
            targets: self.targets().iter().map(|t| t.to_string()).collect(),
        }
    }
}
