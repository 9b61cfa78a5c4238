//! Core value types shared by the dynamics, integration and manifold modules.

use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};

use crate::error::{Cr3bpError, Result};

/// Dimension of a Cartesian CR3BP state.
pub const STATE_DIM: usize = 6;
/// Dimension of a state augmented with its row-major 6×6 state-transition matrix.
pub const AUGMENTED_DIM: usize = STATE_DIM + STATE_DIM * STATE_DIM;

/// Position and velocity (x, y, z, vx, vy, vz) in the rotating, nondimensional frame.
pub type CartesianState = Vector6<f64>;

/// State-transition matrix Φ(t, t0).
pub type StateTransitionMatrix = Matrix6<f64>;

/// Builds the 42-component augmented state `[x | Φ]` with Φ(0) = I.
pub fn augmented_state(state: &CartesianState) -> Vec<f64> {
    let mut augmented = vec![0.0; AUGMENTED_DIM];
    augmented[..STATE_DIM].copy_from_slice(state.as_slice());
    for i in 0..STATE_DIM {
        augmented[STATE_DIM + i * STATE_DIM + i] = 1.0;
    }
    augmented
}

/// Splits an augmented state back into the Cartesian state and Φ.
pub fn split_augmented(augmented: &[f64]) -> Result<(CartesianState, StateTransitionMatrix)> {
    if augmented.len() != AUGMENTED_DIM {
        return Err(Cr3bpError::InvalidInput(format!(
            "Augmented state must have {} components, got {}.",
            AUGMENTED_DIM,
            augmented.len()
        )));
    }
    let state = CartesianState::from_column_slice(&augmented[..STATE_DIM]);
    let stm = StateTransitionMatrix::from_row_slice(&augmented[STATE_DIM..]);
    Ok((state, stm))
}

/// Integration interval. `end < start` means backward integration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: f64,
    pub end: f64,
}

impl TimeSpan {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Span starting at zero and lasting `duration` (negative for backward).
    pub fn from_zero(duration: f64) -> Self {
        Self::new(0.0, duration)
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// +1.0 for forward integration, -1.0 for backward.
    pub fn direction(&self) -> f64 {
        if self.end >= self.start {
            1.0
        } else {
            -1.0
        }
    }

    pub fn reversed(&self) -> Self {
        Self::new(self.end, self.start)
    }
}

/// Direction of time in which a manifold strand is propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeDirection {
    Forward,
    Backward,
}

impl TimeDirection {
    pub fn sign(self) -> f64 {
        match self {
            TimeDirection::Forward => 1.0,
            TimeDirection::Backward => -1.0,
        }
    }
}

/// Absolute and relative error bounds for adaptive integration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    pub abs_tol: f64,
    pub rel_tol: f64,
}

impl Tolerances {
    pub fn new(abs_tol: f64, rel_tol: f64) -> Self {
        Self { abs_tol, rel_tol }
    }

    pub fn uniform(tol: f64) -> Self {
        Self::new(tol, tol)
    }

    /// Never looser than `ceiling` in either component.
    pub fn tightened(&self, ceiling: f64) -> Self {
        Self::new(self.abs_tol.min(ceiling), self.rel_tol.min(ceiling))
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self::uniform(1e-12)
    }
}

/// Which states an integration call records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Sampling {
    /// `points` evenly spaced save points including both ends of the span.
    Uniform { points: usize },
    /// Every accepted adaptive step.
    #[default]
    Steps,
    /// Initial and final state only.
    Endpoints,
}

/// Time-ordered states produced by one integration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub dimension: usize,
    pub times: Vec<f64>,
    pub states: Vec<Vec<f64>>,
}

impl Trajectory {
    pub(crate) fn with_capacity(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            times: Vec::with_capacity(capacity),
            states: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, t: f64, state: &[f64]) {
        self.times.push(t);
        self.states.push(state.to_vec());
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn initial_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    pub fn final_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    pub fn initial_state(&self) -> Option<&[f64]> {
        self.states.first().map(Vec::as_slice)
    }

    pub fn final_state(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }

    /// Position/velocity part of sample `index`.
    pub fn cartesian(&self, index: usize) -> Option<CartesianState> {
        self.states
            .get(index)
            .filter(|state| state.len() >= STATE_DIM)
            .map(|state| CartesianState::from_column_slice(&state[..STATE_DIM]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &[f64])> + '_ {
        self.times
            .iter()
            .copied()
            .zip(self.states.iter().map(Vec::as_slice))
    }
}

/// Initial condition and period of a periodic orbit, as handed out by an oracle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodicOrbit {
    pub state: CartesianState,
    pub period: f64,
}

impl PeriodicOrbit {
    pub fn new(state: CartesianState, period: f64) -> Result<Self> {
        if !(period.is_finite() && period > 0.0) {
            return Err(Cr3bpError::InvalidInput(format!(
                "Orbit period must be positive and finite, got {period}."
            )));
        }
        if state.iter().any(|v| !v.is_finite()) {
            return Err(Cr3bpError::InvalidInput(
                "Orbit initial state must be finite.".to_string(),
            ));
        }
        Ok(Self { state, period })
    }

    pub fn from_components(components: [f64; STATE_DIM], period: f64) -> Result<Self> {
        Self::new(CartesianState::from(components), period)
    }
}
