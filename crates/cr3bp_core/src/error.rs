//! Error types shared across the crate.

use serde::Serialize;
use thiserror::Error;

use crate::dynamics::Primary;

/// Why an integration call stopped before covering its span.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum FailureReason {
    #[error("step size collapsed to {step:e}")]
    StepSizeTooSmall { step: f64 },
    #[error("exceeded the limit of {limit} steps")]
    MaxStepsExceeded { limit: usize },
    #[error("state or derivative became non-finite")]
    NonFiniteState,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// An integration that could not reach the end of its span.
///
/// Carries the furthest time reached and the last state that was accepted
/// there, so callers can see where the trajectory broke down.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("integration failed at t = {time}: {reason}")]
pub struct IntegrationFailure {
    pub reason: FailureReason,
    pub time: f64,
    pub state: Vec<f64>,
    pub steps: usize,
}

impl IntegrationFailure {
    pub fn new(reason: FailureReason, time: f64, state: &[f64], steps: usize) -> Self {
        Self {
            reason,
            time,
            state: state.to_vec(),
            steps,
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>, time: f64, state: &[f64]) -> Self {
        Self::new(FailureReason::InvalidInput(message.into()), time, state, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum Cr3bpError {
    #[error("mass ratio must lie in (0, 0.5], got {0}")]
    InvalidMassRatio(f64),
    #[error("state lies {distance:e} from the {primary} primary; the vector field is singular there")]
    DegenerateState { primary: Primary, distance: f64 },
    #[error(transparent)]
    Integration(#[from] IntegrationFailure),
    #[error(
        "monodromy has no eigenvalue off the unit circle (|λ| in [{min_modulus}, {max_modulus}], tolerance {tolerance:e})"
    )]
    DegenerateOrbit {
        max_modulus: f64,
        min_modulus: f64,
        tolerance: f64,
    },
    #[error("selected eigenvalue {re} + {im}i is not real")]
    ComplexMode { re: f64, im: f64 },
    #[error("conserved quantity drifted by {drift:e} along the trajectory (tolerance {tolerance:e})")]
    InvariantDrift { drift: f64, tolerance: f64 },
    #[error("Newton solver failed to converge in {steps} steps (residual {residual:e})")]
    NoConvergence { steps: usize, residual: f64 },
    #[error("failed to compute eigenvector: {0}")]
    Eigenvector(String),
    #[error("{0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Cr3bpError>;

/// One manifold strand that did not produce a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("strand {index} failed: {error}")]
pub struct StrandFailure {
    pub index: usize,
    pub error: Cr3bpError,
}
