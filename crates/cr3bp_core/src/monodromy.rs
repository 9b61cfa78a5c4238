//! State-transition matrix propagation and the monodromy matrix of a periodic orbit.

use serde::Serialize;
use tracing::debug;

use crate::error::{Cr3bpError, Result};
use crate::traits::{Integrator, VariationalSystem};
use crate::types::{
    augmented_state, split_augmented, CartesianState, PeriodicOrbit, Sampling,
    StateTransitionMatrix, TimeSpan, STATE_DIM,
};

/// Loosest tolerance allowed for variational integrations; monodromy
/// eigenvalues are very sensitive to integration error.
pub const MONODROMY_TOLERANCE: f64 = 1e-12;

/// A reference-trajectory sample together with Φ(t, t0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StmSample {
    pub time: f64,
    pub state: CartesianState,
    pub stm: StateTransitionMatrix,
}

/// Decoded trajectory of augmented states.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StmTrajectory {
    pub samples: Vec<StmSample>,
}

impl StmTrajectory {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&StmSample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&StmSample> {
        self.samples.last()
    }
}

/// Φ(T) for a periodic orbit of period T.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonodromyMatrix {
    matrix: StateTransitionMatrix,
    period: f64,
}

impl MonodromyMatrix {
    pub fn new(matrix: StateTransitionMatrix, period: f64) -> Self {
        Self { matrix, period }
    }

    pub fn matrix(&self) -> &StateTransitionMatrix {
        &self.matrix
    }

    pub fn period(&self) -> f64 {
        self.period
    }
}

/// Reference orbit sampled at evenly spaced phases over one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrbitSamples {
    /// Samples at t_k = k·T/N, k = 0..N-1 (the t = T point is not repeated).
    pub samples: Vec<StmSample>,
    pub monodromy: MonodromyMatrix,
}

/// Same integrator, tolerances never looser than [`MONODROMY_TOLERANCE`].
pub fn variational_integrator<I: Integrator>(integrator: &I) -> I {
    integrator.with_tolerances(integrator.tolerances().tightened(MONODROMY_TOLERANCE))
}

/// Integrates state and Φ together from Φ(span.start) = I.
pub fn propagate_with_stm<M, I>(
    model: &M,
    integrator: &I,
    state: &CartesianState,
    span: TimeSpan,
    sampling: &Sampling,
) -> Result<StmTrajectory>
where
    M: VariationalSystem,
    I: Integrator,
{
    if model.dimension() != STATE_DIM {
        return Err(Cr3bpError::InvalidInput(format!(
            "Variational propagation expects a {}-dimensional model, got {}.",
            STATE_DIM,
            model.dimension()
        )));
    }
    let integrator = variational_integrator(integrator);
    let trajectory = integrator.integrate(
        &model.augmented(),
        &augmented_state(state),
        span,
        sampling,
    )?;

    let samples = trajectory
        .iter()
        .map(|(time, augmented)| {
            split_augmented(augmented).map(|(state, stm)| StmSample { time, state, stm })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(StmTrajectory { samples })
}

/// Monodromy matrix of `orbit`: Φ integrated from I over (0, T).
///
/// The period is trusted; periodicity is not checked and there is no retry.
pub fn monodromy<M, I>(model: &M, integrator: &I, orbit: &PeriodicOrbit) -> Result<MonodromyMatrix>
where
    M: VariationalSystem,
    I: Integrator,
{
    debug!(period = orbit.period, "computing monodromy matrix");
    let trajectory = propagate_with_stm(
        model,
        integrator,
        &orbit.state,
        TimeSpan::from_zero(orbit.period),
        &Sampling::Endpoints,
    )?;
    let last = trajectory
        .last()
        .ok_or_else(|| Cr3bpError::InvalidInput("Variational integration produced no samples.".into()))?;
    Ok(MonodromyMatrix::new(last.stm, orbit.period))
}

/// Samples `orbit` at `count` evenly spaced phases and reads the monodromy
/// matrix off the same propagation.
pub fn sample_orbit<M, I>(
    model: &M,
    integrator: &I,
    orbit: &PeriodicOrbit,
    count: usize,
) -> Result<OrbitSamples>
where
    M: VariationalSystem,
    I: Integrator,
{
    if count == 0 {
        return Err(Cr3bpError::InvalidInput(
            "At least one orbit sample is required.".to_string(),
        ));
    }
    let mut trajectory = propagate_with_stm(
        model,
        integrator,
        &orbit.state,
        TimeSpan::from_zero(orbit.period),
        &Sampling::Uniform { points: count + 1 },
    )?;
    let last = trajectory
        .samples
        .pop()
        .ok_or_else(|| Cr3bpError::InvalidInput("Variational integration produced no samples.".into()))?;
    Ok(OrbitSamples {
        samples: trajectory.samples,
        monodromy: MonodromyMatrix::new(last.stm, orbit.period),
    })
}
