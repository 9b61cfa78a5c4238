//! Manifold seeds: orbit states displaced along a transported eigenvector.

use serde::{Deserialize, Serialize};

use crate::error::{Cr3bpError, Result};
use crate::monodromy::{MonodromyMatrix, StmSample};
use crate::stability::{select_mode, EigenMode, ManifoldStability, DEFAULT_UNIT_TOLERANCE};
use crate::types::{CartesianState, StateTransitionMatrix};

/// How the transported eigenvector is scaled before `eps` is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PerturbationNorm {
    /// Unit 2-norm of the position part (x, y, z). Falls back to the full
    /// state when the position part vanishes.
    #[default]
    Position,
    /// Unit 2-norm of the whole 6-vector.
    FullState,
}

impl PerturbationNorm {
    pub fn magnitude(self, direction: &CartesianState) -> f64 {
        let full = direction.norm();
        match self {
            PerturbationNorm::FullState => full,
            PerturbationNorm::Position => {
                let position = direction.fixed_rows::<3>(0).norm();
                if position > f64::EPSILON * full {
                    position
                } else {
                    full
                }
            }
        }
    }
}

/// An orbit state displaced by `eps` along a normalized manifold direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerturbedInitialCondition {
    pub source: CartesianState,
    pub state: CartesianState,
    /// Φ(t)·v scaled to unit magnitude under the chosen norm.
    pub direction: CartesianState,
    pub eps: f64,
    /// Monodromy eigenvalue whose eigenvector was transported.
    pub eigenvalue: f64,
}

impl PerturbedInitialCondition {
    pub fn displacement(&self) -> f64 {
        (self.state - self.source).norm()
    }
}

/// A perturbed condition tagged with the orbit sample it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ManifoldSeed {
    pub index: usize,
    pub time: f64,
    pub condition: PerturbedInitialCondition,
}

/// Seed on the unstable manifold: displaces `state` along Φ·v for the
/// eigenvalue of largest modulus. The sign of `eps` picks the branch.
pub fn diverge(
    state: &CartesianState,
    stm: &StateTransitionMatrix,
    monodromy: &MonodromyMatrix,
    eps: f64,
) -> Result<PerturbedInitialCondition> {
    let mode = select_mode(monodromy, ManifoldStability::Unstable, DEFAULT_UNIT_TOLERANCE)?;
    perturb_along(&mode, state, stm, eps, PerturbationNorm::default())
}

/// Seed on the stable manifold, using the eigenvalue of smallest modulus.
pub fn converge(
    state: &CartesianState,
    stm: &StateTransitionMatrix,
    monodromy: &MonodromyMatrix,
    eps: f64,
) -> Result<PerturbedInitialCondition> {
    let mode = select_mode(monodromy, ManifoldStability::Stable, DEFAULT_UNIT_TOLERANCE)?;
    perturb_along(&mode, state, stm, eps, PerturbationNorm::default())
}

/// Displaces `state` by `eps` along `stm · mode.vector` normalized with `norm`.
pub fn perturb_along(
    mode: &EigenMode,
    state: &CartesianState,
    stm: &StateTransitionMatrix,
    eps: f64,
    norm: PerturbationNorm,
) -> Result<PerturbedInitialCondition> {
    if !eps.is_finite() {
        return Err(Cr3bpError::InvalidInput(format!(
            "Perturbation size must be finite, got {eps}."
        )));
    }
    let transported = stm * mode.vector;
    let magnitude = norm.magnitude(&transported);
    if !(magnitude.is_finite() && magnitude > 0.0) {
        return Err(Cr3bpError::Eigenvector(format!(
            "transported eigenvector has magnitude {magnitude}"
        )));
    }
    let direction = transported / magnitude;
    Ok(PerturbedInitialCondition {
        source: *state,
        state: state + direction * eps,
        direction,
        eps,
        eigenvalue: mode.value,
    })
}

/// One seed per orbit sample, in sample order.
pub fn manifold_seeds(
    samples: &[StmSample],
    mode: &EigenMode,
    eps: f64,
    norm: PerturbationNorm,
) -> Result<Vec<ManifoldSeed>> {
    samples
        .iter()
        .enumerate()
        .map(|(index, sample)| {
            perturb_along(mode, &sample.state, &sample.stm, eps, norm).map(|condition| {
                ManifoldSeed {
                    index,
                    time: sample.time,
                    condition,
                }
            })
        })
        .collect()
}
