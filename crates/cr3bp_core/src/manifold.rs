//! End-to-end invariant-manifold computation for one periodic orbit.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ensemble::{propagate_manifold, EnsembleSettings, ManifoldBundle};
use crate::error::{Cr3bpError, Result};
use crate::monodromy::{sample_orbit, MonodromyMatrix};
use crate::perturbation::{manifold_seeds, ManifoldSeed, PerturbationNorm};
use crate::stability::{select_mode, stability_index, EigenMode, ManifoldStability};
use crate::traits::{Integrator, VariationalSystem};
use crate::types::{CartesianState, PeriodicOrbit, Sampling};

/// Which side of the orbit the seeds are displaced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ManifoldBranch {
    /// `+eps`: the side where the eigenvector's x-component is non-negative.
    Positive,
    Negative,
    #[default]
    Both,
}

impl ManifoldBranch {
    fn signs(self) -> &'static [f64] {
        match self {
            ManifoldBranch::Positive => &[1.0],
            ManifoldBranch::Negative => &[-1.0],
            ManifoldBranch::Both => &[1.0, -1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifoldSettings {
    pub stability: ManifoldStability,
    pub branch: ManifoldBranch,
    /// Seed displacement magnitude; the branch supplies the sign.
    pub eps: f64,
    /// Seeds per branch, evenly spaced in phase over one period.
    pub samples: usize,
    /// Strand length in orbit periods.
    pub periods: f64,
    /// Save points per strand, endpoints included.
    pub strand_points: usize,
    pub norm: PerturbationNorm,
    pub unit_tolerance: f64,
    /// Dedicated worker count; `None` uses rayon's global pool.
    pub threads: Option<usize>,
    /// Jacobi-constant drift beyond which a strand counts as failed.
    pub max_invariant_drift: Option<f64>,
}

impl Default for ManifoldSettings {
    fn default() -> Self {
        Self {
            stability: ManifoldStability::Unstable,
            branch: ManifoldBranch::Both,
            eps: 1e-6,
            samples: 32,
            periods: 2.0,
            strand_points: 200,
            norm: PerturbationNorm::Position,
            unit_tolerance: 1e-6,
            threads: None,
            max_invariant_drift: None,
        }
    }
}

impl ManifoldSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(Cr3bpError::InvalidInput(format!(
                "eps must be positive and finite, got {}.",
                self.eps
            )));
        }
        if self.samples == 0 {
            return Err(Cr3bpError::InvalidInput(
                "samples must be greater than zero.".to_string(),
            ));
        }
        if !(self.periods.is_finite() && self.periods > 0.0) {
            return Err(Cr3bpError::InvalidInput(format!(
                "periods must be positive and finite, got {}.",
                self.periods
            )));
        }
        if self.strand_points < 2 {
            return Err(Cr3bpError::InvalidInput(
                "strand_points must be at least 2.".to_string(),
            ));
        }
        Ok(())
    }

    fn ensemble(&self) -> EnsembleSettings {
        EnsembleSettings {
            threads: self.threads,
            sampling: Sampling::Uniform {
                points: self.strand_points,
            },
            max_invariant_drift: self.max_invariant_drift,
        }
    }
}

/// Everything computed along the way to a manifold.
///
/// `seeds[i]` is the initial condition of `bundle.strands[i]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifoldResult {
    pub orbit: PeriodicOrbit,
    pub monodromy: MonodromyMatrix,
    pub mode: EigenMode,
    pub stability_index: f64,
    pub seeds: Vec<ManifoldSeed>,
    pub bundle: ManifoldBundle,
}

/// Samples `orbit`, seeds the requested branches along the selected mode and
/// propagates them (forward for unstable, backward for stable manifolds).
#[tracing::instrument(skip_all, fields(period = orbit.period, stability = ?settings.stability))]
pub fn compute_manifold<M, I>(
    model: &M,
    integrator: &I,
    orbit: &PeriodicOrbit,
    settings: &ManifoldSettings,
) -> Result<ManifoldResult>
where
    M: VariationalSystem + Sync,
    I: Integrator,
{
    settings.validate()?;
    let sampled = sample_orbit(model, integrator, orbit, settings.samples)?;
    let mode = select_mode(&sampled.monodromy, settings.stability, settings.unit_tolerance)?;

    let mut seeds = Vec::with_capacity(settings.samples * settings.branch.signs().len());
    for sign in settings.branch.signs() {
        seeds.extend(manifold_seeds(
            &sampled.samples,
            &mode,
            sign * settings.eps,
            settings.norm,
        )?);
    }
    let states: Vec<CartesianState> = seeds.iter().map(|seed| seed.condition.state).collect();
    let bundle = propagate_manifold(
        &states,
        model,
        integrator,
        settings.periods * orbit.period,
        settings.stability.time_direction(),
        &settings.ensemble(),
    )?;

    let stability_index = stability_index(&sampled.monodromy);
    info!(
        eigenvalue = mode.value,
        stability_index,
        strands = bundle.len(),
        failed = bundle.failure_count(),
        "manifold computed"
    );
    Ok(ManifoldResult {
        orbit: *orbit,
        monodromy: sampled.monodromy,
        mode,
        stability_index,
        seeds,
        bundle,
    })
}
