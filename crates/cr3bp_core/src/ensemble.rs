//! Parallel propagation of manifold strands.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Cr3bpError, Result, StrandFailure};
use crate::traits::{DynamicalSystem, Integrator};
use crate::types::{CartesianState, Sampling, TimeDirection, TimeSpan, Trajectory};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnsembleSettings {
    /// Worker count for a dedicated pool; `None` runs on rayon's global pool.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub sampling: Sampling,
    /// Largest accepted change of the model's invariant along a strand.
    /// A close pass by a primary can finish within the step-size limits and
    /// still lose accuracy; with this set such strands fail with
    /// [`Cr3bpError::InvariantDrift`]. `None` disables the check.
    #[serde(default)]
    pub max_invariant_drift: Option<f64>,
}

pub type StrandResult = std::result::Result<Trajectory, StrandFailure>;

/// Propagated strands, slot `i` belonging to input state `i`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifoldBundle {
    pub direction: TimeDirection,
    pub span: TimeSpan,
    pub strands: Vec<StrandResult>,
}

impl ManifoldBundle {
    pub fn len(&self) -> usize {
        self.strands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strands.is_empty()
    }

    pub fn strand(&self, index: usize) -> Option<&StrandResult> {
        self.strands.get(index)
    }

    /// Successful strands with their input index.
    pub fn trajectories(&self) -> impl Iterator<Item = (usize, &Trajectory)> + '_ {
        self.strands
            .iter()
            .enumerate()
            .filter_map(|(index, strand)| strand.as_ref().ok().map(|t| (index, t)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &StrandFailure> + '_ {
        self.strands.iter().filter_map(|strand| strand.as_ref().err())
    }

    pub fn success_count(&self) -> usize {
        self.strands.iter().filter(|strand| strand.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.len() - self.success_count()
    }
}

/// Integrates every state in `states` over `direction · span_magnitude`.
///
/// Strands run concurrently and independently; one failing strand is recorded
/// as a [`StrandFailure`] and never aborts the others. Only unusable inputs
/// (a negative or non-finite span, a pool that cannot be built) fail the call.
pub fn propagate_manifold<M, I>(
    states: &[CartesianState],
    model: &M,
    integrator: &I,
    span_magnitude: f64,
    direction: TimeDirection,
    settings: &EnsembleSettings,
) -> Result<ManifoldBundle>
where
    M: DynamicalSystem + Sync,
    I: Integrator,
{
    if !(span_magnitude.is_finite() && span_magnitude >= 0.0) {
        return Err(Cr3bpError::InvalidInput(format!(
            "Span magnitude must be finite and non-negative, got {span_magnitude}."
        )));
    }
    if let Some(tolerance) = settings.max_invariant_drift {
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(Cr3bpError::InvalidInput(format!(
                "Invariant drift tolerance must be positive and finite, got {tolerance}."
            )));
        }
    }
    let span = TimeSpan::new(0.0, direction.sign() * span_magnitude);
    let tasks: Vec<(usize, &CartesianState)> = states.iter().enumerate().collect();
    debug!(strands = tasks.len(), ?direction, span_magnitude, "propagating ensemble");

    let run = || {
        tasks
            .par_iter()
            .map(|&(index, state)| propagate_strand(index, state, model, integrator, span, settings))
            .collect::<Vec<_>>()
    };
    let strands = match settings.threads {
        Some(threads) => {
            let pool = ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|err| {
                    Cr3bpError::InvalidInput(format!("Failed to build worker pool: {err}"))
                })?;
            pool.install(run)
        }
        None => run(),
    };

    let bundle = ManifoldBundle {
        direction,
        span,
        strands,
    };
    if bundle.failure_count() > 0 {
        warn!(
            failed = bundle.failure_count(),
            total = bundle.len(),
            "some manifold strands failed"
        );
    }
    info!(succeeded = bundle.success_count(), total = bundle.len(), "ensemble complete");
    Ok(bundle)
}

fn propagate_strand<M, I>(
    index: usize,
    state: &CartesianState,
    model: &M,
    integrator: &I,
    span: TimeSpan,
    settings: &EnsembleSettings,
) -> StrandResult
where
    M: DynamicalSystem + Sync,
    I: Integrator,
{
    let fail = |error: Cr3bpError| {
        debug!(index, %error, "strand failed");
        StrandFailure { index, error }
    };
    model.validate_state(state.as_slice()).map_err(fail)?;
    let trajectory = integrator
        .integrate(model, state.as_slice(), span, &settings.sampling)
        .map_err(|failure| fail(failure.into()))?;
    if let Some(tolerance) = settings.max_invariant_drift {
        let drift = invariant_drift(model, state, &trajectory);
        if drift > tolerance {
            return Err(fail(Cr3bpError::InvariantDrift { drift, tolerance }));
        }
    }
    Ok(trajectory)
}

/// Largest deviation of the model's invariant from its initial value over
/// the saved states. Zero for systems without an invariant.
fn invariant_drift<M>(model: &M, initial: &CartesianState, trajectory: &Trajectory) -> f64
where
    M: DynamicalSystem,
{
    let Some(reference) = model.invariant(initial.as_slice()) else {
        return 0.0;
    };
    trajectory
        .states
        .iter()
        .filter_map(|state| model.invariant(state))
        .map(|value| (value - reference).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::{Cr3bp, Primary};
    use crate::error::FailureReason;
    use crate::integrator::AdaptiveIntegrator;

    fn model() -> Cr3bp {
        Cr3bp::with_mu(0.012150585609624).expect("valid mass ratio")
    }

    fn states(model: &Cr3bp) -> Vec<CartesianState> {
        let moon = model.primary_position(Primary::Minor);
        vec![
            CartesianState::new(0.82, 0.0, 0.0, 0.0, 0.15, 0.0),
            CartesianState::new(moon.x + 1e-14, 0.0, 0.0, 0.0, 0.0, 0.0),
            CartesianState::new(1.15, 0.0, 0.05, 0.0, -0.2, 0.0),
        ]
    }

    #[test]
    fn failures_are_isolated_and_indexed() {
        let model = model();
        let bundle = propagate_manifold(
            &states(&model),
            &model,
            &AdaptiveIntegrator::default(),
            1.0,
            TimeDirection::Forward,
            &EnsembleSettings::default(),
        )
        .expect("ensemble");

        assert_eq!(bundle.len(), 3);
        assert_eq!(bundle.success_count(), 2);
        assert_eq!(bundle.failure_count(), 1);
        let failure = bundle.failures().next().expect("one failure");
        assert_eq!(failure.index, 1);
        assert!(matches!(
            failure.error,
            Cr3bpError::DegenerateState {
                primary: Primary::Minor,
                ..
            }
        ));
        let indices: Vec<usize> = bundle.trajectories().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);
        for (_, trajectory) in bundle.trajectories() {
            assert_eq!(trajectory.final_time(), Some(1.0));
        }
    }

    #[test]
    fn strand_failing_mid_flight_keeps_its_progress() {
        let model = model();
        let moon = model.primary_position(Primary::Minor);
        let mut seeds = states(&model);
        // Starts at rest 1e-3 from the Moon and falls almost radially into it.
        seeds[1] = CartesianState::new(moon.x - 1e-3, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(model.validate_state(seeds[1].as_slice()).is_ok());

        let bundle = propagate_manifold(
            &seeds,
            &model,
            &AdaptiveIntegrator::default(),
            1.0,
            TimeDirection::Forward,
            &EnsembleSettings::default(),
        )
        .expect("ensemble");

        assert_eq!(bundle.success_count(), 2);
        let failure = bundle.failures().next().expect("one failure");
        assert_eq!(failure.index, 1);
        let Cr3bpError::Integration(integration) = &failure.error else {
            panic!("expected an integration failure, got {}", failure.error);
        };
        assert!(
            matches!(integration.reason, FailureReason::StepSizeTooSmall { .. }),
            "{integration}"
        );
        assert!(integration.time > 0.0 && integration.time < 1.0);
        assert!(integration.steps > 0);
        assert_eq!(integration.state.len(), 6);
        assert!(integration.state.iter().all(|c| c.is_finite()));
        let last = CartesianState::from_column_slice(&integration.state);
        let (_, to_moon) = model.primary_distances(&last.fixed_rows::<3>(0).into_owned());
        assert!(to_moon < 1e-3, "last state is {to_moon} from the Moon");
        let indices: Vec<usize> = bundle.trajectories().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn invariant_drift_guard_flags_inaccurate_close_pass() {
        let model = model();
        let moon = model.primary_position(Primary::Minor);
        let mut seeds = states(&model);
        // Passes roughly 4e-7 from the Moon near t = 0.01 without the step
        // size collapsing.
        seeds[1] = CartesianState::new(moon.x - 1e-2, 0.0, 0.0, 0.0, 0.0, 0.0);
        let integrator = AdaptiveIntegrator::default();

        let unguarded = propagate_manifold(
            &seeds,
            &model,
            &integrator,
            0.015,
            TimeDirection::Forward,
            &EnsembleSettings::default(),
        )
        .expect("ensemble");
        assert_eq!(unguarded.failure_count(), 0);
        let Some(Ok(close_pass)) = unguarded.strand(1) else {
            panic!("close-pass strand should integrate");
        };
        let reference = model.jacobi_constant(&seeds[1]);
        let end = close_pass.cartesian(close_pass.len() - 1).expect("final state");
        assert!((model.jacobi_constant(&end) - reference).abs() > 1e-8);

        let guarded = propagate_manifold(
            &seeds,
            &model,
            &integrator,
            0.015,
            TimeDirection::Forward,
            &EnsembleSettings {
                max_invariant_drift: Some(1e-8),
                ..EnsembleSettings::default()
            },
        )
        .expect("ensemble");
        assert_eq!(guarded.failure_count(), 1);
        let failure = guarded.failures().next().expect("one failure");
        assert_eq!(failure.index, 1);
        assert!(matches!(
            failure.error,
            Cr3bpError::InvariantDrift { drift, tolerance } if drift > tolerance && tolerance == 1e-8
        ));
        assert_eq!(guarded.strand(0), unguarded.strand(0));
    }

    #[test]
    fn rejects_invalid_drift_tolerance() {
        let model = model();
        let result = propagate_manifold(
            &states(&model),
            &model,
            &AdaptiveIntegrator::default(),
            1.0,
            TimeDirection::Forward,
            &EnsembleSettings {
                max_invariant_drift: Some(-1.0),
                ..EnsembleSettings::default()
            },
        );
        assert!(matches!(result, Err(Cr3bpError::InvalidInput(_))));
    }

    #[test]
    fn dedicated_pool_matches_global_pool_bitwise() {
        let model = model();
        let integrator = AdaptiveIntegrator::default();
        let seeds = states(&model);
        let global = propagate_manifold(
            &seeds,
            &model,
            &integrator,
            0.7,
            TimeDirection::Backward,
            &EnsembleSettings::default(),
        )
        .expect("global pool");
        let dedicated = propagate_manifold(
            &seeds,
            &model,
            &integrator,
            0.7,
            TimeDirection::Backward,
            &EnsembleSettings {
                threads: Some(2),
                sampling: Sampling::Steps,
                ..EnsembleSettings::default()
            },
        )
        .expect("dedicated pool");
        assert_eq!(global, dedicated);
        assert_eq!(global.span, TimeSpan::new(0.0, -0.7));
    }

    #[test]
    fn uniform_sampling_and_empty_input() {
        let model = model();
        let integrator = AdaptiveIntegrator::default();
        let settings = EnsembleSettings {
            sampling: Sampling::Uniform { points: 11 },
            ..EnsembleSettings::default()
        };
        let bundle = propagate_manifold(
            &states(&model)[..1],
            &model,
            &integrator,
            2.0,
            TimeDirection::Forward,
            &settings,
        )
        .expect("ensemble");
        let (_, trajectory) = bundle.trajectories().next().expect("strand");
        assert_eq!(trajectory.len(), 11);

        let empty =
            propagate_manifold(&[], &model, &integrator, 1.0, TimeDirection::Forward, &settings)
                .expect("empty ensemble");
        assert!(empty.is_empty());
    }

    #[test]
    fn rejects_invalid_span() {
        let model = model();
        let result = propagate_manifold(
            &states(&model),
            &model,
            &AdaptiveIntegrator::default(),
            f64::NAN,
            TimeDirection::Forward,
            &EnsembleSettings::default(),
        );
        assert!(matches!(result, Err(Cr3bpError::InvalidInput(_))));
    }
}
