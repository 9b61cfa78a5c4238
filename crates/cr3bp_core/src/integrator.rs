//! Adaptive trajectory integration with sampling and explicit failure reporting.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{FailureReason, IntegrationFailure};
use crate::solvers::{Rkf78, StepController};
use crate::traits::{DynamicalSystem, Integrator};
use crate::types::{Sampling, TimeSpan, Tolerances, Trajectory};

/// Fraction of the span used as first step when none is configured.
const INITIAL_STEP_FRACTION: f64 = 1e-2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegratorSettings {
    pub abs_tol: f64,
    pub rel_tol: f64,
    /// Smallest step magnitude the controller may propose before the
    /// integration is declared failed.
    pub min_step: f64,
    pub max_step: f64,
    /// First trial step; `None` uses a fixed fraction of the span.
    #[serde(default)]
    pub initial_step: Option<f64>,
    /// Limit on attempted (accepted + rejected) steps.
    pub max_steps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            abs_tol: 1e-12,
            rel_tol: 1e-12,
            min_step: 1e-14,
            max_step: f64::INFINITY,
            initial_step: None,
            max_steps: 1_000_000,
        }
    }
}

/// Integrator backed by the RKF7(8) pair.
///
/// The error control is local. A very close pass by a singularity can finish
/// inside the step limits and still carry a large global error; ensembles can
/// catch this with `EnsembleSettings::max_invariant_drift`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AdaptiveIntegrator {
    settings: IntegratorSettings,
    controller: StepController,
}

impl AdaptiveIntegrator {
    pub fn new(settings: IntegratorSettings) -> Self {
        Self {
            settings,
            controller: StepController::default(),
        }
    }

    pub fn with_controller(mut self, controller: StepController) -> Self {
        self.controller = controller;
        self
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    fn validate<S: DynamicalSystem + ?Sized>(
        &self,
        system: &S,
        initial_state: &[f64],
        span: TimeSpan,
        sampling: &Sampling,
    ) -> Result<(), IntegrationFailure> {
        let fail = |message: String| -> Result<(), IntegrationFailure> {
            Err(IntegrationFailure::invalid_input(
                message,
                span.start,
                initial_state,
            ))
        };
        if initial_state.len() != system.dimension() {
            return fail(format!(
                "Initial state dimension mismatch. Expected {}, got {}.",
                system.dimension(),
                initial_state.len()
            ));
        }
        if !span.start.is_finite() || !span.end.is_finite() {
            return fail("Time span must be finite.".to_string());
        }
        if initial_state.iter().any(|v| !v.is_finite()) {
            return fail("Initial state must be finite.".to_string());
        }
        let s = &self.settings;
        if !(s.abs_tol > 0.0 && s.rel_tol >= 0.0) {
            return fail("Tolerances must be positive.".to_string());
        }
        if !(s.min_step > 0.0 && s.max_step >= s.min_step) {
            return fail("Step limits must satisfy 0 < min_step <= max_step.".to_string());
        }
        if s.max_steps == 0 {
            return fail("max_steps must be greater than zero.".to_string());
        }
        if let Sampling::Uniform { points } = sampling {
            if *points < 2 {
                return fail("Uniform sampling requires at least 2 points.".to_string());
            }
        }
        Ok(())
    }
}

/// Save times for uniform sampling, both ends included exactly.
fn uniform_save_times(span: TimeSpan, points: usize) -> Vec<f64> {
    let last = points - 1;
    (0..points)
        .map(|i| {
            if i == last {
                span.end
            } else {
                span.start + span.duration() * (i as f64) / (last as f64)
            }
        })
        .collect()
}

impl Integrator for AdaptiveIntegrator {
    fn tolerances(&self) -> Tolerances {
        Tolerances::new(self.settings.abs_tol, self.settings.rel_tol)
    }

    fn with_tolerances(&self, tolerances: Tolerances) -> Self {
        let mut next = *self;
        next.settings.abs_tol = tolerances.abs_tol;
        next.settings.rel_tol = tolerances.rel_tol;
        next
    }

    fn integrate<S>(
        &self,
        system: &S,
        initial_state: &[f64],
        span: TimeSpan,
        sampling: &Sampling,
    ) -> Result<Trajectory, IntegrationFailure>
    where
        S: DynamicalSystem + ?Sized,
    {
        self.validate(system, initial_state, span, sampling)?;

        let dim = initial_state.len();
        let settings = &self.settings;
        let tol = self.tolerances();

        let save_times = match sampling {
            Sampling::Uniform { points } => uniform_save_times(span, *points),
            _ => Vec::new(),
        };
        let capacity = match sampling {
            Sampling::Uniform { points } => *points,
            Sampling::Endpoints => 2,
            Sampling::Steps => 64,
        };
        let mut trajectory = Trajectory::with_capacity(dim, capacity);
        trajectory.push(span.start, initial_state);
        let mut next_save = 1usize;

        if span.duration() == 0.0 {
            if !matches!(sampling, Sampling::Steps) {
                // Every requested point coincides with the start.
                while trajectory.len() < capacity {
                    trajectory.push(span.start, initial_state);
                }
            }
            return Ok(trajectory);
        }

        let mut derivative = vec![0.0; dim];
        system.apply(span.start, initial_state, &mut derivative);
        if derivative.iter().any(|v| !v.is_finite()) {
            return Err(IntegrationFailure::new(
                FailureReason::NonFiniteState,
                span.start,
                initial_state,
                0,
            ));
        }

        let direction = span.direction();
        let mut solver = Rkf78::new(dim);
        let mut t = span.start;
        let mut state = initial_state.to_vec();
        let mut candidate = vec![0.0; dim];
        let mut steps = 0usize;
        let mut h_mag = settings
            .initial_step
            .unwrap_or(INITIAL_STEP_FRACTION * span.duration().abs())
            .abs()
            .clamp(settings.min_step, settings.max_step);

        while (span.end - t) * direction > 0.0 {
            if steps >= settings.max_steps {
                debug!(t, steps, "integration exceeded step limit");
                return Err(IntegrationFailure::new(
                    FailureReason::MaxStepsExceeded {
                        limit: settings.max_steps,
                    },
                    t,
                    &state,
                    steps,
                ));
            }

            // Save points closer together than the time resolution.
            if save_times.get(next_save) == Some(&t) {
                trajectory.push(t, &state);
                next_save += 1;
                continue;
            }

            // Clamp onto the next save point or the end of the span.
            let target = save_times.get(next_save).copied().unwrap_or(span.end);
            let remaining = (target - t).abs();
            let clamped = h_mag >= remaining;
            let dt = if clamped { target - t } else { direction * h_mag };
            if t + dt == t {
                debug!(t, dt, "step vanished below time resolution");
                return Err(IntegrationFailure::new(
                    FailureReason::StepSizeTooSmall { step: dt.abs() },
                    t,
                    &state,
                    steps,
                ));
            }

            let error = solver.attempt(system, t, &state, dt, tol, &mut candidate);
            steps += 1;
            let factor = self.controller.factor(error);

            if error <= 1.0 {
                t = if clamped { target } else { t + dt };
                state.copy_from_slice(&candidate);
                match sampling {
                    Sampling::Steps => trajectory.push(t, &state),
                    Sampling::Uniform { .. } if clamped => {
                        trajectory.push(t, &state);
                        next_save += 1;
                    }
                    _ => {}
                }
                // A step shortened to hit a save point says nothing about the
                // step the controller would like; keep the previous proposal.
                if !clamped || factor < 1.0 {
                    h_mag = (dt.abs() * factor).clamp(settings.min_step, settings.max_step);
                }
            } else {
                trace!(t, dt, error, "rejected step");
                let proposed = dt.abs() * factor;
                if proposed < settings.min_step {
                    debug!(t, proposed, error, "step size collapsed");
                    return Err(IntegrationFailure::new(
                        FailureReason::StepSizeTooSmall { step: proposed },
                        t,
                        &state,
                        steps,
                    ));
                }
                h_mag = proposed.min(settings.max_step);
            }
        }

        if matches!(sampling, Sampling::Endpoints) {
            trajectory.push(t, &state);
        }
        Ok(trajectory)
    }
}
