use crate::error::{Cr3bpError, IntegrationFailure};
use crate::types::{Sampling, TimeSpan, Tolerances, Trajectory};

/// Represents a continuous-time dynamical system dx/dt = f(t, x).
pub trait DynamicalSystem {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time
    /// x: current state
    /// out: buffer to write dx/dt
    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]);

    /// Rejects states at which the vector field is singular.
    /// `apply` itself never checks; callers opt in.
    fn validate_state(&self, _x: &[f64]) -> Result<(), Cr3bpError> {
        Ok(())
    }

    /// A quantity the exact flow conserves, if the system has one.
    fn invariant(&self, _x: &[f64]) -> Option<f64> {
        None
    }
}

/// A system that can also propagate its first-order variational equations.
///
/// The augmented system integrates `[x | Φ]` with Φ stored row-major after the
/// state, so its dimension is n + n².
pub trait VariationalSystem: DynamicalSystem {
    type Augmented: DynamicalSystem + Sync;

    fn augmented(&self) -> Self::Augmented;
}

/// A numerical integration service.
///
/// Implementations own their solver choice and accuracy settings; callers only
/// hand over a right-hand side, an initial state, a time span and a sampling
/// policy. A span whose end precedes its start integrates backward in time
/// without any change to the right-hand side.
pub trait Integrator: Clone + Send + Sync {
    /// Absolute/relative error bounds currently in effect.
    fn tolerances(&self) -> Tolerances;

    /// Returns a copy of this integrator using `tolerances`.
    fn with_tolerances(&self, tolerances: Tolerances) -> Self;

    /// Integrates `system` from `initial_state` across `span`.
    ///
    /// Failure is a distinct outcome: a trajectory is only returned when the
    /// whole span was covered.
    fn integrate<S>(
        &self,
        system: &S,
        initial_state: &[f64],
        span: TimeSpan,
        sampling: &Sampling,
    ) -> Result<Trajectory, IntegrationFailure>
    where
        S: DynamicalSystem + ?Sized;
}
