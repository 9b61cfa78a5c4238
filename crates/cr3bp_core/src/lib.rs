pub mod dynamics;
pub mod ensemble;
pub mod error;
pub mod integrator;
pub mod libration;
pub mod manifold;
pub mod monodromy;
pub mod oracle;
pub mod perturbation;
pub mod solvers;
pub mod stability;
/// The `cr3bp_core` crate computes stable and unstable invariant manifolds of
/// periodic orbits in the circular restricted three-body problem.
///
/// Key components:
/// - **Traits**: `DynamicalSystem` (vector fields), `VariationalSystem` (state plus Φ), `Integrator` (integration service).
/// - **Dynamics**: `Cr3bp` equations of motion, analytic Jacobian and variational equations.
/// - **Solvers / Integrator**: RKF7(8) pair behind an adaptive driver with sampling and failure reporting.
/// - **Monodromy / Stability / Perturbation**: Φ(T), its eigenstructure, and manifold seeds.
/// - **Ensemble / Manifold**: parallel strand propagation and the end-to-end pipeline.
pub mod traits;
pub mod types;

pub use dynamics::{Cr3bp, MassRatio, Primary};
pub use ensemble::{propagate_manifold, EnsembleSettings, ManifoldBundle};
pub use error::{Cr3bpError, FailureReason, IntegrationFailure, StrandFailure};
pub use integrator::{AdaptiveIntegrator, IntegratorSettings};
pub use manifold::{compute_manifold, ManifoldBranch, ManifoldResult, ManifoldSettings};
pub use monodromy::{monodromy, propagate_with_stm, sample_orbit, MonodromyMatrix};
pub use perturbation::{converge, diverge, PerturbationNorm, PerturbedInitialCondition};
pub use stability::{select_mode, EigenMode, ManifoldStability};
pub use types::{CartesianState, PeriodicOrbit, Sampling, TimeDirection, TimeSpan, Trajectory};
