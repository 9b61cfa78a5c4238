//! CR3BP equations of motion and their variational equations.
//!
//! Frame: rotating with the primaries, nondimensionalized so that the primary
//! separation, total mass and angular rate are all one. The larger primary sits
//! at (-μ, 0, 0) and the smaller one at (1 - μ, 0, 0).

use std::fmt;

use nalgebra::{Matrix3, Matrix6, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Cr3bpError, Result};
use crate::traits::{DynamicalSystem, VariationalSystem};
use crate::types::{CartesianState, StateTransitionMatrix, AUGMENTED_DIM, STATE_DIM};

/// Distance to a primary below which a state counts as coincident with it.
pub const DEGENERATE_RADIUS: f64 = 1e-10;

/// Ratio of the smaller primary's mass to the total system mass.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct MassRatio(f64);

impl MassRatio {
    pub fn new(mu: f64) -> Result<Self> {
        if !(mu.is_finite() && mu > 0.0 && mu <= 0.5) {
            return Err(Cr3bpError::InvalidMassRatio(mu));
        }
        Ok(Self(mu))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for MassRatio {
    type Error = Cr3bpError;

    fn try_from(mu: f64) -> Result<Self> {
        Self::new(mu)
    }
}

impl From<MassRatio> for f64 {
    fn from(mu: MassRatio) -> Self {
        mu.0
    }
}

/// One of the two massive bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Primary {
    /// Mass 1 - μ, at (-μ, 0, 0).
    Major,
    /// Mass μ, at (1 - μ, 0, 0).
    Minor,
}

impl fmt::Display for Primary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primary::Major => f.write_str("major"),
            Primary::Minor => f.write_str("minor"),
        }
    }
}

/// The circular restricted three-body vector field for a fixed mass ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cr3bp {
    mass_ratio: MassRatio,
}

/// Distances and inverse powers to both primaries at one position.
struct PrimaryTerms {
    /// x + μ
    dx1: f64,
    /// x - 1 + μ
    dx2: f64,
    inv_r1_3: f64,
    inv_r2_3: f64,
    inv_r1_5: f64,
    inv_r2_5: f64,
}

impl Cr3bp {
    pub fn new(mass_ratio: MassRatio) -> Self {
        Self { mass_ratio }
    }

    /// Convenience constructor validating a raw μ.
    pub fn with_mu(mu: f64) -> Result<Self> {
        MassRatio::new(mu).map(Self::new)
    }

    pub fn mass_ratio(&self) -> MassRatio {
        self.mass_ratio
    }

    pub fn mu(&self) -> f64 {
        self.mass_ratio.value()
    }

    /// The same model with the state-transition matrix appended (42 components).
    pub fn variational(&self) -> Cr3bpVariational {
        Cr3bpVariational { model: *self }
    }

    pub fn primary_position(&self, primary: Primary) -> Vector3<f64> {
        let mu = self.mu();
        match primary {
            Primary::Major => Vector3::new(-mu, 0.0, 0.0),
            Primary::Minor => Vector3::new(1.0 - mu, 0.0, 0.0),
        }
    }

    /// Distances (r1, r2) from `position` to the major and minor primaries.
    pub fn primary_distances(&self, position: &Vector3<f64>) -> (f64, f64) {
        (
            (position - self.primary_position(Primary::Major)).norm(),
            (position - self.primary_position(Primary::Minor)).norm(),
        )
    }

    /// Fails with `DegenerateState` when `state` lies within `radius` of either primary.
    pub fn check_state(&self, state: &CartesianState, radius: f64) -> Result<()> {
        let position = state.fixed_rows::<3>(0).into_owned();
        let (r1, r2) = self.primary_distances(&position);
        for (primary, distance) in [(Primary::Major, r1), (Primary::Minor, r2)] {
            if !(distance > radius) {
                return Err(Cr3bpError::DegenerateState { primary, distance });
            }
        }
        Ok(())
    }

    fn primary_terms(&self, x: f64, y: f64, z: f64) -> PrimaryTerms {
        let mu = self.mu();
        let dx1 = x + mu;
        let dx2 = x - 1.0 + mu;
        let yz2 = y * y + z * z;
        let r1_sq = dx1 * dx1 + yz2;
        let r2_sq = dx2 * dx2 + yz2;
        let r1 = r1_sq.sqrt();
        let r2 = r2_sq.sqrt();
        let inv_r1_3 = 1.0 / (r1_sq * r1);
        let inv_r2_3 = 1.0 / (r2_sq * r2);
        PrimaryTerms {
            dx1,
            dx2,
            inv_r1_3,
            inv_r2_3,
            inv_r1_5: inv_r1_3 / r1_sq,
            inv_r2_5: inv_r2_3 / r2_sq,
        }
    }

    /// Effective potential U = (x² + y²)/2 + (1 - μ)/r1 + μ/r2.
    pub fn pseudo_potential(&self, position: &Vector3<f64>) -> f64 {
        let mu = self.mu();
        let (r1, r2) = self.primary_distances(position);
        0.5 * (position.x * position.x + position.y * position.y) + (1.0 - mu) / r1 + mu / r2
    }

    /// Jacobi constant C = 2U - |v|², conserved along every trajectory.
    pub fn jacobi_constant(&self, state: &CartesianState) -> f64 {
        let position = state.fixed_rows::<3>(0).into_owned();
        let velocity = state.fixed_rows::<3>(3);
        2.0 * self.pseudo_potential(&position) - velocity.norm_squared()
    }

    /// Gradient of the pseudo-potential, (∂U/∂x, ∂U/∂y, ∂U/∂z).
    pub fn potential_gradient(&self, x: f64, y: f64, z: f64) -> Vector3<f64> {
        let mu = self.mu();
        let terms = self.primary_terms(x, y, z);
        let m1 = (1.0 - mu) * terms.inv_r1_3;
        let m2 = mu * terms.inv_r2_3;
        Vector3::new(
            x - m1 * terms.dx1 - m2 * terms.dx2,
            y - (m1 + m2) * y,
            -(m1 + m2) * z,
        )
    }

    /// Hessian of the pseudo-potential.
    pub fn potential_hessian(&self, x: f64, y: f64, z: f64) -> Matrix3<f64> {
        let mu = self.mu();
        let t = self.primary_terms(x, y, z);
        let a1 = (1.0 - mu) * t.inv_r1_3;
        let a2 = mu * t.inv_r2_3;
        let b1 = 3.0 * (1.0 - mu) * t.inv_r1_5;
        let b2 = 3.0 * mu * t.inv_r2_5;

        let uxx = 1.0 - a1 - a2 + b1 * t.dx1 * t.dx1 + b2 * t.dx2 * t.dx2;
        let uyy = 1.0 - a1 - a2 + (b1 + b2) * y * y;
        let uzz = -a1 - a2 + (b1 + b2) * z * z;
        let uxy = (b1 * t.dx1 + b2 * t.dx2) * y;
        let uxz = (b1 * t.dx1 + b2 * t.dx2) * z;
        let uyz = (b1 + b2) * y * z;

        Matrix3::new(uxx, uxy, uxz, uxy, uyy, uyz, uxz, uyz, uzz)
    }

    /// Analytic Jacobian of the vector field at `state`:
    ///
    /// ```text
    /// J = | 0    I |
    ///     | ∇²U  Ω |,   Ω = [[0, 2, 0], [-2, 0, 0], [0, 0, 0]]
    /// ```
    pub fn jacobian(&self, state: &[f64]) -> StateTransitionMatrix {
        let hessian = self.potential_hessian(state[0], state[1], state[2]);
        let mut jac = Matrix6::zeros();
        jac.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&Matrix3::identity());
        jac.fixed_view_mut::<3, 3>(3, 0).copy_from(&hessian);
        jac[(3, 4)] = 2.0;
        jac[(4, 3)] = -2.0;
        jac
    }

    fn accelerations(&self, state: &[f64], out: &mut [f64]) {
        let gradient = self.potential_gradient(state[0], state[1], state[2]);
        out[0] = state[3];
        out[1] = state[4];
        out[2] = state[5];
        out[3] = 2.0 * state[4] + gradient.x;
        out[4] = -2.0 * state[3] + gradient.y;
        out[5] = gradient.z;
    }
}

impl DynamicalSystem for Cr3bp {
    fn dimension(&self) -> usize {
        STATE_DIM
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        self.accelerations(x, out);
    }

    fn validate_state(&self, x: &[f64]) -> Result<()> {
        self.check_state(&CartesianState::from_column_slice(&x[..STATE_DIM]), DEGENERATE_RADIUS)
    }

    /// The Jacobi constant.
    fn invariant(&self, x: &[f64]) -> Option<f64> {
        Some(self.jacobi_constant(&CartesianState::from_column_slice(&x[..STATE_DIM])))
    }
}

impl VariationalSystem for Cr3bp {
    type Augmented = Cr3bpVariational;

    fn augmented(&self) -> Cr3bpVariational {
        self.variational()
    }
}

/// CR3BP flow augmented with dΦ/dt = J(x)·Φ, Φ stored row-major after the state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cr3bpVariational {
    model: Cr3bp,
}

impl Cr3bpVariational {
    pub fn model(&self) -> &Cr3bp {
        &self.model
    }
}

impl DynamicalSystem for Cr3bpVariational {
    fn dimension(&self) -> usize {
        AUGMENTED_DIM
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        self.model.accelerations(&x[..STATE_DIM], &mut out[..STATE_DIM]);

        let jac = self.model.jacobian(&x[..STATE_DIM]);
        let phi = StateTransitionMatrix::from_row_slice(&x[STATE_DIM..AUGMENTED_DIM]);
        let phi_dot = jac * phi;
        // Write back row-major; nalgebra's own storage is column-major.
        for i in 0..STATE_DIM {
            for j in 0..STATE_DIM {
                out[STATE_DIM + i * STATE_DIM + j] = phi_dot[(i, j)];
            }
        }
    }
}
