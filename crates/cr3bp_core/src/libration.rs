//! Equilibrium (libration) points of the rotating frame.

use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::dynamics::Cr3bp;
use crate::error::{Cr3bpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LibrationPoint {
    L1,
    L2,
    L3,
    L4,
    L5,
}

impl LibrationPoint {
    pub const ALL: [LibrationPoint; 5] = [
        LibrationPoint::L1,
        LibrationPoint::L2,
        LibrationPoint::L3,
        LibrationPoint::L4,
        LibrationPoint::L5,
    ];

    pub fn is_collinear(self) -> bool {
        matches!(
            self,
            LibrationPoint::L1 | LibrationPoint::L2 | LibrationPoint::L3
        )
    }
}

impl fmt::Display for LibrationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LibrationPoint::L1 => "L1",
            LibrationPoint::L2 => "L2",
            LibrationPoint::L3 => "L3",
            LibrationPoint::L4 => "L4",
            LibrationPoint::L5 => "L5",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 50,
            damping: 1.0,
            tolerance: 1e-13,
        }
    }
}

/// Position of `point` with default Newton settings.
pub fn libration_point(model: &Cr3bp, point: LibrationPoint) -> Result<Vector3<f64>> {
    locate(model, point, NewtonSettings::default())
}

/// All five points, in L1..L5 order.
pub fn libration_points(model: &Cr3bp) -> Result<Vec<(LibrationPoint, Vector3<f64>)>> {
    LibrationPoint::ALL
        .iter()
        .map(|&point| libration_point(model, point).map(|position| (point, position)))
        .collect()
}

/// Collinear points solve ∂U/∂x = 0 on the x-axis by Newton iteration; the
/// triangular points are closed-form.
pub fn locate(model: &Cr3bp, point: LibrationPoint, settings: NewtonSettings) -> Result<Vector3<f64>> {
    if settings.max_steps == 0 || settings.damping <= 0.0 || settings.tolerance <= 0.0 {
        return Err(Cr3bpError::InvalidInput(
            "Newton settings need max_steps > 0, positive damping and positive tolerance."
                .to_string(),
        ));
    }
    let mu = model.mu();
    let hill = (mu / 3.0).cbrt();
    let guess = match point {
        LibrationPoint::L1 => 1.0 - mu - hill,
        LibrationPoint::L2 => 1.0 - mu + hill,
        LibrationPoint::L3 => -1.0 - 5.0 * mu / 12.0,
        LibrationPoint::L4 => return Ok(Vector3::new(0.5 - mu, 0.75f64.sqrt(), 0.0)),
        LibrationPoint::L5 => return Ok(Vector3::new(0.5 - mu, -(0.75f64.sqrt()), 0.0)),
    };

    let mut x = guess;
    let mut residual = model.potential_gradient(x, 0.0, 0.0).x;
    let mut iterations = 0usize;
    while residual.abs() > settings.tolerance {
        if iterations >= settings.max_steps || !residual.is_finite() {
            return Err(Cr3bpError::NoConvergence {
                steps: iterations,
                residual: residual.abs(),
            });
        }
        let slope = model.potential_hessian(x, 0.0, 0.0)[(0, 0)];
        x -= settings.damping * residual / slope;
        iterations += 1;
        residual = model.potential_gradient(x, 0.0, 0.0).x;
        trace!(%point, iterations, x, residual, "libration point newton step");
    }
    Ok(Vector3::new(x, 0.0, 0.0))
}
