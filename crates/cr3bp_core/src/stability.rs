//! Eigenstructure of the monodromy matrix.
//!
//! Eigenvalues come from nalgebra's real Schur decomposition; eigenvectors of
//! real eigenvalues are the right-singular vector of (M − λI) belonging to its
//! smallest singular value.

use nalgebra::linalg::SVD;
use nalgebra::DMatrix;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Cr3bpError, Result};
use crate::monodromy::MonodromyMatrix;
use crate::types::{CartesianState, StateTransitionMatrix, TimeDirection, STATE_DIM};

/// Default distance from the unit circle below which a monodromy matrix is
/// considered to have no hyperbolic pair.
pub const DEFAULT_UNIT_TOLERANCE: f64 = 1e-6;

/// Relative modulus difference under which two eigenvalues count as tied.
pub const TIE_TOLERANCE: f64 = 1e-9;

/// Imaginary parts below this (relative to max(1, |λ|)) are treated as zero.
const REAL_TOLERANCE: f64 = 1e-10;

/// Components smaller than this never decide an eigenvector's sign.
const SIGN_THRESHOLD: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ManifoldStability {
    Stable,
    #[default]
    Unstable,
}

impl ManifoldStability {
    /// Unstable manifolds grow forward in time, stable ones backward.
    pub fn time_direction(self) -> TimeDirection {
        match self {
            ManifoldStability::Unstable => TimeDirection::Forward,
            ManifoldStability::Stable => TimeDirection::Backward,
        }
    }
}

/// Eigenvalue with, when it is real, its unit eigenvector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EigenPair {
    pub index: usize,
    pub value: Complex<f64>,
    pub vector: Option<CartesianState>,
}

impl EigenPair {
    pub fn modulus(&self) -> f64 {
        self.value.norm()
    }

    pub fn is_real(&self) -> bool {
        is_real(self.value)
    }
}

/// The real eigenpair along which a manifold is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EigenMode {
    pub index: usize,
    pub stability: ManifoldStability,
    pub value: f64,
    pub vector: CartesianState,
}

fn is_real(value: Complex<f64>) -> bool {
    value.im.abs() <= REAL_TOLERANCE * value.norm().max(1.0)
}

/// All eigenvalues of `matrix` in decomposition order, with unit-norm real
/// eigenvectors attached to the real ones.
pub fn eigenpairs(matrix: &StateTransitionMatrix) -> Result<Vec<EigenPair>> {
    let eigenvalues = eigenvalues(matrix);
    let mut pairs = Vec::with_capacity(STATE_DIM);
    for (index, value) in eigenvalues.into_iter().enumerate() {
        let vector = if is_real(value) {
            Some(real_eigenvector(matrix, value.re)?)
        } else {
            None
        };
        pairs.push(EigenPair {
            index,
            value,
            vector,
        });
    }
    Ok(pairs)
}

/// Eigenvalues of `matrix` in the order nalgebra reports them.
pub fn eigenvalues(matrix: &StateTransitionMatrix) -> Vec<Complex<f64>> {
    let dynamic = DMatrix::from_column_slice(STATE_DIM, STATE_DIM, matrix.as_slice());
    dynamic.complex_eigenvalues().iter().copied().collect()
}

/// Unit eigenvector of a real eigenvalue, sign fixed so that the x-component
/// is non-negative (or, when it vanishes, the first non-zero component is
/// positive).
pub fn real_eigenvector(matrix: &StateTransitionMatrix, lambda: f64) -> Result<CartesianState> {
    let shifted = matrix - StateTransitionMatrix::identity() * lambda;
    let svd = SVD::new(shifted, false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| Cr3bpError::Eigenvector(format!("SVD produced no basis for λ = {lambda}")))?;
    let (min_idx, _) = svd.singular_values.iter().enumerate().fold(
        (0usize, f64::INFINITY),
        |(idx_min, val_min), (idx, &val)| {
            if val < val_min {
                (idx, val)
            } else {
                (idx_min, val_min)
            }
        },
    );

    let mut vector = v_t.row(min_idx).transpose();
    let norm = vector.norm();
    if !norm.is_finite() || norm <= SIGN_THRESHOLD {
        return Err(Cr3bpError::Eigenvector(format!(
            "eigenvector for λ = {lambda} is nearly zero"
        )));
    }
    vector /= norm;
    if let Some(pivot) = vector.iter().copied().find(|c| c.abs() > SIGN_THRESHOLD) {
        if pivot < 0.0 {
            vector = -vector;
        }
    }
    Ok(vector)
}

/// Picks the eigenvalue of largest (unstable) or smallest (stable) modulus.
///
/// Moduli within a relative [`TIE_TOLERANCE`] of each other are tied and the
/// lowest eigenvalue index wins. Fails with `DegenerateOrbit` when every
/// eigenvalue sits within `unit_tolerance` of the unit circle on the requested
/// side, and with `ComplexMode` when the selected eigenvalue is not real.
pub fn select_mode(
    monodromy: &MonodromyMatrix,
    stability: ManifoldStability,
    unit_tolerance: f64,
) -> Result<EigenMode> {
    if !(unit_tolerance.is_finite() && unit_tolerance >= 0.0) {
        return Err(Cr3bpError::InvalidInput(format!(
            "Unit-circle tolerance must be finite and non-negative, got {unit_tolerance}."
        )));
    }
    let matrix = monodromy.matrix();
    let values = eigenvalues(matrix);
    if values.iter().any(|v| !(v.re.is_finite() && v.im.is_finite())) {
        return Err(Cr3bpError::Eigenvector(
            "monodromy matrix has non-finite eigenvalues".to_string(),
        ));
    }

    let max_modulus = values.iter().map(|v| v.norm()).fold(0.0, f64::max);
    let min_modulus = values.iter().map(|v| v.norm()).fold(f64::INFINITY, f64::min);
    debug!(
        max_modulus,
        min_modulus,
        period = monodromy.period(),
        "monodromy eigenvalues"
    );

    let degenerate = match stability {
        ManifoldStability::Unstable => max_modulus <= 1.0 + unit_tolerance,
        ManifoldStability::Stable => min_modulus >= 1.0 - unit_tolerance,
    };
    if degenerate {
        return Err(Cr3bpError::DegenerateOrbit {
            max_modulus,
            min_modulus,
            tolerance: unit_tolerance,
        });
    }

    let mut selected = 0;
    for (index, value) in values.iter().enumerate().skip(1) {
        let best = values[selected].norm();
        let candidate = value.norm();
        let better = match stability {
            ManifoldStability::Unstable => candidate > best * (1.0 + TIE_TOLERANCE),
            ManifoldStability::Stable => candidate < best * (1.0 - TIE_TOLERANCE),
        };
        if better {
            selected = index;
        }
    }

    let value = values[selected];
    if !is_real(value) {
        return Err(Cr3bpError::ComplexMode {
            re: value.re,
            im: value.im,
        });
    }
    let vector = real_eigenvector(matrix, value.re)?;
    Ok(EigenMode {
        index: selected,
        stability,
        value: value.re,
        vector,
    })
}

/// ν = (|λ| + 1/|λ|)/2 for the dominant eigenvalue; ν > 1 means unstable.
pub fn stability_index(monodromy: &MonodromyMatrix) -> f64 {
    let max_modulus = eigenvalues(monodromy.matrix())
        .iter()
        .map(|v| v.norm())
        .fold(0.0, f64::max);
    0.5 * (max_modulus + max_modulus.recip())
}

/// Smallest |λᵢλⱼ − 1| over distinct eigenvalue pairs; near zero for any
/// symplectic matrix.
pub fn reciprocal_pair_defect(eigenvalues: &[Complex<f64>]) -> f64 {
    let mut best = f64::INFINITY;
    for (i, a) in eigenvalues.iter().enumerate() {
        for b in &eigenvalues[i + 1..] {
            best = best.min((a * b - 1.0).norm());
        }
    }
    best
}
