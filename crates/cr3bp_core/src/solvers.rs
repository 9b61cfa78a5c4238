use crate::traits::DynamicalSystem;
use crate::types::Tolerances;

/// Number of stages of the Fehlberg 7(8) pair.
pub const RKF78_STAGES: usize = 13;

const C: [f64; RKF78_STAGES] = [
    0.0,
    2.0 / 27.0,
    1.0 / 9.0,
    1.0 / 6.0,
    5.0 / 12.0,
    1.0 / 2.0,
    5.0 / 6.0,
    1.0 / 6.0,
    2.0 / 3.0,
    1.0 / 3.0,
    1.0,
    0.0,
    1.0,
];

// Lower-triangular Butcher tableau, row i holds a[i][0..i].
const A: [[f64; 12]; RKF78_STAGES] = [
    [0.0; 12],
    [2.0 / 27.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 36.0, 1.0 / 12.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 24.0, 0.0, 1.0 / 8.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [5.0 / 12.0, 0.0, -25.0 / 16.0, 25.0 / 16.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 20.0, 0.0, 0.0, 1.0 / 4.0, 1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [
        -25.0 / 108.0,
        0.0,
        0.0,
        125.0 / 108.0,
        -65.0 / 27.0,
        125.0 / 54.0,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
    ],
    [
        31.0 / 300.0,
        0.0,
        0.0,
        0.0,
        61.0 / 225.0,
        -2.0 / 9.0,
        13.0 / 900.0,
        0.0,
        0.0,
        0.0,
        0.0,
        0.0,
    ],
    [
        2.0,
        0.0,
        0.0,
        -53.0 / 6.0,
        704.0 / 45.0,
        -107.0 / 9.0,
        67.0 / 90.0,
        3.0,
        0.0,
        0.0,
        0.0,
        0.0,
    ],
    [
        -91.0 / 108.0,
        0.0,
        0.0,
        23.0 / 108.0,
        -976.0 / 135.0,
        311.0 / 54.0,
        -19.0 / 60.0,
        17.0 / 6.0,
        -1.0 / 12.0,
        0.0,
        0.0,
        0.0,
    ],
    [
        2383.0 / 4100.0,
        0.0,
        0.0,
        -341.0 / 164.0,
        4496.0 / 1025.0,
        -301.0 / 82.0,
        2133.0 / 4100.0,
        45.0 / 82.0,
        45.0 / 164.0,
        18.0 / 41.0,
        0.0,
        0.0,
    ],
    [
        3.0 / 205.0,
        0.0,
        0.0,
        0.0,
        0.0,
        -6.0 / 41.0,
        -3.0 / 205.0,
        -3.0 / 41.0,
        3.0 / 41.0,
        6.0 / 41.0,
        0.0,
        0.0,
    ],
    [
        -1777.0 / 4100.0,
        0.0,
        0.0,
        -341.0 / 164.0,
        4496.0 / 1025.0,
        -289.0 / 82.0,
        2193.0 / 4100.0,
        51.0 / 82.0,
        33.0 / 164.0,
        12.0 / 41.0,
        0.0,
        1.0,
    ],
];

// 8th-order weights used to advance the solution.
const B8: [f64; RKF78_STAGES] = [
    0.0,
    0.0,
    0.0,
    0.0,
    0.0,
    34.0 / 105.0,
    9.0 / 35.0,
    9.0 / 35.0,
    9.0 / 280.0,
    9.0 / 280.0,
    0.0,
    41.0 / 840.0,
    41.0 / 840.0,
];

// b8 - b7 is non-zero only on stages 0, 10, 11, 12.
const ERR_WEIGHT: f64 = 41.0 / 840.0;

/// I-controller for the step size: h_new = safety * h * err^(-1/8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepController {
    pub safety: f64,
    pub max_factor: f64,
    pub min_factor: f64,
    exponent: f64,
}

impl Default for StepController {
    fn default() -> Self {
        Self {
            safety: 0.9,
            max_factor: 5.0,
            min_factor: 0.2,
            exponent: 1.0 / 8.0,
        }
    }
}

impl StepController {
    /// Multiplier for the next step given a normalized error estimate.
    pub fn factor(&self, error: f64) -> f64 {
        if !error.is_finite() {
            return self.min_factor;
        }
        if error == 0.0 {
            return self.max_factor;
        }
        (self.safety * error.powf(-self.exponent)).clamp(self.min_factor, self.max_factor)
    }
}

/// Runge-Kutta-Fehlberg 7(8) embedded pair.
///
/// Propagates with the 8th-order solution and uses the difference to the
/// 7th-order solution as local error estimate. Stage buffers are allocated once
/// per integration call and reused across steps.
pub struct Rkf78 {
    k: Vec<Vec<f64>>,
    tmp: Vec<f64>,
}

impl Rkf78 {
    pub fn new(dim: usize) -> Self {
        Self {
            k: vec![vec![0.0; dim]; RKF78_STAGES],
            tmp: vec![0.0; dim],
        }
    }

    /// Attempts one step of size `dt` (negative for backward integration).
    ///
    /// Writes the candidate state into `out` and returns the error estimate
    /// normalized by `tol`; the step is acceptable when it is `<= 1.0`.
    pub fn attempt<S: DynamicalSystem + ?Sized>(
        &mut self,
        system: &S,
        t: f64,
        state: &[f64],
        dt: f64,
        tol: Tolerances,
        out: &mut [f64],
    ) -> f64 {
        let n = state.len();

        system.apply(t, state, &mut self.k[0]);

        for stage in 1..RKF78_STAGES {
            for i in 0..n {
                let mut sum = 0.0;
                for j in 0..stage {
                    sum += A[stage][j] * self.k[j][i];
                }
                self.tmp[i] = state[i] + dt * sum;
            }
            system.apply(t + C[stage] * dt, &self.tmp, &mut self.k[stage]);
        }

        let mut max_err: f64 = 0.0;
        for i in 0..n {
            let mut sum = 0.0;
            for stage in 0..RKF78_STAGES {
                sum += B8[stage] * self.k[stage][i];
            }
            out[i] = state[i] + dt * sum;

            let err = dt
                * ERR_WEIGHT
                * (self.k[0][i] + self.k[10][i] - self.k[11][i] - self.k[12][i]);
            let scale = tol.abs_tol + tol.rel_tol * out[i].abs().max(state[i].abs());
            let scaled = err.abs() / scale;
            // NaN must not be swallowed by f64::max.
            if !scaled.is_finite() || !out[i].is_finite() {
                return f64::INFINITY;
            }
            max_err = max_err.max(scaled);
        }
        max_err
    }
}
