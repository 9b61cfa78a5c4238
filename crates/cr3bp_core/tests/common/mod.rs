#![allow(dead_code)]

use nalgebra::{DMatrix, DVector};

use cr3bp_core::libration::{libration_point, LibrationPoint};
use cr3bp_core::monodromy::propagate_with_stm;
use cr3bp_core::traits::DynamicalSystem;
use cr3bp_core::{AdaptiveIntegrator, CartesianState, Cr3bp, PeriodicOrbit, Sampling, TimeSpan};

pub const EARTH_MOON: f64 = 0.012150585609624;

const CORRECTION_TOLERANCE: f64 = 1e-9;
const MAX_CORRECTIONS: usize = 30;

pub fn earth_moon() -> Cr3bp {
    Cr3bp::with_mu(EARTH_MOON).expect("valid mass ratio")
}

pub fn integrator() -> AdaptiveIntegrator {
    AdaptiveIntegrator::default()
}

/// Small planar Lyapunov orbit about Earth-Moon L1.
pub fn lyapunov_orbit() -> PeriodicOrbit {
    let model = earth_moon();
    let l1 = libration_point(&model, LibrationPoint::L1).expect("L1");
    let hessian = model.potential_hessian(l1.x, 0.0, 0.0);
    let (uxx, uyy) = (hessian[(0, 0)], hessian[(1, 1)]);
    let beta1 = 2.0 - 0.5 * (uxx + uyy);
    let beta2_sq = -uxx * uyy;
    let omega_sq = beta1 + (beta1 * beta1 + beta2_sq).sqrt();
    let amplitude = 1e-3;
    let guess = CartesianState::new(
        l1.x - amplitude,
        0.0,
        0.0,
        0.0,
        0.5 * (omega_sq + uxx) * amplitude,
        0.0,
    );
    let period_guess = 2.0 * std::f64::consts::PI / omega_sq.sqrt();
    correct_symmetric(&model, guess, period_guess, &[4], &[1, 3])
}

/// Southern Earth-Moon L1 halo orbit.
pub fn halo_orbit() -> PeriodicOrbit {
    let model = earth_moon();
    let guess = CartesianState::new(
        0.823385182067467,
        0.0,
        -0.022277556273235,
        0.0,
        0.134184170262437,
        0.0,
    );
    correct_symmetric(&model, guess, 2.74, &[0, 4], &[1, 3, 5])
}

/// Symmetric variable-time shooting. The unknowns are the `free` initial
/// components plus the half-period `t`; the residuals are the `targets`
/// components at `t` (y, vx and, for spatial orbits, vz), all zero on a
/// symmetric periodic orbit.
fn correct_symmetric(
    model: &Cr3bp,
    mut state: CartesianState,
    period_guess: f64,
    free: &[usize],
    targets: &[usize],
) -> PeriodicOrbit {
    assert_eq!(free.len() + 1, targets.len());
    let n = targets.len();
    let integrator = integrator();
    let mut half = half_period_estimate(model, &state, period_guess);
    let mut last_residual = f64::INFINITY;
    for _ in 0..MAX_CORRECTIONS {
        let end = propagate_with_stm(
            model,
            &integrator,
            &state,
            TimeSpan::from_zero(half),
            &Sampling::Endpoints,
        )
        .expect("shooting propagation");
        let sample = *end.last().expect("final sample");
        let residual = DVector::from_iterator(n, targets.iter().map(|&row| sample.state[row]));
        last_residual = residual.amax();
        if last_residual < CORRECTION_TOLERANCE {
            return PeriodicOrbit::new(state, 2.0 * half).expect("orbit");
        }

        let mut derivative = [0.0; 6];
        model.apply(half, sample.state.as_slice(), &mut derivative);
        let jacobian = DMatrix::from_fn(n, n, |i, j| match free.get(j) {
            Some(&col) => sample.stm[(targets[i], col)],
            None => derivative[targets[i]],
        });
        let step = jacobian
            .lu()
            .solve(&residual)
            .expect("nonsingular shooting jacobian");
        for (j, &col) in free.iter().enumerate() {
            state[col] -= step[j];
        }
        half -= step[n - 1];
    }
    panic!(
        "symmetric corrector did not converge: residual {last_residual:e}, half period {half}"
    );
}

/// Time of the first return towards y = 0 once vy has reversed sign: the
/// sign change of y if there is one, otherwise the closest approach.
fn half_period_estimate(model: &Cr3bp, state: &CartesianState, period_guess: f64) -> f64 {
    let coarse = propagate_with_stm(
        model,
        &integrator(),
        state,
        TimeSpan::from_zero(period_guess),
        &Sampling::Steps,
    )
    .expect("coarse propagation");
    let samples = &coarse.samples;
    let initial_vy = state[4].signum();
    let reversed = samples
        .iter()
        .position(|sample| sample.state[4] * initial_vy < 0.0)
        .unwrap_or_else(|| panic!("vy never reverses within T = {period_guess}"));
    let returning = &samples[reversed..];

    if let Some(pair) = returning
        .windows(2)
        .find(|pair| pair[0].state[1] * pair[1].state[1] <= 0.0)
    {
        let (a, b) = (&pair[0], &pair[1]);
        let fraction = a.state[1] / (a.state[1] - b.state[1]);
        return a.time + fraction * (b.time - a.time);
    }
    let closest = returning
        .iter()
        .min_by(|a, b| a.state[1].abs().total_cmp(&b.state[1].abs()))
        .expect("samples after vy reverses");
    closest.time
}

/// Propagates `state` over `span` without the STM.
pub fn flow(model: &Cr3bp, state: &CartesianState, span: TimeSpan) -> CartesianState {
    use cr3bp_core::traits::Integrator;
    integrator()
        .integrate(model, state.as_slice(), span, &Sampling::Endpoints)
        .expect("flow")
        .cartesian(1)
        .expect("final state")
}
