//! Fitting support: harmonic least squares and a simplex minimizer.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{DMatrix, DVector, Dyn, storage::Owned};

use crate::error::LockerError;

/// Coefficients of `sin_coeff * sin(w x) + cos_coeff * cos(w x)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicFit {
    pub sin_coeff: f64,
    pub cos_coeff: f64,
}

impl HarmonicFit {
    /// Evaluate the harmonic at `x` for angular frequency `w = 2 pi f`.
    pub fn eval(&self, x: f64, freq_ghz: f64) -> f64 {
        let w = 2.0 * std::f64::consts::PI * freq_ghz;
        self.sin_coeff * (w * x).sin() + self.cos_coeff * (w * x).cos()
    }
}

/// Fit a single harmonic of frequency `freq_ghz` to `(x, y)` points. The mean
/// of `y` is removed before fitting, so only the oscillating part is captured.
pub fn harmonic_fit(points: &[(f64, f64)], freq_ghz: f64) -> Result<HarmonicFit, LockerError> {
    if points.len() < 4 {
        return Err(LockerError::Calibration("too few points for harmonic fit"));
    }
    if points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
        return Err(LockerError::Calibration("non-finite point in harmonic fit"));
    }
    let mean = points.iter().map(|(_, y)| y).sum::<f64>() / points.len() as f64;
    let centered: Vec<(f64, f64)> = points.iter().map(|&(x, y)| (x, y - mean)).collect();
    let problem = HarmonicProblem {
        points: centered,
        w: 2.0 * std::f64::consts::PI * freq_ghz,
        params: DVector::from_vec(vec![0.01, 0.01]),
    };
    let (problem, report) = LevenbergMarquardt::new().minimize(problem);
    if !report.termination.was_successful() {
        return Err(LockerError::Calibration("harmonic fit did not converge"));
    }
    let fit = HarmonicFit {
        sin_coeff: problem.params[0],
        cos_coeff: problem.params[1],
    };
    if !fit.sin_coeff.is_finite() || !fit.cos_coeff.is_finite() {
        return Err(LockerError::Calibration("harmonic fit diverged"));
    }
    Ok(fit)
}

struct HarmonicProblem {
    points: Vec<(f64, f64)>,
    w: f64,
    params: DVector<f64>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for HarmonicProblem {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &nalgebra::Vector<f64, Dyn, Self::ParameterStorage>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> nalgebra::Vector<f64, Dyn, Self::ParameterStorage> {
        self.params.clone_owned()
    }

    fn residuals(&self) -> Option<nalgebra::Vector<f64, Dyn, Self::ResidualStorage>> {
        let (sa, ca) = (self.params[0], self.params[1]);
        let mut residuals = DVector::zeros(self.points.len());
        for (row, &(x, y)) in self.points.iter().enumerate() {
            residuals[row] = sa * (self.w * x).sin() + ca * (self.w * x).cos() - y;
        }
        Some(residuals)
    }

    fn jacobian(&self) -> Option<nalgebra::Matrix<f64, Dyn, Dyn, Self::JacobianStorage>> {
        let mut jacobian = DMatrix::zeros(self.points.len(), 2);
        for (row, &(x, _)) in self.points.iter().enumerate() {
            jacobian[(row, 0)] = (self.w * x).sin();
            jacobian[(row, 1)] = (self.w * x).cos();
        }
        Some(jacobian)
    }
}

/// Derivative-free Nelder-Mead simplex minimizer.
///
/// The sweep objective is piecewise in parts of its parameter space, so a
/// gradient method is not usable there; the simplex only needs function
/// values.
pub fn nelder_mead<F>(f: F, x0: &[f64], step: f64, max_iter: usize) -> (Vec<f64>, f64)
where
    F: Fn(&[f64]) -> f64,
{
    let n = x0.len();
    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
    simplex.push((x0.to_vec(), f(x0)));
    for i in 0..n {
        let mut v = x0.to_vec();
        v[i] += step;
        let fv = f(&v);
        simplex.push((v, fv));
    }

    let (alpha, gamma, rho, sigma) = (1.0, 2.0, 0.5, 0.5);
    for _ in 0..max_iter {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let best = simplex[0].1;
        let worst = simplex[n].1;
        if (worst - best).abs() < 1e-12 {
            break;
        }

        // Centroid of all but the worst point.
        let mut centroid = vec![0.0; n];
        for (v, _) in &simplex[..n] {
            for (c, x) in centroid.iter_mut().zip(v) {
                *c += x / n as f64;
            }
        }
        let reflect: Vec<f64> = centroid
            .iter()
            .zip(&simplex[n].0)
            .map(|(c, w)| c + alpha * (c - w))
            .collect();
        let fr = f(&reflect);

        if fr < simplex[0].1 {
            let expand: Vec<f64> = centroid
                .iter()
                .zip(&reflect)
                .map(|(c, r)| c + gamma * (r - c))
                .collect();
            let fe = f(&expand);
            simplex[n] = if fe < fr { (expand, fe) } else { (reflect, fr) };
        } else if fr < simplex[n - 1].1 {
            simplex[n] = (reflect, fr);
        } else {
            let contract: Vec<f64> = centroid
                .iter()
                .zip(&simplex[n].0)
                .map(|(c, w)| c + rho * (w - c))
                .collect();
            let fc = f(&contract);
            if fc < simplex[n].1 {
                simplex[n] = (contract, fc);
            } else {
                // Shrink toward the best vertex.
                let best_v = simplex[0].0.clone();
                for (v, fv) in simplex.iter_mut().skip(1) {
                    for (x, b) in v.iter_mut().zip(&best_v) {
                        *x = b + sigma * (*x - b);
                    }
                    *fv = f(v);
                }
            }
        }
    }
    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    let (x, fx) = simplex.swap_remove(0);
    (x, fx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_harmonic_coefficients() {
        let freq = 2.600;
        let w = 2.0 * std::f64::consts::PI * freq;
        // Two whole periods sampled uniformly, so the constant offset is
        // exactly the mean and drops out.
        let period = 1.0 / freq;
        let points: Vec<(f64, f64)> = (0..40)
            .map(|i| {
                let x = i as f64 * period / 20.0;
                (x, 0.004 * (w * x).sin() - 0.002 * (w * x).cos() + 1.5)
            })
            .collect();
        let fit = harmonic_fit(&points, freq).unwrap();
        assert!((fit.sin_coeff - 0.004).abs() < 1e-6);
        assert!((fit.cos_coeff + 0.002).abs() < 1e-6);
    }

    #[test]
    fn too_few_points_is_an_error() {
        let points = [(0.0, 0.0), (0.1, 0.1)];
        assert!(harmonic_fit(&points, 2.6).is_err());
    }

    #[test]
    fn simplex_finds_quadratic_minimum() {
        let f = |x: &[f64]| (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2);
        let (x, fx) = nelder_mead(f, &[0.0, 0.0], 0.5, 500);
        assert!((x[0] - 3.0).abs() < 1e-4);
        assert!((x[1] + 1.0).abs() < 1e-4);
        assert!(fx < 1e-7);
    }

    #[test]
    fn simplex_handles_1d() {
        let f = |x: &[f64]| (x[0] + 2.0).abs();
        let (x, _) = nelder_mead(f, &[10.0], 1.0, 300);
        assert!((x[0] + 2.0).abs() < 1e-3);
    }
}
