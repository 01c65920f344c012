/*!
Ready-made target densities implementing [`LogDensity`].

These are small, closed-form targets: handy for checking a proposal or a
tuning schedule before pointing the sampler at a real model, and used
throughout the test suite.

# Examples

```rust
use tunable_mcmc::distributions::Gaussian2D;
use tunable_mcmc::model::{CachedModel, Model};
use ndarray::{arr1, arr2};

let target = Gaussian2D {
    mean: arr1(&[0.0, 1.0]),
    cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
};
let model = CachedModel::new(target, &[0.0, 1.0]).unwrap();
assert_eq!(model.log_likelihood(), 0.0);
assert_eq!(model.grad_log_likelihood().unwrap(), &[0.0, 0.0]);
```
*/

use ndarray::{arr2, Array1, Array2};
use std::f64::consts::PI;

use crate::model::LogDensity;

/// Independent normal coordinates, `x_i ~ N(mean_i, std_i^2)`, fully normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Gaussian {
    /// # Panics
    ///
    /// If `mean` and `std` differ in length.
    pub fn new(mean: Vec<f64>, std: Vec<f64>) -> Self {
        assert_eq!(mean.len(), std.len(), "mean and std must have equal length");
        Self { mean, std }
    }

    /// The standard normal in `dim` dimensions.
    pub fn standard(dim: usize) -> Self {
        Self::new(vec![0.0; dim], vec![1.0; dim])
    }
}

impl LogDensity for Gaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn log_likelihood(&self, x: &[f64]) -> f64 {
        let half_log_2pi = 0.5 * (2.0 * PI).ln();
        x.iter()
            .zip(&self.mean)
            .zip(&self.std)
            .map(|((x, m), s)| {
                let z = (x - m) / s;
                -0.5 * z * z - s.ln() - half_log_2pi
            })
            .sum()
    }

    fn has_gradients(&self) -> bool {
        true
    }

    fn grad_log_likelihood(&self, x: &[f64]) -> Option<Vec<f64>> {
        Some(
            x.iter()
                .zip(&self.mean)
                .zip(&self.std)
                .map(|((x, m), s)| -(x - m) / (s * s))
                .collect(),
        )
    }
}

/**
A 2D Gaussian parameterized by a mean vector and a 2×2 covariance matrix.

The log-density is unnormalized: it is zero at the mean.
*/
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian2D {
    pub mean: Array1<f64>,
    pub cov: Array2<f64>,
}

impl Gaussian2D {
    fn inv_cov(&self) -> Array2<f64> {
        let (a, b, c, d) = (
            self.cov[(0, 0)],
            self.cov[(0, 1)],
            self.cov[(1, 0)],
            self.cov[(1, 1)],
        );
        let det = a * d - b * c;
        arr2(&[[d, -b], [-c, a]]) / det
    }

    fn diff(&self, theta: &[f64]) -> Array1<f64> {
        Array1::from_vec(theta.to_vec()) - &self.mean
    }
}

impl LogDensity for Gaussian2D {
    fn dim(&self) -> usize {
        2
    }

    fn param_names(&self) -> Vec<String> {
        vec!["x".into(), "y".into()]
    }

    fn log_likelihood(&self, theta: &[f64]) -> f64 {
        let diff = self.diff(theta);
        -0.5 * diff.dot(&self.inv_cov().dot(&diff))
    }

    fn has_gradients(&self) -> bool {
        true
    }

    fn grad_log_likelihood(&self, theta: &[f64]) -> Option<Vec<f64>> {
        let diff = self.diff(theta);
        Some((-self.inv_cov().dot(&diff)).to_vec())
    }
}

/// Unknown mean of normally distributed observations with a normal prior:
/// `y_i ~ N(mu, noise_std^2)`, `mu ~ N(prior_mean, prior_std^2)`.
///
/// The posterior is normal and available through [`ConjugateNormal::posterior`],
/// which makes this the reference model for checking likelihood and prior
/// bookkeeping together.
#[derive(Debug, Clone, PartialEq)]
pub struct ConjugateNormal {
    pub data: Vec<f64>,
    pub noise_std: f64,
    pub prior_mean: f64,
    pub prior_std: f64,
}

impl ConjugateNormal {
    /// Posterior mean and standard deviation of `mu`.
    pub fn posterior(&self) -> (f64, f64) {
        let n = self.data.len() as f64;
        let noise_var = self.noise_std * self.noise_std;
        let prior_var = self.prior_std * self.prior_std;
        let precision = n / noise_var + 1.0 / prior_var;
        let sum: f64 = self.data.iter().sum();
        let mean = (sum / noise_var + self.prior_mean / prior_var) / precision;
        (mean, precision.recip().sqrt())
    }
}

impl LogDensity for ConjugateNormal {
    fn dim(&self) -> usize {
        1
    }

    fn param_names(&self) -> Vec<String> {
        vec!["mu".into()]
    }

    fn log_likelihood(&self, x: &[f64]) -> f64 {
        let var = self.noise_std * self.noise_std;
        self.data
            .iter()
            .map(|y| -0.5 * (y - x[0]).powi(2) / var)
            .sum()
    }

    fn log_prior(&self, x: &[f64]) -> f64 {
        -0.5 * ((x[0] - self.prior_mean) / self.prior_std).powi(2)
    }

    fn has_gradients(&self) -> bool {
        true
    }

    fn grad_log_likelihood(&self, x: &[f64]) -> Option<Vec<f64>> {
        let var = self.noise_std * self.noise_std;
        Some(vec![self.data.iter().map(|y| (y - x[0]) / var).sum()])
    }

    fn grad_log_prior(&self, x: &[f64]) -> Option<Vec<f64>> {
        Some(vec![
            -(x[0] - self.prior_mean) / (self.prior_std * self.prior_std),
        ])
    }
}

#[cfg(test)]
mod distributions_tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn gaussian_matches_normal_pdf() {
        let distr = Gaussian::standard(1);
        let p = distr.log_likelihood(&[1.0]).exp();
        assert_abs_diff_eq!(p, 0.24197072451914337, epsilon = 1e-12);

        let distr = Gaussian::new(vec![0.0, 0.0, 0.0], vec![3.0, 3.0, 3.0]);
        let p = distr.log_likelihood(&[1.0, 2.0, 3.0]).exp();
        assert_abs_diff_eq!(p, 0.001080393185560214, epsilon = 1e-12);
    }

    #[test]
    fn gaussian_2d_gradient_matches_finite_differences() {
        let target = Gaussian2D {
            mean: arr1(&[0.0, 1.0]),
            cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
        };
        let x = [0.7, -0.4];
        let grad = target.grad_log_likelihood(&x).unwrap();
        let h = 1e-6;
        for i in 0..2 {
            let mut up = x;
            let mut down = x;
            up[i] += h;
            down[i] -= h;
            let fd = (target.log_likelihood(&up) - target.log_likelihood(&down)) / (2.0 * h);
            assert_abs_diff_eq!(grad[i], fd, epsilon = 1e-6);
        }
    }

    #[test]
    fn conjugate_posterior() {
        let model = ConjugateNormal {
            data: vec![1.0, 2.0, 3.0],
            noise_std: 1.0,
            prior_mean: 0.0,
            prior_std: 1.0,
        };
        let (mean, std) = model.posterior();
        assert_abs_diff_eq!(mean, 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(std, 0.5, epsilon = 1e-12);
        // The posterior mode is where the gradients cancel.
        let gl = model.grad_log_likelihood(&[mean]).unwrap()[0];
        let gp = model.grad_log_prior(&[mean]).unwrap()[0];
        assert_abs_diff_eq!(gl + gp, 0.0, epsilon = 1e-12);
    }
}
