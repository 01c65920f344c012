//! Symmetric kernels and the Gaussian random walk.

use nalgebra::{Cholesky, DMatrix, DVector};
use ndarray::Array2;
use rand::prelude::*;
use rand_distr::StandardNormal;

use super::{check_positive, restore_kernel, Kernel, KernelState, Proposal, ProposalState};
use crate::error::{McmcError, Result};
use crate::model::Model;

/// A kernel with `q(new | old) == q(old | new)`.
pub trait SymmetricKernel: Kernel {
    /// Draws candidate parameters given the current ones.
    fn sample_new_params(&mut self, old_params: &[f64]) -> Result<Vec<f64>>;
}

/// Turns a [`SymmetricKernel`] into a [`Proposal`] whose kernel ratio is exactly zero.
#[derive(Debug, Clone)]
pub struct SymmetricProposal<K> {
    pub kernel: K,
}

impl<K: SymmetricKernel> SymmetricProposal<K> {
    pub fn new(kernel: K) -> Self {
        Self { kernel }
    }
}

impl<K: SymmetricKernel> Proposal for SymmetricProposal<K> {
    fn name(&self) -> &str {
        self.kernel.name()
    }

    fn transition(&mut self, model: &mut dyn Model) -> Result<f64> {
        let new_params = self.kernel.sample_new_params(model.params())?;
        model.set_params(&new_params)?;
        Ok(0.0)
    }

    fn scalar(&self, name: &str) -> Option<f64> {
        self.kernel.scalar(name)
    }

    fn set_scalar(&mut self, name: &str, value: f64) -> Result<()> {
        self.kernel.set_scalar(name, value)
    }

    fn state(&self) -> ProposalState {
        ProposalState {
            name: self.kernel.name().to_string(),
            kernel: self.kernel.state(),
            tuner: None,
        }
    }

    fn set_state(&mut self, state: &ProposalState) -> Result<()> {
        restore_kernel(&mut self.kernel, state)
    }

    fn reseed(&mut self, seed: u64) {
        self.kernel.reseed(seed)
    }
}

/**
Gaussian random-walk kernel: `new = old + N(0, scale^2 * cov)`.

Without an explicit covariance the identity is used; it is materialized on the
first draw, sized to the parameter vector it is applied to.

# Examples

```rust
use tunable_mcmc::proposal::{Kernel, RandomWalk, SymmetricKernel};

let mut kernel = RandomWalk::new(0.5).unwrap().set_seed(42);
assert!(kernel.cov().is_none());
let candidate = kernel.sample_new_params(&[0.0, 0.0, 0.0]).unwrap();
assert_eq!(candidate.len(), 3);
assert_eq!(kernel.cov().unwrap().nrows(), 3);
assert_eq!(kernel.scalar("scale"), Some(0.5));
```
*/
#[derive(Debug, Clone)]
pub struct RandomWalk {
    pub scale: f64,
    cov: Option<Array2<f64>>,
    chol: Option<DMatrix<f64>>,
    rng: SmallRng,
}

impl RandomWalk {
    /// Fails with [`McmcError::Configuration`] unless `scale` is positive and finite.
    pub fn new(scale: f64) -> Result<Self> {
        check_positive("scale", scale)?;
        Ok(Self {
            scale,
            cov: None,
            chol: None,
            rng: SmallRng::from_entropy(),
        })
    }

    /// Random walk with a user-supplied covariance; must be symmetric positive definite.
    pub fn with_cov(scale: f64, cov: Array2<f64>) -> Result<Self> {
        check_positive("scale", scale)?;
        let chol = lower_factor(&cov).map_err(McmcError::Configuration)?;
        Ok(Self {
            scale,
            cov: Some(cov),
            chol: Some(chol),
            rng: SmallRng::from_entropy(),
        })
    }

    /// Returns the kernel seeded with `seed`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn cov(&self) -> Option<&Array2<f64>> {
        self.cov.as_ref()
    }

    fn factor(&mut self, dim: usize) -> Result<&DMatrix<f64>> {
        if self.cov.is_none() {
            self.cov = Some(Array2::eye(dim));
        }
        let chol = self.chol.get_or_insert_with(|| DMatrix::identity(dim, dim));
        if chol.nrows() != dim {
            return Err(McmcError::invalid_state(format!(
                "random-walk covariance is {0}x{0}, parameter vector has length {dim}",
                chol.nrows()
            )));
        }
        Ok(chol)
    }
}

impl Default for RandomWalk {
    fn default() -> Self {
        Self {
            scale: 1.0,
            cov: None,
            chol: None,
            rng: SmallRng::from_entropy(),
        }
    }
}

impl Kernel for RandomWalk {
    fn name(&self) -> &str {
        "Random Walk"
    }

    fn scalar(&self, name: &str) -> Option<f64> {
        (name == "scale").then_some(self.scale)
    }

    fn set_scalar(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            "scale" => {
                check_positive(name, value)?;
                self.scale = value;
                Ok(())
            }
            _ => Err(McmcError::config(format!(
                "random walk has no parameter named `{name}`"
            ))),
        }
    }

    fn state(&self) -> KernelState {
        KernelState::RandomWalk {
            scale: self.scale,
            cov: self.cov.clone(),
        }
    }

    fn restore(&mut self, state: &KernelState) -> Result<()> {
        let KernelState::RandomWalk { scale, cov } = state else {
            return Err(McmcError::invalid_state(format!(
                "expected a random-walk state, got {state:?}"
            )));
        };
        check_positive("scale", *scale).map_err(|e| McmcError::invalid_state(e.to_string()))?;
        let chol = cov
            .as_ref()
            .map(lower_factor)
            .transpose()
            .map_err(McmcError::InvalidState)?;
        self.scale = *scale;
        self.cov = cov.clone();
        self.chol = chol;
        Ok(())
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }
}

impl SymmetricKernel for RandomWalk {
    fn sample_new_params(&mut self, old_params: &[f64]) -> Result<Vec<f64>> {
        let dim = old_params.len();
        let z = DVector::<f64>::from_fn(dim, |_, _| self.rng.sample(StandardNormal));
        let scale = self.scale;
        let step = self.factor(dim)? * z * scale;
        Ok(old_params.iter().zip(step.iter()).map(|(x, s)| x + s).collect())
    }
}

/// Symmetric random-walk Metropolis.
pub type RandomWalkProposal = SymmetricProposal<RandomWalk>;

impl RandomWalkProposal {
    /// Random walk with identity covariance and the given scale.
    pub fn random_walk(scale: f64) -> Result<Self> {
        Ok(SymmetricProposal::new(RandomWalk::new(scale)?))
    }
}

impl Default for RandomWalkProposal {
    fn default() -> Self {
        SymmetricProposal::new(RandomWalk::default())
    }
}

/// Lower Cholesky factor of a covariance given as an `ndarray` matrix.
fn lower_factor(cov: &Array2<f64>) -> std::result::Result<DMatrix<f64>, String> {
    let n = cov.nrows();
    if cov.ncols() != n {
        return Err(format!("covariance must be square, got {:?}", cov.shape()));
    }
    let m = DMatrix::from_fn(n, n, |i, j| cov[(i, j)]);
    if m.iter().any(|x| !x.is_finite()) {
        return Err("covariance has non-finite entries".into());
    }
    if (&m - m.transpose()).amax() > 1e-10 * (1.0 + m.amax()) {
        return Err("covariance is not symmetric".into());
    }
    Cholesky::new(m)
        .map(|chol| chol.l())
        .ok_or_else(|| "covariance is not positive definite".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Gaussian;
    use crate::model::CachedModel;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn lower_factor_reconstructs_matrix() {
        let l = lower_factor(&arr2(&[[4.0, 2.0], [2.0, 3.0]])).unwrap();
        assert_eq!(l[(0, 1)], 0.0);
        let expected = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        assert!((&l * l.transpose() - expected).amax() < 1e-12);
        assert!(lower_factor(&arr2(&[[1.0, 2.0], [2.0, 1.0]])).is_err());
        assert!(lower_factor(&arr2(&[[1.0, 0.5], [0.0, 1.0]])).is_err());
        assert!(lower_factor(&Array2::zeros((2, 3))).is_err());
    }

    #[test]
    fn non_positive_scale_is_rejected_up_front() {
        for scale in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                RandomWalkProposal::random_walk(scale),
                Err(McmcError::Configuration(_))
            ));
        }
    }

    #[test]
    fn with_cov_rejects_indefinite_matrix() {
        let err = RandomWalk::with_cov(1.0, arr2(&[[1.0, 0.0], [0.0, -1.0]])).unwrap_err();
        assert!(matches!(err, McmcError::Configuration(_)));
    }

    #[test]
    fn empirical_step_covariance_matches() {
        let cov = arr2(&[[2.0, 0.6], [0.6, 1.0]]);
        let mut kernel = RandomWalk::with_cov(0.5, cov.clone()).unwrap().set_seed(7);
        let n = 40_000;
        let mut acc = Array2::<f64>::zeros((2, 2));
        for _ in 0..n {
            let s = kernel.sample_new_params(&[0.0, 0.0]).unwrap();
            for i in 0..2 {
                for j in 0..2 {
                    acc[(i, j)] += s[i] * s[j];
                }
            }
        }
        let empirical = acc / n as f64;
        assert_abs_diff_eq!(empirical, cov * 0.25, epsilon = 0.02);
    }

    #[test]
    fn dimension_mismatch_is_invalid_state() {
        let mut kernel = RandomWalk::with_cov(1.0, Array2::eye(3)).unwrap();
        assert!(matches!(
            kernel.sample_new_params(&[0.0, 0.0]),
            Err(McmcError::InvalidState(_))
        ));
    }

    #[test]
    fn kernel_ratio_is_zero_and_model_is_restored() {
        let mut model = CachedModel::new(Gaussian::standard(2), &[0.3, -0.2]).unwrap();
        let before = model.get_state();
        let mut proposal = RandomWalkProposal::random_walk(0.8).unwrap();
        proposal.reseed(3);
        for _ in 0..100 {
            let (candidate, log_ratio) = proposal.propose(&mut model).unwrap();
            let expected = (candidate.log_likelihood - before.log_likelihood)
                + (candidate.log_prior - before.log_prior);
            assert_eq!(log_ratio, expected);
            assert_eq!(model.get_state(), before);
        }
    }

    #[test]
    fn state_round_trip_keeps_covariance() {
        let mut proposal = RandomWalkProposal::new(
            RandomWalk::with_cov(0.3, arr2(&[[1.0, 0.2], [0.2, 1.0]])).unwrap(),
        );
        let state = proposal.state();
        let mut other = RandomWalkProposal::default();
        other.set_state(&state).unwrap();
        assert_eq!(other.state(), state);
        assert_eq!(other.scalar("scale"), Some(0.3));

        let mut bad = state.clone();
        bad.kernel = KernelState::Mala { dt: 1.0 };
        assert!(matches!(
            proposal.set_state(&bad),
            Err(McmcError::InvalidState(_))
        ));
        assert!(proposal.set_scalar("dt", 1.0).is_err());
        assert!(proposal.set_scalar("scale", -1.0).is_err());
    }
}
