//! Gradient-informed kernels and the Metropolis-adjusted Langevin algorithm.

use rand::prelude::*;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

use super::{check_positive, restore_kernel, Kernel, KernelState, Proposal, ProposalState};
use crate::error::{McmcError, Result};
use crate::model::Model;

/// A kernel whose transition density depends on the gradient of the log-target.
pub trait GradKernel: Kernel {
    /// Draws candidate parameters from `q(. | old_params, old_grad)`.
    fn sample_new_params(&mut self, old_params: &[f64], old_grad: &[f64]) -> Vec<f64>;

    /// `log q(at | given_params, given_grad)`.
    fn log_density(&self, at: &[f64], given_params: &[f64], given_grad: &[f64]) -> f64;
}

/// Turns a [`GradKernel`] into a [`Proposal`].
///
/// The kernel ratio is `log q(old | new, grad(new)) - log q(new | old, grad(old))`,
/// where the backward term is evaluated after the model has moved so that the
/// gradient at the candidate is available.
#[derive(Debug, Clone)]
pub struct GradProposal<K> {
    pub kernel: K,
}

impl<K: GradKernel> GradProposal<K> {
    pub fn new(kernel: K) -> Self {
        Self { kernel }
    }
}

fn finite_gradient(model: &dyn Model) -> Result<Vec<f64>> {
    let grad = model.grad_log_p()?;
    if grad.iter().all(|g| g.is_finite()) {
        Ok(grad)
    } else {
        Err(McmcError::numerical(format!(
            "non-finite gradient {grad:?} at {:?}",
            model.params()
        )))
    }
}

impl<K: GradKernel> Proposal for GradProposal<K> {
    fn name(&self) -> &str {
        self.kernel.name()
    }

    fn transition(&mut self, model: &mut dyn Model) -> Result<f64> {
        let old_params = model.params().to_vec();
        let old_grad = finite_gradient(model)?;
        let new_params = self.kernel.sample_new_params(&old_params, &old_grad);
        let log_new_given_old = self.kernel.log_density(&new_params, &old_params, &old_grad);

        model.set_params(&new_params)?;
        if model.log_p() == f64::NEG_INFINITY {
            // Rejected regardless of the kernel term; the gradient may not exist here.
            return Ok(0.0);
        }
        let new_grad = finite_gradient(model)?;
        let log_old_given_new = self.kernel.log_density(&old_params, &new_params, &new_grad);
        Ok(log_old_given_new - log_new_given_old)
    }

    fn scalar(&self, name: &str) -> Option<f64> {
        self.kernel.scalar(name)
    }

    fn set_scalar(&mut self, name: &str, value: f64) -> Result<()> {
        self.kernel.set_scalar(name, value)
    }

    fn requires_gradients(&self) -> bool {
        true
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
Langevin drift-diffusion kernel with time step `dt`:

`new = old + dt^2 / 2 * grad + dt * N(0, I)`

Larger steps travel further but lower the acceptance rate.

# Examples

```rust
use tunable_mcmc::proposal::{GradKernel, Mala};

let kernel = Mala::new(0.5).unwrap();
// Density of the mean of the move: a normal with variance dt^2 per coordinate.
let lp = kernel.log_density(&[0.125], &[0.0], &[1.0]);
let expected = -(0.5f64).ln() - 0.5 * (2.0 * std::f64::consts::PI).ln();
assert!((lp - expected).abs() < 1e-12);
```
*/
#[derive(Debug, Clone)]
pub struct Mala {
    pub dt: f64,
    rng: SmallRng,
}

impl Mala {
    /// Fails with [`McmcError::Configuration`] unless `dt` is positive and finite.
    pub fn new(dt: f64) -> Result<Self> {
        check_positive("dt", dt)?;
        Ok(Self {
            dt,
            rng: SmallRng::from_entropy(),
        })
    }

    /// Returns the kernel seeded with `seed`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    fn drift(&self, params: f64, grad: f64) -> f64 {
        params + 0.5 * self.dt * self.dt * grad
    }
}

impl Default for Mala {
    fn default() -> Self {
        Self {
            dt: 1.0,
            rng: SmallRng::from_entropy(),
        }
    }
}

impl Kernel for Mala {
    fn name(&self) -> &str {
        "MALA"
    }

    fn scalar(&self, name: &str) -> Option<f64> {
        (name == "dt").then_some(self.dt)
    }

    fn set_scalar(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            "dt" => {
                check_positive(name, value)?;
                self.dt = value;
                Ok(())
            }
            _ => Err(McmcError::config(format!(
                "MALA has no parameter named `{name}`"
            ))),
        }
    }

    fn state(&self) -> KernelState {
        KernelState::Mala { dt: self.dt }
    }

    fn restore(&mut self, state: &KernelState) -> Result<()> {
        match state {
            KernelState::Mala { dt } => {
                check_positive("dt", *dt).map_err(|e| McmcError::invalid_state(e.to_string()))?;
                self.dt = *dt;
                Ok(())
            }
            other => Err(McmcError::invalid_state(format!(
                "expected a MALA state, got {other:?}"
            ))),
        }
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }
}

impl GradKernel for Mala {
    fn sample_new_params(&mut self, old_params: &[f64], old_grad: &[f64]) -> Vec<f64> {
        let dt = self.dt;
        let drifted: Vec<f64> = old_params
            .iter()
            .zip(old_grad)
            .map(|(&x, &g)| self.drift(x, g))
            .collect();
        drifted
            .into_iter()
            .map(|m| m + dt * self.rng.sample::<f64, _>(StandardNormal))
            .collect()
    }

    fn log_density(&self, at: &[f64], given_params: &[f64], given_grad: &[f64]) -> f64 {
        let log_norm = self.dt.ln() + 0.5 * (2.0 * PI).ln();
        at.iter()
            .zip(given_params)
            .zip(given_grad)
            .map(|((&y, &x), &g)| {
                let z = (y - self.drift(x, g)) / self.dt;
                -0.5 * z * z - log_norm
            })
            .sum()
    }
}

/// Metropolis-adjusted Langevin proposal.
pub type MalaProposal = GradProposal<Mala>;

impl MalaProposal {
    pub fn mala(dt: f64) -> Result<Self> {
        Ok(GradProposal::new(Mala::new(dt)?))
    }
}

impl Default for MalaProposal {
    fn default() -> Self {
        GradProposal::new(Mala::default())
    }
}
