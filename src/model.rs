/*!
The model contract consumed by proposals and the sampling driver.

A [`Model`] is a stateful object: it holds a parameter vector together with the
log-likelihood, log-prior and (optionally) gradients evaluated at that vector.
Assigning parameters through [`Model::set_params`] recomputes every cached
quantity before returning, so reads never observe stale values.

Most users do not implement [`Model`] by hand. Implement the stateless
[`LogDensity`] trait instead and wrap it in a [`CachedModel`]:

```rust
use tunable_mcmc::model::{CachedModel, LogDensity, Model};

struct StdNormal;

impl LogDensity for StdNormal {
    fn dim(&self) -> usize {
        1
    }
    fn log_likelihood(&self, x: &[f64]) -> f64 {
        -0.5 * x[0] * x[0]
    }
}

let mut model = CachedModel::new(StdNormal, &[1.0]).unwrap();
assert_eq!(model.log_likelihood(), -0.5);
model.set_params(&[2.0]).unwrap();
assert_eq!(model.log_likelihood(), -2.0);
```
*/

use serde::{Deserialize, Serialize};

use crate::error::{McmcError, Result};

/// A complete snapshot of a model: enough to restore it without re-evaluating
/// the likelihood or prior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub params: Vec<f64>,
    pub log_likelihood: f64,
    pub log_prior: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grad_log_likelihood: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grad_log_prior: Option<Vec<f64>>,
}

impl ModelState {
    /// Log of the unnormalized posterior, `log_likelihood + log_prior`.
    pub fn log_p(&self) -> f64 {
        self.log_likelihood + self.log_prior
    }

    /// Checks the snapshot against the shape of the model it is restored into.
    ///
    /// `with_gradients` requires both gradient vectors to be present; without it
    /// neither may be.
    pub fn validate(&self, num_params: usize, with_gradients: bool) -> Result<()> {
        if self.params.len() != num_params {
            return Err(McmcError::invalid_state(format!(
                "model state has {} parameters, model expects {}",
                self.params.len(),
                num_params
            )));
        }
        if let Some(i) = self.params.iter().position(|x| !x.is_finite()) {
            return Err(McmcError::invalid_state(format!(
                "parameter {i} is not finite ({})",
                self.params[i]
            )));
        }
        if self.log_likelihood.is_nan() || self.log_prior.is_nan() {
            return Err(McmcError::invalid_state(
                "model state carries a NaN log-likelihood or log-prior",
            ));
        }
        for (name, grad) in [
            ("grad_log_likelihood", &self.grad_log_likelihood),
            ("grad_log_prior", &self.grad_log_prior),
        ] {
            match grad {
                Some(g) if g.len() != num_params => {
                    return Err(McmcError::invalid_state(format!(
                        "{name} has length {}, model expects {num_params}",
                        g.len()
                    )))
                }
                None if with_gradients => {
                    return Err(McmcError::invalid_state(format!(
                        "{name} is missing from the state of a gradient model"
                    )))
                }
                Some(_) if !with_gradients => {
                    return Err(McmcError::invalid_state(format!(
                        "{name} given for a model without gradients"
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// The capability set every sampled model exposes.
pub trait Model {
    fn num_params(&self) -> usize;

    /// Parameter names, in the same order as [`Model::params`].
    fn param_names(&self) -> Vec<String>;

    /// The current parameter vector.
    fn params(&self) -> &[f64];

    /// Assigns new parameters and recomputes the log-likelihood, log-prior and
    /// gradients. On error the model keeps its previous parameters.
    fn set_params(&mut self, params: &[f64]) -> Result<()>;

    /// Cached log-likelihood at the current parameters.
    fn log_likelihood(&self) -> f64;

    /// Cached log-prior at the current parameters.
    fn log_prior(&self) -> f64;

    /// Capability query used to pick a default proposal.
    fn supports_gradients(&self) -> bool {
        false
    }

    fn grad_log_likelihood(&self) -> Result<&[f64]> {
        Err(McmcError::UnsupportedOperation(
            "model does not provide gradients of the log-likelihood".into(),
        ))
    }

    fn grad_log_prior(&self) -> Result<&[f64]> {
        Err(McmcError::UnsupportedOperation(
            "model does not provide gradients of the log-prior".into(),
        ))
    }

    /// Snapshot of the current state. Never has side effects.
    fn get_state(&self) -> ModelState;

    /// Overwrites the model with a previously captured snapshot.
    fn set_state(&mut self, state: &ModelState) -> Result<()>;

    fn log_p(&self) -> f64 {
        self.log_likelihood() + self.log_prior()
    }

    /// Gradient of [`Model::log_p`].
    fn grad_log_p(&self) -> Result<Vec<f64>> {
        let gl = self.grad_log_likelihood()?;
        let gp = self.grad_log_prior()?;
        Ok(gl.iter().zip(gp).map(|(a, b)| a + b).collect())
    }
}

/// A stateless log-density, split into likelihood and prior.
///
/// Gradients are optional: override [`LogDensity::has_gradients`] together
/// with the gradient methods to enable Langevin proposals.
pub trait LogDensity {
    /// Number of parameters.
    fn dim(&self) -> usize;

    fn param_names(&self) -> Vec<String> {
        (0..self.dim()).map(|i| format!("dim_{i}")).collect()
    }

    fn log_likelihood(&self, params: &[f64]) -> f64;

    /// Log-prior; flat by default.
    fn log_prior(&self, _params: &[f64]) -> f64 {
        0.0
    }

    fn has_gradients(&self) -> bool {
        false
    }

    fn grad_log_likelihood(&self, _params: &[f64]) -> Option<Vec<f64>> {
        None
    }

    /// Gradient of the log-prior; zero by default to match the flat prior.
    fn grad_log_prior(&self, _params: &[f64]) -> Option<Vec<f64>> {
        Some(vec![0.0; self.dim()])
    }
}

/// Adapts a [`LogDensity`] into a [`Model`] by caching every evaluation.
#[derive(Debug, Clone)]
pub struct CachedModel<D> {
    density: D,
    state: ModelState,
}

impl<D: LogDensity> CachedModel<D> {
    /// Builds the model and evaluates it at `initial`.
    pub fn new(density: D, initial: &[f64]) -> Result<Self> {
        let state = evaluate(&density, initial)?;
        Ok(Self { density, state })
    }

    pub fn density(&self) -> &D {
        &self.density
    }
}

fn evaluate<D: LogDensity>(density: &D, params: &[f64]) -> Result<ModelState> {
    let dim = density.dim();
    if params.len() != dim {
        return Err(McmcError::invalid_state(format!(
            "got {} parameters, model expects {dim}",
            params.len()
        )));
    }
    let (grad_log_likelihood, grad_log_prior) = if density.has_gradients() {
        let gl = density.grad_log_likelihood(params).ok_or_else(|| {
            McmcError::UnsupportedOperation("density advertises gradients but returned none".into())
        })?;
        let gp = density.grad_log_prior(params).ok_or_else(|| {
            McmcError::UnsupportedOperation("density advertises gradients but returned none".into())
        })?;
        if gl.len() != dim || gp.len() != dim {
            return Err(McmcError::invalid_state(format!(
                "gradient length mismatch: {} and {}, expected {dim}",
                gl.len(),
                gp.len()
            )));
        }
        (Some(gl), Some(gp))
    } else {
        (None, None)
    };
    Ok(ModelState {
        params: params.to_vec(),
        log_likelihood: density.log_likelihood(params),
        log_prior: density.log_prior(params),
        grad_log_likelihood,
        grad_log_prior,
    })
}

impl<D: LogDensity> Model for CachedModel<D> {
    fn num_params(&self) -> usize {
        self.density.dim()
    }

    fn param_names(&self) -> Vec<String> {
        self.density.param_names()
    }

    fn params(&self) -> &[f64] {
        &self.state.params
    }

    fn set_params(&mut self, params: &[f64]) -> Result<()> {
        // Everything is computed before the swap so a failure leaves the old state intact.
        self.state = evaluate(&self.density, params)?;
        Ok(())
    }

    fn log_likelihood(&self) -> f64 {
        self.state.log_likelihood
    }

    fn log_prior(&self) -> f64 {
        self.state.log_prior
    }

    fn supports_gradients(&self) -> bool {
        self.density.has_gradients()
    }

    fn grad_log_likelihood(&self) -> Result<&[f64]> {
        self.state.grad_log_likelihood.as_deref().ok_or_else(|| {
            McmcError::UnsupportedOperation(
                "model does not provide gradients of the log-likelihood".into(),
            )
        })
    }

    fn grad_log_prior(&self) -> Result<&[f64]> {
        self.state.grad_log_prior.as_deref().ok_or_else(|| {
            McmcError::UnsupportedOperation(
                "model does not provide gradients of the log-prior".into(),
            )
        })
    }

    fn get_state(&self) -> ModelState {
        self.state.clone()
    }

    fn set_state(&mut self, state: &ModelState) -> Result<()> {
        state.validate(self.num_params(), self.supports_gradients())?;
        self.state = state.clone();
        Ok(())
    }
}
