/*!
# Metropolis–Hastings proposals

A proposal turns the current state of a [`Model`] into a candidate state plus
the log of the Metropolis–Hastings acceptance ratio:

\[
\log \alpha = \left[\log L(\text{new}) - \log L(\text{old})\right]
            + \left[\log \pi(\text{new}) - \log \pi(\text{old})\right]
            + \log \frac{q(\text{old} \mid \text{new})}{q(\text{new} \mid \text{old})}
\]

The target part is computed once, by [`Proposal::propose`]. Implementors only
provide [`Proposal::transition`], which moves the model to the candidate and
returns the kernel part. Two families are provided:

- [`SymmetricProposal`] wraps a [`SymmetricKernel`]; the kernel part is always zero.
- [`GradProposal`] wraps a [`GradKernel`]; the kernel part is evaluated from the
  gradients at both ends of the move.

Self-tuning is composed on top of any proposal with
[`Tuned`](crate::tuning::Tuned).

`propose` always leaves the model exactly as it found it, including when the
kernel or the model fails halfway through a move.
*/

pub mod gradient;
pub mod symmetric;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{McmcError, Result};
use crate::model::{Model, ModelState};
use crate::tuning::TunerSettings;

pub use gradient::{GradKernel, GradProposal, Mala, MalaProposal};
pub use symmetric::{RandomWalk, RandomWalkProposal, SymmetricKernel, SymmetricProposal};

/// Persistent fields of a kernel, one variant per built-in kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KernelState {
    RandomWalk {
        scale: f64,
        /// `None` until the default identity covariance has been materialized.
        cov: Option<Array2<f64>>,
    },
    Mala {
        dt: f64,
    },
}

/// Snapshot of a proposal, used to persist it next to a chain and to resume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalState {
    pub name: String,
    pub kernel: KernelState,
    /// Present only for proposals wrapped in [`Tuned`](crate::tuning::Tuned).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuner: Option<TunerSettings>,
}

/// Parameters and persistence shared by every kernel.
pub trait Kernel {
    fn name(&self) -> &str;

    /// Reads a named scalar parameter, e.g. `"scale"` or `"dt"`.
    fn scalar(&self, name: &str) -> Option<f64>;

    /// Writes a named scalar parameter. Unknown names are a configuration error.
    fn set_scalar(&mut self, name: &str, value: f64) -> Result<()>;

    fn state(&self) -> KernelState;

    /// Restores from a snapshot, validating it first.
    fn restore(&mut self, state: &KernelState) -> Result<()>;

    /// Re-seeds the kernel's random number generator.
    fn reseed(&mut self, seed: u64);
}

/// A Metropolis–Hastings transition.
pub trait Proposal {
    fn name(&self) -> &str;

    /**
    Moves `model` to a candidate and returns the log kernel ratio
    `log q(old | new) - log q(new | old)`.

    The model is left at the candidate; [`Proposal::propose`] restores it.
    */
    fn transition(&mut self, model: &mut dyn Model) -> Result<f64>;

    /**
    Proposes a candidate state and returns it together with the log acceptance ratio.

    The model is restored to its previous state before returning, on success and on
    error alike.

    # Errors

    [`McmcError::Numerical`] if the current log-target is not finite, if the candidate
    log-target is NaN or `+inf`, or if the ratio is NaN. A candidate with log-target
    `-inf` yields a ratio of `-inf` and is never accepted.
    */
    fn propose(&mut self, model: &mut dyn Model) -> Result<(ModelState, f64)> {
        let old_state = model.get_state();
        let (old_log_likelihood, old_log_prior) = (model.log_likelihood(), model.log_prior());
        if !(old_log_likelihood + old_log_prior).is_finite() {
            return Err(McmcError::numerical(format!(
                "current state has non-finite log-target (log-likelihood {old_log_likelihood}, log-prior {old_log_prior})"
            )));
        }

        let outcome = self.transition(model).and_then(|log_kernel_ratio| {
            let new_state = model.get_state();
            let (new_log_likelihood, new_log_prior) = (model.log_likelihood(), model.log_prior());
            let new_log_p = new_log_likelihood + new_log_prior;
            if new_log_p.is_nan() || new_log_p == f64::INFINITY {
                return Err(McmcError::numerical(format!(
                    "candidate has invalid log-target (log-likelihood {new_log_likelihood}, log-prior {new_log_prior})"
                )));
            }
            if new_log_p == f64::NEG_INFINITY {
                return Ok((new_state, f64::NEG_INFINITY));
            }
            let log_target_ratio = (new_log_likelihood - old_log_likelihood)
                + (new_log_prior - old_log_prior);
            let log_ratio = log_target_ratio + log_kernel_ratio;
            if log_ratio.is_nan() {
                return Err(McmcError::numerical(format!(
                    "acceptance ratio is NaN (kernel ratio {log_kernel_ratio})"
                )));
            }
            Ok((new_state, log_ratio))
        });

        let restored = model.set_state(&old_state);
        restored.and(outcome)
    }

    fn scalar(&self, name: &str) -> Option<f64>;

    fn set_scalar(&mut self, name: &str, value: f64) -> Result<()>;

    /// Whether [`Proposal::transition`] reads model gradients.
    fn requires_gradients(&self) -> bool {
        false
    }

    fn is_tunable(&self) -> bool {
        false
    }

    /// Adapts the proposal to the observed acceptance rate.
    ///
    /// Returns the `(old, new)` value of the tuned parameter when it changed.
    fn tune(&mut self, _acceptance_rate: f64) -> Result<Option<(f64, f64)>> {
        Ok(None)
    }

    fn state(&self) -> ProposalState;

    fn set_state(&mut self, state: &ProposalState) -> Result<()>;

    fn reseed(&mut self, seed: u64);
}

impl<P: Proposal + ?Sized> Proposal for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn transition(&mut self, model: &mut dyn Model) -> Result<f64> {
        (**self).transition(model)
    }

    fn propose(&mut self, model: &mut dyn Model) -> Result<(ModelState, f64)> {
        (**self).propose(model)
    }

    fn scalar(&self, name: &str) -> Option<f64> {
        (**self).scalar(name)
    }

    fn set_scalar(&mut self, name: &str, value: f64) -> Result<()> {
        (**self).set_scalar(name, value)
    }

    fn requires_gradients(&self) -> bool {
        (**self).requires_gradients()
    }

    fn is_tunable(&self) -> bool {
        (**self).is_tunable()
    }

    fn tune(&mut self, acceptance_rate: f64) -> Result<Option<(f64, f64)>> {
        (**self).tune(acceptance_rate)
    }

    fn state(&self) -> ProposalState {
        (**self).state()
    }

    fn set_state(&mut self, state: &ProposalState) -> Result<()> {
        (**self).set_state(state)
    }

    fn reseed(&mut self, seed: u64) {
        (**self).reseed(seed)
    }
}

/// Shared `set_state` for the untuned wrappers.
pub(crate) fn restore_kernel<K: Kernel>(kernel: &mut K, state: &ProposalState) -> Result<()> {
    if state.tuner.is_some() {
        return Err(McmcError::invalid_state(format!(
            "proposal `{}` is not tunable but the state carries tuner settings",
            kernel.name()
        )));
    }
    kernel.restore(&state.kernel)
}

pub(crate) fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(McmcError::config(format!(
            "`{name}` must be positive and finite, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::Gaussian;
    use crate::model::{CachedModel, LogDensity};

    /// Moves to a fixed point regardless of the current one.
    struct Jump {
        to: Vec<f64>,
        ratio: f64,
    }

    impl Proposal for Jump {
        fn name(&self) -> &str {
            "jump"
        }
        fn transition(&mut self, model: &mut dyn Model) -> Result<f64> {
            model.set_params(&self.to)?;
            Ok(self.ratio)
        }
        fn scalar(&self, _name: &str) -> Option<f64> {
            None
        }
        fn set_scalar(&mut self, name: &str, _value: f64) -> Result<()> {
            Err(McmcError::config(name.to_string()))
        }
        fn state(&self) -> ProposalState {
            ProposalState {
                name: "jump".into(),
                kernel: KernelState::Mala { dt: 0.0 },
                tuner: None,
            }
        }
        fn set_state(&mut self, _state: &ProposalState) -> Result<()> {
            Ok(())
        }
        fn reseed(&mut self, _seed: u64) {}
    }

    /// Support restricted to the positive half-line.
    struct HalfNormal;

    impl LogDensity for HalfNormal {
        fn dim(&self) -> usize {
            1
        }
        fn log_likelihood(&self, x: &[f64]) -> f64 {
            -0.5 * x[0] * x[0]
        }
        fn log_prior(&self, x: &[f64]) -> f64 {
            if x[0] > 0.0 {
                0.0
            } else {
                f64::NEG_INFINITY
            }
        }
    }

    #[test]
    fn ratio_combines_target_and_kernel_terms() {
        let mut model = CachedModel::new(Gaussian::standard(1), &[0.0]).unwrap();
        let before = model.get_state();
        let mut jump = Jump {
            to: vec![2.0],
            ratio: 0.25,
        };
        let (candidate, log_ratio) = jump.propose(&mut model).unwrap();
        assert_eq!(candidate.params, vec![2.0]);
        assert!((log_ratio - (-2.0 + 0.25)).abs() < 1e-12);
        assert_eq!(model.get_state(), before);
    }

    #[test]
    fn outside_support_is_rejected_not_an_error() {
        let mut model = CachedModel::new(HalfNormal, &[1.0]).unwrap();
        let mut jump = Jump {
            to: vec![-1.0],
            ratio: 0.0,
        };
        let (_, log_ratio) = jump.propose(&mut model).unwrap();
        assert_eq!(log_ratio, f64::NEG_INFINITY);
        assert_eq!(model.params(), &[1.0]);
    }

    #[test]
    fn non_finite_current_state_is_a_numerical_error() {
        let mut model = CachedModel::new(HalfNormal, &[-1.0]).unwrap();
        let mut jump = Jump {
            to: vec![1.0],
            ratio: 0.0,
        };
        assert!(matches!(
            jump.propose(&mut model),
            Err(McmcError::Numerical(_))
        ));
    }

    #[test]
    fn failing_transition_still_restores_the_model() {
        let mut model = CachedModel::new(Gaussian::standard(2), &[0.5, 0.5]).unwrap();
        let before = model.get_state();
        let mut jump = Jump {
            to: vec![1.0, 2.0, 3.0],
            ratio: 0.0,
        };
        assert!(matches!(
            jump.propose(&mut model),
            Err(McmcError::InvalidState(_))
        ));
        assert_eq!(model.get_state(), before);
    }

    #[test]
    fn nan_kernel_ratio_is_reported() {
        let mut model = CachedModel::new(Gaussian::standard(1), &[0.0]).unwrap();
        let mut jump = Jump {
            to: vec![0.5],
            ratio: f64::NAN,
        };
        assert!(matches!(
            jump.propose(&mut model),
            Err(McmcError::Numerical(_))
        ));
        assert_eq!(model.params(), &[0.0]);
    }

    #[test]
    fn proposal_state_is_tagged_json() {
        let state = ProposalState {
            name: "Random Walk".into(),
            kernel: KernelState::RandomWalk {
                scale: 0.5,
                cov: None,
            },
            tuner: None,
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"kind\":\"random_walk\""));
        let back: ProposalState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
