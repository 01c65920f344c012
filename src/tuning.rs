/*!
Acceptance-rate driven tuning of a single scalar proposal parameter.

A [`Tuned`] proposal wraps any [`Proposal`] and multiplies one of its named
scalars (e.g. the random-walk `scale` or the MALA `dt`) whenever the observed
acceptance rate leaves the band `[lowest_acceptance, highest_acceptance]`:
too few acceptances shrink the step, too many grow it.

# Examples

```rust
use tunable_mcmc::proposal::{MalaProposal, Proposal};
use tunable_mcmc::tuning::{Tuned, TunerSettings};

let mut proposal = Tuned::new(MalaProposal::mala(1.0).unwrap(), TunerSettings::new("dt")).unwrap();
proposal.tune(0.05).unwrap();
assert!((proposal.scalar("dt").unwrap() - 0.7).abs() < 1e-12);

// Settings naming a parameter the proposal does not have fail up front.
assert!(Tuned::new(MalaProposal::mala(1.0).unwrap(), TunerSettings::new("scale")).is_err());
```
*/

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{McmcError, Result};
use crate::model::{Model, ModelState};
use crate::proposal::{Proposal, ProposalState};

/// Tuning band and multiplicative factors. Persisted with the proposal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunerSettings {
    /// Name of the scalar on the host proposal that is adapted.
    pub param_name: String,
    #[serde(default = "default_lowest")]
    pub lowest_acceptance: f64,
    #[serde(default = "default_highest")]
    pub highest_acceptance: f64,
    /// Applied when the acceptance rate is above the band; `> 1`.
    #[serde(default = "default_increase")]
    pub increase_factor: f64,
    /// Applied when the acceptance rate is below the band; in `(0, 1)`.
    #[serde(default = "default_decrease")]
    pub decrease_factor: f64,
}

/// The persisted form of a [`Tuner`].
pub type TunerState = TunerSettings;

fn default_lowest() -> f64 {
    0.2
}

fn default_highest() -> f64 {
    0.6
}

fn default_increase() -> f64 {
    1.2
}

fn default_decrease() -> f64 {
    0.7
}

impl TunerSettings {
    /// Default band `[0.2, 0.6]` with factors `1.2` / `0.7`.
    pub fn new(param_name: impl Into<String>) -> Self {
        Self {
            param_name: param_name.into(),
            lowest_acceptance: default_lowest(),
            highest_acceptance: default_highest(),
            increase_factor: default_increase(),
            decrease_factor: default_decrease(),
        }
    }

    pub fn with_band(mut self, lowest: f64, highest: f64) -> Self {
        self.lowest_acceptance = lowest;
        self.highest_acceptance = highest;
        self
    }

    pub fn with_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.increase_factor = increase;
        self.decrease_factor = decrease;
        self
    }

    /// Checks `0 <= lowest < highest <= 1`, `increase > 1` and `0 < decrease < 1`.
    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = (self.lowest_acceptance, self.highest_acceptance);
        if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo >= hi {
            return Err(McmcError::config(format!(
                "acceptance band must satisfy 0 <= lowest < highest <= 1, got [{lo}, {hi}]"
            )));
        }
        if !(self.increase_factor > 1.0 && self.increase_factor.is_finite()) {
            return Err(McmcError::config(format!(
                "increase factor must be > 1, got {}",
                self.increase_factor
            )));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor < 1.0) {
            return Err(McmcError::config(format!(
                "decrease factor must lie in (0, 1), got {}",
                self.decrease_factor
            )));
        }
        Ok(())
    }
}

/// Validated [`TunerSettings`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tuner {
    settings: TunerSettings,
}

impl Tuner {
    pub fn new(settings: TunerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &TunerSettings {
        &self.settings
    }

    /// Factor to apply for the given acceptance rate, `None` inside the band.
    pub fn multiplier(&self, acceptance_rate: f64) -> Option<f64> {
        if acceptance_rate < self.settings.lowest_acceptance {
            Some(self.settings.decrease_factor)
        } else if acceptance_rate > self.settings.highest_acceptance {
            Some(self.settings.increase_factor)
        } else {
            None
        }
    }

    /// Rescales the tuned parameter of `host`, returning `(old, new)` on change.
    ///
    /// The new value is clamped to `[f64::MIN_POSITIVE, f64::MAX]`; once it
    /// saturates further tuning in the same direction is a no-op.
    pub fn tune<P: Proposal + ?Sized>(
        &self,
        host: &mut P,
        acceptance_rate: f64,
    ) -> Result<Option<(f64, f64)>> {
        let Some(factor) = self.multiplier(acceptance_rate) else {
            return Ok(None);
        };
        let name = &self.settings.param_name;
        let old = host.scalar(name).ok_or_else(|| {
            McmcError::numerical(format!("tuned parameter `{name}` disappeared"))
        })?;
        let new = (old * factor).clamp(f64::MIN_POSITIVE, f64::MAX);
        if new == old {
            debug!("tuning `{name}`: saturated at {old:e}");
            return Ok(None);
        }
        host.set_scalar(name, new).map_err(|e| {
            McmcError::numerical(format!("could not tune `{name}` to {new}: {e}"))
        })?;
        debug!("tuning `{name}`: {old:.6} -> {new:.6} (acceptance rate {acceptance_rate:.3})");
        Ok(Some((old, new)))
    }
}

/// Any proposal plus a [`Tuner`] acting on one of its scalars.
#[derive(Debug, Clone)]
pub struct Tuned<P> {
    inner: P,
    tuner: Tuner,
}

impl<P: Proposal> Tuned<P> {
    /// Fails with [`McmcError::Configuration`] on invalid settings or when
    /// `inner` has no scalar named `settings.param_name`.
    pub fn new(inner: P, settings: TunerSettings) -> Result<Self> {
        let tuner = Tuner::new(settings)?;
        let name = &tuner.settings().param_name;
        if inner.scalar(name).is_none() {
            return Err(McmcError::config(format!(
                "proposal `{}` has no parameter named `{name}`",
                inner.name()
            )));
        }
        Ok(Self { inner, tuner })
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn tuner(&self) -> &Tuner {
        &self.tuner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: Proposal> Proposal for Tuned<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn transition(&mut self, model: &mut dyn Model) -> Result<f64> {
        self.inner.transition(model)
    }

    fn propose(&mut self, model: &mut dyn Model) -> Result<(ModelState, f64)> {
        self.inner.propose(model)
    }

    fn scalar(&self, name: &str) -> Option<f64> {
        self.inner.scalar(name)
    }

    fn set_scalar(&mut self, name: &str, value: f64) -> Result<()> {
        self.inner.set_scalar(name, value)
    }

    fn requires_gradients(&self) -> bool {
        self.inner.requires_gradients()
    }

    fn is_tunable(&self) -> bool {
        true
    }

    fn tune(&mut self, acceptance_rate: f64) -> Result<Option<(f64, f64)>> {
        self.tuner.tune(&mut self.inner, acceptance_rate)
    }

    fn state(&self) -> ProposalState {
        ProposalState {
            tuner: Some(self.tuner.settings().clone()),
            ..self.inner.state()
        }
    }

    fn set_state(&mut self, state: &ProposalState) -> Result<()> {
        let settings = state.tuner.as_ref().ok_or_else(|| {
            McmcError::invalid_state("state of a tuned proposal lacks tuner settings")
        })?;
        let tuner =
            Tuner::new(settings.clone()).map_err(|e| McmcError::invalid_state(e.to_string()))?;
        if self.inner.scalar(&settings.param_name).is_none() {
            return Err(McmcError::invalid_state(format!(
                "tuned parameter `{}` does not exist on `{}`",
                settings.param_name,
                self.inner.name()
            )));
        }
        self.inner.set_state(&ProposalState {
            tuner: None,
            ..state.clone()
        })?;
        self.tuner = tuner;
        Ok(())
    }

    fn reseed(&mut self, seed: u64) {
        self.inner.reseed(seed)
    }
}
