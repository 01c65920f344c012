/*!
# Metropolis–Hastings Sampler

This module implements the sampling driver: it owns one [`Model`] and one
[`Proposal`], runs the accept/reject loop, keeps acceptance statistics, tunes
the proposal on schedule and forwards recorded states to an optional
[`ChainStore`].

## Overview

- **Model (`M`)**: holds the current parameters and their cached log-likelihood
  and log-prior, see [`Model`].
- **Proposal (`P`)**: turns the current state into a candidate plus the log
  acceptance ratio, see [`Proposal`]. Tuning is composed in with
  [`Tuned`](crate::tuning::Tuned).
- **Store (`S`)**: receives one proposal record and a fresh chain per
  [`MetropolisHastings::sample`] call and one record per kept step.
- **Reproducibility**: [`MetropolisHastings::set_seed`] seeds the acceptance
  draws with `seed` and the proposal with `seed + 1`. The two streams are
  independent, so the number of draws a kernel makes never shifts the
  accept/reject sequence.

## Example Usage

```rust
use tunable_mcmc::distributions::Gaussian;
use tunable_mcmc::metropolis_hastings::{MetropolisHastings, SampleConfig};
use tunable_mcmc::model::CachedModel;
use tunable_mcmc::proposal::RandomWalkProposal;

let model = CachedModel::new(Gaussian::standard(2), &[0.0, 0.0]).unwrap();
let mut mh = MetropolisHastings::new(model, RandomWalkProposal::random_walk(1.0).unwrap())
    .unwrap()
    .set_seed(42);

// Steps 101..=999 (0-based) are kept.
let summary = mh.sample(&SampleConfig::new(1_000).with_burn(100)).unwrap();
assert_eq!(summary.proposed, 1_000);
assert_eq!(summary.recorded, 899);
```
*/

use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use ndarray::Array1;
use rand::distributions::Open01;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::MarkovChain;
use crate::error::{McmcError, Result};
use crate::model::{Model, ModelState};
use crate::proposal::{MalaProposal, Proposal, ProposalState, RandomWalkProposal};
use crate::stats::{AcceptanceStats, ChainTracker};
use crate::store::{ChainStore, MemoryStore};

/**
Settings of one [`MetropolisHastings::sample`] call.

Only `num_samples` is required when parsing from JSON; every other field
falls back to its default:

```rust
use tunable_mcmc::metropolis_hastings::SampleConfig;

let config = SampleConfig::from_json(r#"{"num_samples": 500, "num_thin": 5}"#).unwrap();
assert_eq!(config, SampleConfig::new(500).with_thin(5));
assert_eq!(config.tuning_frequency, 1000);

// `null` means "never" for both ends of the tuning window.
let config = SampleConfig::from_json(r#"{"num_samples": 500, "start_tuning_after": null}"#).unwrap();
assert_eq!(config.start_tuning_after, None);
```
*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleConfig {
    pub num_samples: usize,
    /// Keep every `num_thin`-th step.
    #[serde(default = "default_thin")]
    pub num_thin: usize,
    /// Steps `0..=num_burn` are never recorded.
    #[serde(default)]
    pub num_burn: usize,
    /// First step at which tuning may happen; `None` disables tuning.
    #[serde(default = "default_start_tuning")]
    pub start_tuning_after: Option<usize>,
    /// Last step at which tuning may happen; `None` never stops.
    #[serde(default)]
    pub stop_tuning_after: Option<usize>,
    #[serde(default = "default_tuning_frequency")]
    pub tuning_frequency: usize,
    /// Shows a progress bar. Has no effect on the chain.
    #[serde(default)]
    pub verbose: bool,
}

fn default_thin() -> usize {
    1
}

fn default_start_tuning() -> Option<usize> {
    Some(0)
}

fn default_tuning_frequency() -> usize {
    1000
}

impl SampleConfig {
    pub fn new(num_samples: usize) -> Self {
        Self {
            num_samples,
            num_thin: default_thin(),
            num_burn: 0,
            start_tuning_after: default_start_tuning(),
            stop_tuning_after: None,
            tuning_frequency: default_tuning_frequency(),
            verbose: false,
        }
    }

    pub fn with_thin(mut self, num_thin: usize) -> Self {
        self.num_thin = num_thin;
        self
    }

    pub fn with_burn(mut self, num_burn: usize) -> Self {
        self.num_burn = num_burn;
        self
    }

    /// Tuning window `[start, stop]` and frequency. `None` means "never".
    pub fn with_tuning(
        mut self,
        start_tuning_after: Option<usize>,
        stop_tuning_after: Option<usize>,
        tuning_frequency: usize,
    ) -> Self {
        self.start_tuning_after = start_tuning_after;
        self.stop_tuning_after = stop_tuning_after;
        self.tuning_frequency = tuning_frequency;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| McmcError::config(format!("invalid sample config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_samples == 0 {
            return Err(McmcError::config("num_samples must be positive"));
        }
        if self.num_thin == 0 {
            return Err(McmcError::config("num_thin must be at least 1"));
        }
        if self.num_burn >= self.num_samples {
            return Err(McmcError::config(format!(
                "num_burn ({}) must be smaller than num_samples ({})",
                self.num_burn, self.num_samples
            )));
        }
        if self.tuning_frequency == 0 {
            return Err(McmcError::config("tuning_frequency must be at least 1"));
        }
        if let (Some(start), Some(stop)) = (self.start_tuning_after, self.stop_tuning_after) {
            if start > stop {
                return Err(McmcError::config(format!(
                    "tuning window is empty: starts after {start}, stops after {stop}"
                )));
            }
        }
        Ok(())
    }

    /// Whether the 0-based step `i` is written to the chain.
    pub fn records(&self, i: usize) -> bool {
        i > self.num_burn && i % self.num_thin == 0
    }

    /// Whether a tunable proposal is tuned after the 0-based step `i`.
    pub fn tunes_at(&self, i: usize) -> bool {
        i > 0
            && self.start_tuning_after.is_some_and(|start| i >= start)
            && self.stop_tuning_after.map_or(true, |stop| i <= stop)
            && i % self.tuning_frequency == 0
    }
}

/// Outcome of one [`MetropolisHastings::sample`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSummary {
    pub proposed: u64,
    pub accepted: u64,
    pub acceptance_rate: Option<f64>,
    /// Number of kept (post-burn-in, thinned) steps.
    pub recorded: usize,
    /// Mean of the kept parameter vectors, `None` if nothing was kept.
    pub mean: Option<Array1<f64>>,
    /// Unbiased variance of the kept parameter vectors.
    pub variance: Option<Array1<f64>>,
    /// Index of the chain opened in the attached store.
    pub chain: Option<usize>,
    /// Proposal state at the end of the call, including any tuning. The store
    /// only sees it as the proposal record of the next call.
    pub proposal: ProposalState,
    /// The stop flag ended the call before `num_samples` steps.
    pub interrupted: bool,
}

/**
A single Metropolis–Hastings chain.

The model and proposal are owned exclusively by the driver; the model's
current state is the chain's current state and carries over between
[`MetropolisHastings::sample`] calls, while the acceptance counters are reset
at the start of each call.
*/
pub struct MetropolisHastings<M, P, S = MemoryStore> {
    pub model: M,
    pub proposal: P,
    store: Option<S>,
    /// The seed last passed to [`MetropolisHastings::set_seed`].
    pub seed: u64,
    /// Source of the acceptance uniforms.
    pub rng: SmallRng,
    stats: AcceptanceStats,
    stop: Option<Arc<AtomicBool>>,
}

impl<M: Model, P: Proposal> MetropolisHastings<M, P, MemoryStore> {
    /**
    Constructs a driver around `model` and `proposal`, with no store attached.

    # Errors

    [`McmcError::UnsupportedOperation`] if the proposal needs gradients the
    model does not provide. Checked once here, never during sampling.
    */
    pub fn new(model: M, proposal: P) -> Result<Self> {
        if proposal.requires_gradients() && !model.supports_gradients() {
            return Err(McmcError::UnsupportedOperation(format!(
                "proposal `{}` requires gradients but the model does not provide them",
                proposal.name()
            )));
        }
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            model,
            proposal,
            store: None,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            stats: AcceptanceStats::default(),
            stop: None,
        })
    }
}

impl<M: Model> MetropolisHastings<M, Box<dyn Proposal>, MemoryStore> {
    /**
    Constructs a driver with a freshly built default proposal: MALA when the
    model supports gradients, a unit-scale random walk otherwise.

    ```rust
    use tunable_mcmc::distributions::Gaussian;
    use tunable_mcmc::metropolis_hastings::MetropolisHastings;
    use tunable_mcmc::model::CachedModel;
    use tunable_mcmc::proposal::Proposal;

    let model = CachedModel::new(Gaussian::standard(1), &[0.0]).unwrap();
    let mh = MetropolisHastings::with_default_proposal(model);
    assert_eq!(mh.proposal.name(), "MALA");
    ```
    */
    pub fn with_default_proposal(model: M) -> Self {
        let proposal: Box<dyn Proposal> = if model.supports_gradients() {
            Box::new(MalaProposal::default())
        } else {
            Box::new(RandomWalkProposal::default())
        };
        let seed = thread_rng().gen::<u64>();
        Self {
            model,
            proposal,
            store: None,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            stats: AcceptanceStats::default(),
            stop: None,
        }
    }
}

impl<M: Model, P: Proposal, S: ChainStore> MetropolisHastings<M, P, S> {
    /// Attaches a chain store, replacing any previous one.
    pub fn with_store<S2: ChainStore>(self, store: S2) -> MetropolisHastings<M, P, S2> {
        MetropolisHastings {
            model: self.model,
            proposal: self.proposal,
            store: Some(store),
            seed: self.seed,
            rng: self.rng,
            stats: self.stats,
            stop: self.stop,
        }
    }

    /// Seeds the acceptance draws with `seed` and the proposal with `seed + 1`.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self.proposal.reseed(seed.wrapping_add(1));
        self
    }

    /// Flag checked between steps; setting it ends the running `sample` call.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn store(&self) -> Option<&S> {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> Option<&mut S> {
        self.store.as_mut()
    }

    pub fn stats(&self) -> AcceptanceStats {
        self.stats
    }

    /// Acceptance rate of the current (or last) `sample` call.
    pub fn acceptance_rate(&self) -> Option<f64> {
        self.stats.rate()
    }

    /**
    Overwrites the model and/or proposal state, validating both.

    Either both succeed or neither takes effect.
    */
    pub fn restore(
        &mut self,
        model_state: Option<&ModelState>,
        proposal_state: Option<&ProposalState>,
    ) -> Result<()> {
        let previous = self.model.get_state();
        if let Some(state) = model_state {
            self.model.set_state(state)?;
        }
        if let Some(state) = proposal_state {
            if let Err(e) = self.proposal.set_state(state) {
                self.model.set_state(&previous)?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Restores model and proposal from record `index` of `chain` in the attached store.
    pub fn resume(&mut self, chain: usize, index: usize) -> Result<()> {
        let (model_state, proposal_state) = self.attached_store()?.get_state(chain, index)?;
        self.restore(Some(&model_state), Some(&proposal_state))
    }

    /// Restores model and proposal from the last record of `chain`.
    pub fn resume_latest(&mut self, chain: usize) -> Result<()> {
        let (model_state, proposal_state) = self.attached_store()?.latest_state(chain)?;
        self.restore(Some(&model_state), Some(&proposal_state))
    }

    fn attached_store(&self) -> Result<&S> {
        self.store
            .as_ref()
            .ok_or_else(|| McmcError::Persistence("no chain store is attached".into()))
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// [`MetropolisHastings::sample`] after applying explicit initial states.
    pub fn sample_from(
        &mut self,
        config: &SampleConfig,
        model_state: Option<&ModelState>,
        proposal_state: Option<&ProposalState>,
    ) -> Result<SampleSummary> {
        config.validate()?;
        self.restore(model_state, proposal_state)?;
        self.sample(config)
    }

    /**
    Runs `config.num_samples` Metropolis–Hastings steps.

    Step `i` (0-based) is recorded when `i > num_burn` and `i % num_thin == 0`,
    under the 1-based label `i + 1`. A tunable proposal is tuned with the
    running acceptance rate after every step [`SampleConfig::tunes_at`] selects.

    # Errors

    - [`McmcError::Configuration`] for an invalid `config`, before any step.
    - Any error raised by the model or proposal aborts the call; the model is
      left at the last committed state.
    - A failed store write is logged and returned. The step it belonged to
      has already been committed, so the chain can be resumed.
    */
    pub fn sample(&mut self, config: &SampleConfig) -> Result<SampleSummary> {
        config.validate()?;
        self.stats.reset();

        let chain = match self.store.as_mut() {
            Some(store) => {
                let proposal_state = self.proposal.state();
                let opened = store
                    .add_proposal_record(&proposal_state)
                    .and_then(|_| store.start_new_chain());
                match opened {
                    Ok(chain) => Some(chain),
                    Err(e) => {
                        warn!("could not open a new chain in the store: {e}");
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        info!(
            "sampling {} steps with `{}` (burn-in {}, thinning {})",
            config.num_samples,
            self.proposal.name(),
            config.num_burn,
            config.num_thin
        );

        let pb = if config.verbose {
            let pb = ProgressBar::new(config.num_samples as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            pb.set_prefix("MH");
            pb
        } else {
            ProgressBar::hidden()
        };
        let message_every = (config.num_samples / 100).max(1);

        let mut tracker = ChainTracker::new(self.model.num_params());
        let mut interrupted = false;

        for i in 0..config.num_samples {
            if self.stop_requested() {
                interrupted = true;
                break;
            }

            let accepted = self.step()?;

            if config.records(i) {
                let state = self.model.get_state();
                tracker.step(&state.params)?;
                if let Some(store) = self.store.as_mut() {
                    if let Err(e) = store.add_chain_record(i + 1, accepted, &state) {
                        warn!("failed to record step {}: {e}", i + 1);
                        pb.abandon();
                        return Err(e);
                    }
                }
            }

            if self.proposal.is_tunable() && config.tunes_at(i) {
                if let Some(rate) = self.stats.rate() {
                    self.proposal.tune(rate)?;
                }
            }

            pb.inc(1);
            if i % message_every == 0 {
                pb.set_message(format!(
                    "p(accept)≈{:.2} log p≈{:.2}",
                    self.stats.rate().unwrap_or(0.0),
                    self.model.log_p()
                ));
            }
        }
        pb.finish();

        let rate = self.stats.rate();
        info!(
            "finished {} steps, acceptance rate {:.3}{}",
            self.stats.proposed,
            rate.unwrap_or(0.0),
            if interrupted { " (interrupted)" } else { "" }
        );

        Ok(SampleSummary {
            proposed: self.stats.proposed,
            accepted: self.stats.accepted,
            acceptance_rate: rate,
            recorded: tracker.n() as usize,
            mean: (tracker.n() > 0).then(|| tracker.mean()),
            variance: tracker.variance(),
            chain,
            proposal: self.proposal.state(),
            interrupted,
        })
    }
}

impl<M: Model, P: Proposal, S: ChainStore> MarkovChain for MetropolisHastings<M, P, S> {
    /**
    Performs one Metropolis–Hastings update.

    The proposal evaluates a candidate and the log acceptance ratio, leaving
    the model untouched. A uniform `u` is then drawn from the driver's own
    stream and the candidate is committed iff `ln(u) <= log_ratio`.
    */
    fn step(&mut self) -> Result<bool> {
        let (candidate, log_ratio) = self.proposal.propose(&mut self.model)?;
        let u: f64 = self.rng.sample(Open01);
        let accepted = u.ln() <= log_ratio;
        if accepted {
            self.model.set_state(&candidate)?;
        }
        self.stats.record(accepted);
        Ok(accepted)
    }

    fn current_state(&self) -> ModelState {
        self.model.get_state()
    }
}
