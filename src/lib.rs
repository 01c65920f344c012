/*!
# tunable-mcmc

A generic Metropolis–Hastings engine. Any model that exposes a parameter
vector, a log-likelihood and a log-prior can be sampled with pluggable
proposals (symmetric random walk, gradient-informed MALA), each of which can
tune its step size towards a target acceptance band.

```rust
use tunable_mcmc::distributions::Gaussian;
use tunable_mcmc::metropolis_hastings::{MetropolisHastings, SampleConfig};
use tunable_mcmc::model::CachedModel;
use tunable_mcmc::proposal::MalaProposal;
use tunable_mcmc::tuning::{Tuned, TunerSettings};

let model = CachedModel::new(Gaussian::standard(3), &[1.0, 1.0, 1.0]).unwrap();
let proposal = Tuned::new(MalaProposal::mala(1.0).unwrap(), TunerSettings::new("dt")).unwrap();
let mut mh = MetropolisHastings::new(model, proposal).unwrap().set_seed(7);

let config = SampleConfig::new(2_000).with_burn(500).with_tuning(Some(0), Some(1_000), 100);
let summary = mh.sample(&config).unwrap();
assert_eq!(summary.recorded, 1_499);
```
*/

pub mod core;
pub mod distributions;
pub mod error;
pub mod io;
pub mod metropolis_hastings;
pub mod model;
pub mod proposal;
pub mod stats;
pub mod store;
pub mod tuning;

pub use error::{McmcError, Result};
