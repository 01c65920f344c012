//! Long-chain checks that the sampler reaches the right stationary distribution.

use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2};
use tunable_mcmc::distributions::{ConjugateNormal, Gaussian, Gaussian2D};
use tunable_mcmc::metropolis_hastings::{MetropolisHastings, SampleConfig};
use tunable_mcmc::model::CachedModel;
use tunable_mcmc::proposal::{MalaProposal, Proposal, RandomWalkProposal};
use tunable_mcmc::tuning::{Tuned, TunerSettings};

#[test]
fn random_walk_matches_1d_gaussian_moments() {
    const SEED: u64 = 42;
    let target = Gaussian::new(vec![2.0], vec![1.5]);
    let model = CachedModel::new(target, &[0.0]).unwrap();
    let mut mh = MetropolisHastings::new(model, RandomWalkProposal::random_walk(3.5).unwrap())
        .unwrap()
        .set_seed(SEED);

    let summary = mh
        .sample(&SampleConfig::new(60_000).with_burn(2_000))
        .unwrap();
    assert_eq!(summary.recorded, 57_999);
    assert!(summary.accepted >= 10_000);

    let mean = summary.mean.unwrap()[0];
    let variance = summary.variance.unwrap()[0];
    assert_abs_diff_eq!(mean, 2.0, epsilon = 0.1);
    assert_abs_diff_eq!(variance, 2.25, epsilon = 0.05 * 2.25);
}

#[test]
fn tuned_mala_matches_2d_gaussian_marginals() {
    const SEED: u64 = 7;
    let target = Gaussian2D {
        mean: arr1(&[0.0, 1.0]),
        cov: arr2(&[[4.0, 2.0], [2.0, 3.0]]),
    };
    let model = CachedModel::new(target.clone(), &[0.0, 0.0]).unwrap();
    let proposal = Tuned::new(
        MalaProposal::mala(0.5).unwrap(),
        TunerSettings::new("dt").with_band(0.4, 0.8),
    )
    .unwrap();
    let mut mh = MetropolisHastings::new(model, proposal)
        .unwrap()
        .set_seed(SEED);

    let config = SampleConfig::new(40_000)
        .with_burn(5_000)
        .with_tuning(Some(0), Some(5_000), 1_000);
    let summary = mh.sample(&config).unwrap();

    let dt = mh.proposal.scalar("dt").unwrap();
    assert!(dt > 0.5, "tuning should grow a small step, got dt = {dt}");

    let mean = summary.mean.unwrap();
    let variance = summary.variance.unwrap();
    assert_abs_diff_eq!(mean, target.mean, epsilon = 0.3);
    assert_abs_diff_eq!(variance, arr1(&[4.0, 3.0]), epsilon = 0.5);
}

#[test]
fn conjugate_posterior_with_likelihood_and_prior() {
    let target = ConjugateNormal {
        data: vec![0.8, 1.3, 2.1, 1.7, 0.9, 1.2],
        noise_std: 0.5,
        prior_mean: 0.0,
        prior_std: 2.0,
    };
    let (post_mean, post_std) = target.posterior();
    let model = CachedModel::new(target, &[-3.0]).unwrap();
    let proposal = Tuned::new(
        RandomWalkProposal::random_walk(5.0).unwrap(),
        TunerSettings::new("scale"),
    )
    .unwrap();
    let mut mh = MetropolisHastings::new(model, proposal).unwrap().set_seed(3);

    let config = SampleConfig::new(50_000)
        .with_burn(5_000)
        .with_thin(2)
        .with_tuning(Some(0), Some(5_000), 500);
    let summary = mh.sample(&config).unwrap();

    let rate = summary.acceptance_rate.unwrap();
    assert!(rate > 0.1 && rate < 0.9, "acceptance rate {rate}");
    assert_abs_diff_eq!(summary.mean.unwrap()[0], post_mean, epsilon = 0.05);
    assert_abs_diff_eq!(
        summary.variance.unwrap()[0].sqrt(),
        post_std,
        epsilon = 0.1 * post_std
    );
}

#[test]
fn default_proposal_samples_a_gradient_model() {
    let model = CachedModel::new(Gaussian::standard(2), &[3.0, -3.0]).unwrap();
    let mut mh = MetropolisHastings::with_default_proposal(model).set_seed(11);
    let config = SampleConfig::new(20_000)
        .with_burn(2_000)
        .with_tuning(Some(0), Some(2_000), 200);
    let summary = mh.sample(&config).unwrap();
    assert_eq!(mh.proposal.name(), "MALA");
    assert_abs_diff_eq!(summary.mean.unwrap(), arr1(&[0.0, 0.0]), epsilon = 0.15);
}
