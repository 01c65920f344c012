//! The stepping contract shared by every chain, plus helpers to run one.

use indicatif::ProgressBar;
use ndarray::Array2;

use crate::error::Result;
use crate::model::ModelState;

pub trait MarkovChain {
    /// Does one iteration of the chain, returning whether the candidate was accepted.
    fn step(&mut self) -> Result<bool>;

    /// The current state without stepping.
    fn current_state(&self) -> ModelState;
}

/// Runs `n_steps` iterations and returns the visited parameters, one row per step.
pub fn run_chain<M>(chain: &mut M, n_steps: usize) -> Result<Array2<f64>>
where
    M: MarkovChain + ?Sized,
{
    run_chain_with_progress(chain, n_steps, &ProgressBar::hidden())
}

/// Like [`run_chain`], advancing `pb` once per step.
pub fn run_chain_with_progress<M>(
    chain: &mut M,
    n_steps: usize,
    pb: &ProgressBar,
) -> Result<Array2<f64>>
where
    M: MarkovChain + ?Sized,
{
    let dim = chain.current_state().params.len();
    let mut out = Array2::<f64>::zeros((n_steps, dim));

    pb.set_length(n_steps as u64);

    for mut row in out.rows_mut() {
        chain.step()?;
        let state = chain.current_state();
        row.iter_mut()
            .zip(&state.params)
            .for_each(|(dst, src)| *dst = *src);
        pb.inc(1);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::McmcError;

    /// Deterministic chain counting upwards; fails after `limit` steps.
    struct Counter {
        x: f64,
        limit: usize,
        taken: usize,
    }

    impl MarkovChain for Counter {
        fn step(&mut self) -> Result<bool> {
            if self.taken == self.limit {
                return Err(McmcError::numerical("limit reached"));
            }
            self.taken += 1;
            self.x += 1.0;
            Ok(true)
        }

        fn current_state(&self) -> ModelState {
            ModelState {
                params: vec![self.x, -self.x],
                log_likelihood: 0.0,
                log_prior: 0.0,
                grad_log_likelihood: None,
                grad_log_prior: None,
            }
        }
    }

    #[test]
    fn rows_follow_the_chain() {
        let mut chain = Counter {
            x: 0.0,
            limit: 10,
            taken: 0,
        };
        let out = run_chain(&mut chain, 3).unwrap();
        assert_eq!(out.shape(), &[3, 2]);
        assert_eq!(out.column(0).to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(out.column(1).to_vec(), vec![-1.0, -2.0, -3.0]);
    }

    #[test]
    fn step_errors_propagate() {
        let mut chain = Counter {
            x: 0.0,
            limit: 2,
            taken: 0,
        };
        assert!(matches!(
            run_chain(&mut chain, 5),
            Err(McmcError::Numerical(_))
        ));
        assert_eq!(chain.taken, 2);
    }
}
