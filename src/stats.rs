//! Running statistics kept by the sampling driver.

use ndarray::prelude::*;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{McmcError, Result};

/// Proposed and accepted move counts since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceStats {
    pub proposed: u64,
    pub accepted: u64,
}

impl AcceptanceStats {
    pub fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        self.accepted += accepted as u64;
    }

    /// `accepted / proposed`, or `None` before the first proposal.
    pub fn rate(&self) -> Option<f64> {
        (self.proposed > 0).then(|| self.accepted as f64 / self.proposed as f64)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Running per-parameter mean and second moment of the states fed to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTracker {
    n_params: usize,
    n: u64,
    mean: Array1<f64>,    // n_params
    mean_sq: Array1<f64>, // n_params
}

impl ChainTracker {
    pub fn new(n_params: usize) -> Self {
        Self {
            n_params,
            n: 0,
            mean: Array1::zeros(n_params),
            mean_sq: Array1::zeros(n_params),
        }
    }

    pub fn step<T>(&mut self, x: &[T]) -> Result<()>
    where
        T: Copy + ToPrimitive,
    {
        if x.len() != self.n_params {
            return Err(McmcError::invalid_state(format!(
                "tracker expects {} parameters, got {}",
                self.n_params,
                x.len()
            )));
        }
        let x_arr = x
            .iter()
            .map(|v| {
                v.to_f64()
                    .ok_or_else(|| McmcError::numerical("value not representable as f64"))
            })
            .collect::<Result<Array1<f64>>>()?;

        self.n += 1;
        let n = self.n as f64;
        self.mean = (&self.mean * (n - 1.0) + &x_arr) / n;
        self.mean_sq = (&self.mean_sq * (n - 1.0) + x_arr.mapv(|v| v * v)) / n;
        Ok(())
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> Array1<f64> {
        self.mean.clone()
    }

    /// Unbiased sample variance; `None` with fewer than two observations.
    pub fn variance(&self) -> Option<Array1<f64>> {
        if self.n < 2 {
            return None;
        }
        let n = self.n as f64;
        Some((&self.mean_sq - &self.mean.mapv(|m| m * m)) * n / (n - 1.0))
    }
}
