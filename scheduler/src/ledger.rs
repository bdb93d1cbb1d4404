//! Credit ledger: bounded signed accumulator of target-vs-realised error.
//!
//! Positive balance means quality surplus (we have been running more
//! accurate than target and may spend down); negative means quality debt.
//! The ledger is advanced exactly once per decision tick, never per request,
//! and is owned exclusively by its session worker.

use std::collections::VecDeque;

#[derive(Clone, Debug)]
pub struct CreditLedger {
    target_error: f64,
    credit_min: f64,
    credit_max: f64,
    window_size: usize,
    balance: f64,
    history: VecDeque<f64>,
}

impl CreditLedger {
    pub fn new(target_error: f64, credit_min: f64, credit_max: f64, window_size: usize) -> Self {
        Self {
            target_error,
            credit_min,
            credit_max,
            window_size: window_size.max(1),
            balance: 0.0,
            history: VecDeque::new(),
        }
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn target_error(&self) -> f64 {
        self.target_error
    }

    pub fn credit_min(&self) -> f64 {
        self.credit_min
    }

    pub fn credit_max(&self) -> f64 {
        self.credit_max
    }

    /// Records the realised precision of one completed window and returns
    /// the new balance, clamped to `[credit_min, credit_max]`.
    pub fn update(&mut self, realised_precision: f64) -> f64 {
        let realised_error = (1.0 - realised_precision).max(0.0);
        let delta = self.target_error - realised_error;

        if self.history.len() == self.window_size {
            self.history.pop_front();
        }
        self.history.push_back(delta);

        self.balance = (self.balance + delta).clamp(self.credit_min, self.credit_max);
        self.balance
    }

    /// Mean credit delta over the sliding window; zero when empty.
    pub fn velocity(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f64>() / self.history.len() as f64
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.balance = 0.0;
    }
}
