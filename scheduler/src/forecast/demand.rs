use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DemandEstimate {
    pub current: f64,
    pub next: f64,
}

/// Exponentially smoothed request-rate predictor.
///
/// There is no separate next-horizon model yet; `forecast` mirrors the
/// current rate into both slots so callers can refine the horizon without
/// changing the interface.
pub struct DemandEstimator {
    smoothing: f64,
    rate: Mutex<Option<f64>>,
}

impl Default for DemandEstimator {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl DemandEstimator {
    pub fn new(smoothing: f64) -> Self {
        Self {
            smoothing,
            rate: Mutex::new(None),
        }
    }

    /// Folds a `request_count` observed over `window_seconds` into the
    /// smoothed rate. Non-positive windows are ignored.
    pub fn update(&self, request_count: u64, window_seconds: f64) {
        if window_seconds <= 0.0 {
            return;
        }
        let observed = request_count as f64 / window_seconds;
        let mut rate = self.rate.lock();
        *rate = Some(match *rate {
            Some(prev) => self.smoothing * observed + (1.0 - self.smoothing) * prev,
            None => observed,
        });
    }

    pub fn forecast(&self) -> DemandEstimate {
        let current = self.rate.lock().unwrap_or(0.0);
        DemandEstimate {
            current,
            next: current,
        }
    }
}
