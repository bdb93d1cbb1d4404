//! External data providers feeding the decision loop.

mod carbon;
mod demand;

use std::sync::Arc;

use async_trait::async_trait;

pub use carbon::{CarbonForecastProvider, CarbonTarget};
pub use demand::{DemandEstimate, DemandEstimator};

use crate::models::ForecastSnapshot;

/// Source of carbon-intensity snapshots. The seam exists so sessions can be
/// driven by a stub in tests; production wires in [`CarbonForecastProvider`].
#[async_trait]
pub trait ForecastSource: Send + Sync {
    async fn fetch(&self) -> ForecastSnapshot;
}

/// Combines the carbon provider and the demand estimator into the single
/// snapshot a policy sees at a decision tick.
pub struct ForecastManager {
    carbon: Arc<dyn ForecastSource>,
    demand: Arc<DemandEstimator>,
}

impl ForecastManager {
    pub fn new(carbon: Arc<dyn ForecastSource>, demand: Arc<DemandEstimator>) -> Self {
        Self { carbon, demand }
    }

    pub fn demand(&self) -> &Arc<DemandEstimator> {
        &self.demand
    }

    pub async fn snapshot(&self) -> ForecastSnapshot {
        let mut snapshot = self.carbon.fetch().await;
        let estimate = self.demand.forecast();
        snapshot.demand_now = Some(estimate.current);
        snapshot.demand_next = Some(estimate.next);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticSource(ForecastSnapshot);

    #[async_trait]
    impl ForecastSource for StaticSource {
        async fn fetch(&self) -> ForecastSnapshot {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn snapshot_merges_carbon_and_demand() {
        let carbon = ForecastSnapshot {
            intensity_now: Some(180.0),
            intensity_next: Some(120.0),
            ..ForecastSnapshot::default()
        };
        let demand = Arc::new(DemandEstimator::default());
        demand.update(120, 60.0);

        let manager = ForecastManager::new(Arc::new(StaticSource(carbon)), demand);
        let snapshot = manager.snapshot().await;

        assert_eq!(snapshot.intensity_now, Some(180.0));
        assert_eq!(snapshot.demand_now, Some(2.0));
        assert_eq!(snapshot.demand_next, Some(2.0));
    }
}
