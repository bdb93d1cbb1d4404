//! Precision-tier: partitions flavours into three precision bands and
//! spreads the ledger allowance across them.

use std::collections::BTreeMap;

use super::{SchedulerPolicy, enabled_sorted, normalise, weighted_avg_precision};
use crate::error::PolicyError;
use crate::ledger::CreditLedger;
use crate::models::{Diagnostics, FlavourProfile, ForecastSnapshot, PolicyResult};

pub struct PrecisionTierPolicy;

impl SchedulerPolicy for PrecisionTierPolicy {
    fn name(&self) -> &'static str {
        "precision-tier"
    }

    fn evaluate(
        &mut self,
        ledger: &CreditLedger,
        flavours: &[FlavourProfile],
        _forecast: Option<&ForecastSnapshot>,
    ) -> Result<PolicyResult, PolicyError> {
        let sorted = enabled_sorted(flavours)?;

        let tier_1: Vec<&FlavourProfile> = sorted.iter().filter(|f| f.precision >= 0.95).collect();
        let tier_2: Vec<&FlavourProfile> = sorted
            .iter()
            .filter(|f| f.precision >= 0.8 && f.precision < 0.95)
            .collect();
        let tier_3: Vec<&FlavourProfile> = sorted.iter().filter(|f| f.precision < 0.8).collect();

        let allowance = if ledger.credit_max() > 0.0 {
            (ledger.balance() / ledger.credit_max()).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let primary_share = (1.0 - allowance).max(0.3);
        let secondary_share = (allowance * 0.6).min(0.5);
        let tertiary_share = (allowance - secondary_share).max(0.0);

        let mut weights: BTreeMap<String, f64> = BTreeMap::new();
        for (tier, share) in [
            (&tier_1, primary_share),
            (&tier_2, secondary_share),
            (&tier_3, tertiary_share),
        ] {
            let slice = share / tier.len().max(1) as f64;
            for flavour in tier.iter() {
                weights.insert(flavour.name.clone(), slice);
            }
        }

        if weights.is_empty() {
            // unreachable with the bands above, but keep the guarantee
            weights.insert(sorted[0].name.clone(), 1.0);
        }

        normalise(&mut weights);
        let avg_precision = weighted_avg_precision(&sorted, &weights);

        let mut diagnostics = Diagnostics::default();
        diagnostics.insert("allowance", allowance);
        diagnostics.insert("tier_1_share", primary_share);
        diagnostics.insert("tier_2_share", secondary_share);
        diagnostics.insert("tier_3_share", tertiary_share);

        Ok(PolicyResult {
            weights,
            avg_precision,
            diagnostics,
        })
    }
}
