//! Decision core for the carbon-aware traffic scheduler.
//!
//! The library turns `(credit ledger state, carbon/demand forecast, known
//! flavours)` into a published `ScheduleDecision`:
//!
//! - [`ledger`]: bounded signed accumulator of target-vs-realised error.
//! - [`policy`]: the interchangeable weight-producing strategies.
//! - [`forecast`]: carbon intensity provider and demand estimator.
//! - [`scaling`]: throttle and replica-ceiling derivation.
//! - [`decision`]: assembly of the published schedule document.
//! - [`engine`]: one-tick orchestration plus Prometheus bookkeeping.

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod registry;
pub mod scaling;

pub use config::SchedulerConfig;
pub use decision::ScheduleDecision;
pub use engine::SchedulerEngine;
pub use error::{EngineError, PolicyError};
pub use ledger::CreditLedger;
pub use models::{FlavourProfile, ForecastPoint, ForecastSnapshot, PolicyResult};
pub use scaling::{ComponentBounds, ReplicaBounds, ScalingDirective};
