//! Worker pool autoscaler
//!
//! Each tick measures every configured pool (usable workers and matching
//! queue depth), computes a target size and publishes it in the
//! [`PoolRegistry`]. Creating or removing workers to reach the target is left
//! to whatever reconciles the registry against the fleet.

mod config;
mod error;
mod evaluator;
mod inventory;
mod registry;
mod scaler;

pub use config::{AutoscalerConfig, ScalingConfig};
pub use error::AutoscaleError;
pub use evaluator::Autoscaler;
pub use inventory::{
    ChannelInventory, PoolInventory, QueueDepth, ReadinessPredicate, WorkerInfo, is_not_draining, is_scheduled,
};
pub use registry::{PoolRegistry, PoolState};
pub use scaler::{ScaleDecision, ScaleDirection, compute_target};
