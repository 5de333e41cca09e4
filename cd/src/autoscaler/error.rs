//! Autoscaler errors

use thiserror::Error;

use crate::domain::StoreError;

/// Failures that skip a pool's evaluation for the current tick
#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("Queue depth query failed: {0}")]
    Store(#[from] StoreError),

    #[error("Pool inventory failed: {0}")]
    Inventory(String),

    #[error("Unknown pool: {0}")]
    UnknownPool(String),
}
