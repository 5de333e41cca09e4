//! Error sink for requirement failures found while scanning

use tracing::warn;

use super::matcher::RequirementError;
use crate::domain::ProcessKey;

/// Receives one report per unusable entry per scan
pub trait ErrorSink: Send + Sync {
    fn report(&self, key: &ProcessKey, error: &RequirementError);
}

/// Default sink: log and move on
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorSink;

impl ErrorSink for LoggingErrorSink {
    fn report(&self, key: &ProcessKey, error: &RequirementError) {
        warn!(process = %key, error = %error, "Skipping entry with unusable requirements");
    }
}
