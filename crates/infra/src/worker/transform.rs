//! The pluggable business-rule step of a job.

use std::collections::BTreeMap;

use bytes::Bytes;

use settlekit_core::FileRole;

use crate::partitions::{AggRow, FactRow};
use crate::payload::JobPayload;

/// Raw inputs of one job.
#[derive(Debug, Clone)]
pub struct TransformInput {
    pub payload: JobPayload,
    pub files: BTreeMap<FileRole, Bytes>,
}

impl TransformInput {
    pub fn file(&self, role: FileRole) -> Option<&Bytes> {
        self.files.get(&role)
    }
}

/// Rows and warnings produced from a job's inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    pub facts: Vec<FactRow>,
    pub aggs: Vec<AggRow>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransformError {
    pub message: String,
    pub warnings: Vec<String>,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Turns raw settlement/orders files into fact and aggregate rows.
///
/// Runs on a blocking thread; implementations may be CPU heavy.
pub trait SettlementTransform: Send + Sync + 'static {
    fn transform(&self, input: &TransformInput) -> Result<TransformOutput, TransformError>;
}

impl<F> SettlementTransform for F
where
    F: Fn(&TransformInput) -> Result<TransformOutput, TransformError> + Send + Sync + 'static,
{
    fn transform(&self, input: &TransformInput) -> Result<TransformOutput, TransformError> {
        self(input)
    }
}

/// Placeholder used when no business rules are installed; fails every job.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTransform;

impl SettlementTransform for UnconfiguredTransform {
    fn transform(&self, input: &TransformInput) -> Result<TransformOutput, TransformError> {
        Err(TransformError::new(format!(
            "no settlement transform installed for platform {}",
            input.payload.platform
        )))
    }
}
