//! Core result types for operation execution

/// Whether a run only reports what it would do or actually mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read-only: stops before every mutating call
    Diff,
    /// Performs the mutations
    Deploy,
}

impl Mode {
    pub fn is_diff(self) -> bool {
        matches!(self, Self::Diff)
    }
}

/// Result of calling a single operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Resource was created
    Created,
    /// Resource was moved, renamed or redeployed
    Modified,
    /// Nothing to change
    NoChange,
    /// Diff mode: the change was reported, not applied
    Planned,
    /// Call failed
    Failed { error: String },
    /// Not called because an ancestor operation failed, or the target
    /// is not provisioned
    Skipped { reason: String },
}

impl OperationResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified)
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub created: usize,
    pub modified: usize,
    pub no_change: usize,
    pub planned: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of operations processed
    pub fn total(&self) -> usize {
        self.created + self.modified + self.no_change + self.planned + self.skipped + self.failed
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.created += other.created;
        self.modified += other.modified;
        self.no_change += other.no_change;
        self.planned += other.planned;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &OperationResult) {
        match result {
            OperationResult::Created => self.created += 1,
            OperationResult::Modified => self.modified += 1,
            OperationResult::NoChange => self.no_change += 1,
            OperationResult::Planned => self.planned += 1,
            OperationResult::Failed { .. } => self.failed += 1,
            OperationResult::Skipped { .. } => self.skipped += 1,
        }
    }
}
