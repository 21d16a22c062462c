use async_trait::async_trait;

use super::session::SessionHandle;
use super::{ArrayHandle, BlockDevice, FileSystemType, RaidError, RaidLevel, ValidationError};

/// Proof that the user explicitly confirmed deleting one array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteConfirmation {
    array: String,
}

impl DeleteConfirmation {
    /// The user must type the array name back
    pub fn typed(array: &str, input: &str) -> Result<Self, ValidationError> {
        if input.trim() != array {
            return Err(ValidationError::ConfirmationMismatch {
                expected: array.to_string(),
                got: input.to_string(),
            });
        }
        Ok(Self {
            array: array.to_string(),
        })
    }

    pub fn array(&self) -> &str {
        &self.array
    }
}

/// Result of one step of a best-effort sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub action: String,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn ok(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            error: None,
        }
    }

    pub fn failed(action: impl Into<String>, error: &RaidError) -> Self {
        Self {
            action: action.into(),
            error: Some(error.to_string()),
        }
    }
}

/// Aggregate report of an array deletion. Steps that succeeded are not rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub array: String,
    pub steps: Vec<StepOutcome>,
    /// Steps not attempted because an earlier one failed
    pub skipped: Vec<String>,
    /// Array list re-read after the sequence, whatever happened
    pub arrays_after: Vec<ArrayHandle>,
}

impl DeleteReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.error.is_some())
    }

    pub fn summary(&self) -> String {
        let failed = self.failures().count();
        if failed == 0 {
            format!(
                "Successfully deleted {} and cleared all component devices",
                self.array
            )
        } else {
            let details: Vec<String> = self
                .failures()
                .map(|s| format!("{}: {}", s.action, s.error.as_deref().unwrap_or_default()))
                .collect();
            let mut summary = format!(
                "Deleting {} finished with {} failed step(s): {}",
                self.array,
                failed,
                details.join("; ")
            );
            if !self.skipped.is_empty() {
                summary.push_str(&format!(
                    "; remaining steps skipped, array still running: {}",
                    self.skipped.join(", ")
                ));
            }
            summary
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmountOutcome {
    Unmounted { target: String },
    /// Informational, not an error
    NotMounted,
}

/// Lifecycle operations on software RAID arrays
#[async_trait]
pub trait RaidManager: Send + Sync {
    /// Physical disks that could become array members
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>, RaidError>;

    /// Arrays currently known to the kernel
    async fn list_arrays(&self) -> Result<Vec<ArrayHandle>, RaidError>;

    /// Validates the request and starts the interactive creation session
    fn create_array(&self, level: RaidLevel, devices: &[String]) -> Result<SessionHandle, RaidError>;

    /// Stops the array and wipes its members' metadata, best effort
    async fn delete_array(&self, confirmation: &DeleteConfirmation) -> Result<DeleteReport, RaidError>;

    async fn mount_array(&self, array: &str, mount_point: &str) -> Result<(), RaidError>;

    async fn unmount_array(&self, array: &str) -> Result<UnmountOutcome, RaidError>;

    async fn create_filesystem(&self, array: &str, fs_type: FileSystemType) -> Result<(), RaidError>;

    /// Adds a device to a live array. The device's current use is not checked.
    async fn add_drive(&self, array: &str, device: &str) -> Result<(), RaidError>;

    /// Checks if running with elevated privileges (root/admin)
    fn has_privileges(&self) -> bool;

    /// Whether a creation session is in flight
    fn creation_pending(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_confirmation_requires_exact_name() {
        assert!(DeleteConfirmation::typed("md0", "md0").is_ok());
        assert!(DeleteConfirmation::typed("md0", " md0 ").is_ok());
        assert_eq!(
            DeleteConfirmation::typed("md0", "md1"),
            Err(ValidationError::ConfirmationMismatch {
                expected: "md0".to_string(),
                got: "md1".to_string(),
            })
        );
    }

    #[test]
    fn test_report_summary_names_failures() {
        let report = DeleteReport {
            array: "md0".to_string(),
            steps: vec![
                StepOutcome::ok("stop /dev/md0"),
                StepOutcome {
                    action: "zero superblock on /dev/sdc".to_string(),
                    error: Some("device busy".to_string()),
                },
            ],
            skipped: Vec::new(),
            arrays_after: Vec::new(),
        };

        assert!(!report.is_clean());
        assert_eq!(
            report.summary(),
            "Deleting md0 finished with 1 failed step(s): zero superblock on /dev/sdc: device busy"
        );
    }

    #[test]
    fn test_report_summary_lists_skipped_steps() {
        let report = DeleteReport {
            array: "md0".to_string(),
            steps: vec![StepOutcome {
                action: "stop /dev/md0".to_string(),
                error: Some("device or resource busy".to_string()),
            }],
            skipped: vec![
                "remove /dev/md0".to_string(),
                "zero superblock on /dev/sdb".to_string(),
            ],
            arrays_after: Vec::new(),
        };

        assert_eq!(
            report.summary(),
            "Deleting md0 finished with 1 failed step(s): stop /dev/md0: device or resource busy; \
             remaining steps skipped, array still running: remove /dev/md0, zero superblock on /dev/sdb"
        );
    }
}
