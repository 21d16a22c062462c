pub mod enumerate;
pub mod raid_ops;
pub mod runner;
pub mod session;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Represents a block storage device reported by the device listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDevice {
    pub path: String,
    pub size: String,
    pub kind: DeviceKind,
    pub mountpoint: Option<String>,
}

impl BlockDevice {
    pub fn status(&self) -> DeviceStatus {
        if self.mountpoint.is_some() {
            DeviceStatus::Mounted
        } else {
            DeviceStatus::Available
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Disk,
    Partition,
    Rom,
    Loop,
    Raid,
    Other(String),
}

impl DeviceKind {
    pub fn from_lsblk(kind: &str) -> Self {
        match kind {
            "disk" => DeviceKind::Disk,
            "part" => DeviceKind::Partition,
            "rom" => DeviceKind::Rom,
            "loop" => DeviceKind::Loop,
            k if k.starts_with("raid") => DeviceKind::Raid,
            other => DeviceKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Available,
    Mounted,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Available => f.write_str("Available"),
            DeviceStatus::Mounted => f.write_str("Mounted"),
        }
    }
}

/// Supported RAID levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    Raid10,
}

impl RaidLevel {
    pub const ALL: [RaidLevel; 5] = [
        RaidLevel::Raid0,
        RaidLevel::Raid1,
        RaidLevel::Raid5,
        RaidLevel::Raid6,
        RaidLevel::Raid10,
    ];

    /// Smallest member count mdadm accepts for a fresh array of this level
    pub fn minimum_devices(&self) -> usize {
        match self {
            RaidLevel::Raid0 | RaidLevel::Raid1 => 2,
            RaidLevel::Raid5 => 3,
            RaidLevel::Raid6 | RaidLevel::Raid10 => 4,
        }
    }

    /// Value passed to `--level=`
    pub fn as_mdadm_arg(&self) -> &'static str {
        match self {
            RaidLevel::Raid0 => "0",
            RaidLevel::Raid1 => "1",
            RaidLevel::Raid5 => "5",
            RaidLevel::Raid6 => "6",
            RaidLevel::Raid10 => "10",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RaidLevel::Raid0 => "RAID 0 (stripe)",
            RaidLevel::Raid1 => "RAID 1 (mirror)",
            RaidLevel::Raid5 => "RAID 5 (single parity)",
            RaidLevel::Raid6 => "RAID 6 (double parity)",
            RaidLevel::Raid10 => "RAID 10 (striped mirrors)",
        }
    }
}

impl fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "raid{}", self.as_mdadm_arg())
    }
}

impl FromStr for RaidLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let digits = lowered.strip_prefix("raid").unwrap_or(&lowered);
        match digits {
            "0" => Ok(RaidLevel::Raid0),
            "1" => Ok(RaidLevel::Raid1),
            "5" => Ok(RaidLevel::Raid5),
            "6" => Ok(RaidLevel::Raid6),
            "10" => Ok(RaidLevel::Raid10),
            _ => Err(ValidationError::UnknownRaidLevel(s.to_string())),
        }
    }
}

/// Lifecycle state of an array as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArrayState {
    Creating,
    Active,
    Mounted,
    Stopped,
}

impl fmt::Display for ArrayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ArrayState::Creating => "Creating",
            ArrayState::Active => "Active",
            ArrayState::Mounted => "Mounted",
            ArrayState::Stopped => "Stopped",
        };
        f.write_str(text)
    }
}

/// A software RAID array known to the kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayHandle {
    pub name: String,
    pub level: Option<RaidLevel>,
    pub member_devices: Vec<String>,
    pub state: ArrayState,
    pub size_bytes: Option<u64>,
    pub degraded: bool,
    pub mount_target: Option<String>,
}

impl ArrayHandle {
    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.name)
    }
}

/// Filesystems offered for formatting an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileSystemType {
    Ext4,
    Xfs,
    Btrfs,
}

impl FileSystemType {
    pub const ALL: [FileSystemType; 3] =
        [FileSystemType::Ext4, FileSystemType::Xfs, FileSystemType::Btrfs];

    /// Formatter binary, `mkfs.<type>`
    pub fn mkfs_program(&self) -> String {
        format!("mkfs.{}", self.display_name())
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FileSystemType::Ext4 => "ext4",
            FileSystemType::Xfs => "xfs",
            FileSystemType::Btrfs => "btrfs",
        }
    }
}

impl FromStr for FileSystemType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ext4" => Ok(FileSystemType::Ext4),
            "xfs" => Ok(FileSystemType::Xfs),
            "btrfs" => Ok(FileSystemType::Btrfs),
            _ => Err(ValidationError::UnsupportedFilesystem(s.to_string())),
        }
    }
}

/// Application state machine
#[derive(Debug, Clone, PartialEq)]
pub enum AppState {
    Idle,
    LevelMenu,
    FormattingMenu,
    MountPrompt,
    AddDrivePrompt,
    ConfirmDelete(String),
    Creating,
    InProgress(String),
    Info(String),
    Error(String),
    Success(String),
}

/// Pre-flight contract violations. None of these ever reach the OS.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{level} needs at least {required} devices, {provided} selected ({} more required)", .required - .provided)]
    InsufficientDevices {
        level: RaidLevel,
        required: usize,
        provided: usize,
    },

    #[error("Device listed twice: {0}")]
    DuplicateDevice(String),

    #[error("Invalid array name: {0}")]
    InvalidArrayName(String),

    #[error("Invalid device path: {0}")]
    InvalidDevicePath(String),

    #[error("Mount point must be an absolute path: {0}")]
    InvalidMountPoint(String),

    #[error("Unsupported filesystem: {0} (expected ext4, xfs or btrfs)")]
    UnsupportedFilesystem(String),

    #[error("Unknown RAID level: {0} (expected 0, 1, 5, 6 or 10)")]
    UnknownRaidLevel(String),

    #[error("Confirmation mismatch. Expected '{expected}', got '{got}'")]
    ConfirmationMismatch { expected: String, got: String },

    #[error("A RAID creation is already running")]
    CreationInProgress,

    #[error("Array /dev/{0} already exists")]
    ArrayNameTaken(String),
}

/// Errors that can occur during RAID operations
#[derive(Error, Debug)]
pub enum RaidError {
    #[error("Rejected before attempting: {0}")]
    Validation(#[from] ValidationError),

    #[error("Attempted and failed: `{command}` exited with {}: {}", exit_label(.exit_code), .stderr.trim())]
    Execution {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Could not enumerate: {0}")]
    Enumeration(String),

    #[error("Attempted and failed: session error: {0}")]
    Session(String),

    #[error("Attempted, outcome unknown: {0}")]
    AmbiguousOutcome(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

/// Checks that `name` looks like a kernel md device name (`md0`, `md127`, `md_data`)
pub fn validate_array_name(name: &str) -> Result<(), ValidationError> {
    let valid = name
        .strip_prefix("md")
        .map(|rest| {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidArrayName(name.to_string()))
    }
}

pub fn validate_device_path(path: &str) -> Result<(), ValidationError> {
    let valid = path
        .strip_prefix("/dev/")
        .map(|rest| !rest.is_empty() && !rest.contains("..") && !rest.contains(char::is_whitespace))
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidDevicePath(path.to_string()))
    }
}
