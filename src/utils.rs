use elevate::RunningAs;
use std::sync::OnceLock;

static IS_ROOT: OnceLock<bool> = OnceLock::new();

/// Returns whether the current process is running as root.
/// The result is cached on first call using OnceLock.
pub fn is_root() -> bool {
    *IS_ROOT.get_or_init(|| matches!(elevate::check(), RunningAs::Root | RunningAs::Suid))
}

/// Re-executes the whole program through sudo/doas/pkexec if not already root.
/// Used when the configured elevation is `process`; must run before raw mode is entered.
pub fn escalate_if_needed() -> Result<(), Box<dyn std::error::Error>> {
    if !is_root() {
        println!("raidie needs root privileges to manage RAID arrays; re-launching elevated.");
        elevate::escalate_if_needed()?;
    }
    Ok(())
}

/// Convert bytes to human-readable format (KB, MB, GB, TB)
pub fn bytes_to_human(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Size column for an array, "?" when mdstat did not report one
pub fn array_size(size_bytes: Option<u64>) -> String {
    size_bytes.map(bytes_to_human).unwrap_or_else(|| "?".to_string())
}
