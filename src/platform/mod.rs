#[cfg(target_os = "linux")]
pub mod linux;

use std::sync::Arc;

use crate::config::Config;
use crate::core::raid_ops::RaidManager;

/// Get the RaidManager for the current platform.
///
/// `interactive` is false when elevation prompts cannot reach the user.
#[cfg(target_os = "linux")]
pub fn get_raid_manager(config: &Config, interactive: bool) -> Arc<dyn RaidManager> {
    use crate::core::runner::SystemRunner;

    let mut runner = SystemRunner::new(config.elevation.clone());
    if !interactive {
        runner = runner.non_interactive();
    }
    let runner = Arc::new(runner);
    Arc::new(linux::MdadmManager::new(runner, config.manager_settings()))
}

#[cfg(not(target_os = "linux"))]
compile_error!("raidie drives Linux software RAID (mdadm) and only builds for Linux");
