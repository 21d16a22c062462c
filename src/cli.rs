use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{Config, LoggingLevel};
use crate::core::raid_ops::{DeleteConfirmation, RaidManager, UnmountOutcome};
use crate::core::runner::Elevation;
use crate::core::session::SessionEvent;
use crate::core::{ArrayHandle, FileSystemType, RaidLevel, validate_array_name};
use crate::utils::array_size;

#[derive(Parser, Debug)]
#[command(name = "raidie")]
#[command(about = "Terminal manager for Linux software RAID (mdadm)", long_about = None)]
pub struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/raidie/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// How privileged commands are run: sudo, pkexec, doas, none or process
    #[arg(long, global = true, value_parser = parse_elevation)]
    pub elevation: Option<Elevation>,

    /// Array name used for new arrays (e.g. md0)
    #[arg(long, global = true)]
    pub target_array: Option<String>,

    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LoggingLevel>,

    /// Runs the interactive interface when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List disks that can become array members
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// List RAID arrays from /proc/mdstat
    Arrays {
        #[arg(long)]
        json: bool,
    },
    /// Create an array from the given devices
    Create {
        /// RAID level (0, 1, 5, 6, 10)
        #[arg(short, long)]
        level: RaidLevel,
        /// Member devices, e.g. /dev/sdb /dev/sdc
        #[arg(required = true)]
        devices: Vec<String>,
        /// Answer yes if mdadm asks for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Stop an array and wipe the RAID metadata from its members
    Delete {
        name: String,
        /// Must repeat the array name
        #[arg(long)]
        confirm: String,
    },
    /// Mount an array
    Mount { name: String, mount_point: String },
    /// Unmount an array
    Unmount { name: String },
    /// Create a filesystem on an array
    Format {
        name: String,
        /// Filesystem type (ext4, xfs, btrfs)
        #[arg(long = "fs")]
        fs_type: FileSystemType,
    },
    /// Add a device to an existing array
    Add { name: String, device: String },
}

fn parse_elevation(value: &str) -> Result<Elevation, String> {
    match value.to_ascii_lowercase().as_str() {
        "sudo" => Ok(Elevation::Sudo),
        "pkexec" => Ok(Elevation::Pkexec),
        "doas" => Ok(Elevation::Doas),
        "none" => Ok(Elevation::None),
        "process" => Ok(Elevation::Process),
        other => Err(format!(
            "unknown elevation '{other}' (expected sudo, pkexec, doas, none or process)"
        )),
    }
}

impl Cli {
    /// Command-line flags win over the config file
    pub fn apply_overrides(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(elevation) = &self.elevation {
            config.elevation = elevation.clone();
        }
        if let Some(target) = &self.target_array {
            validate_array_name(target).context("Invalid --target-array")?;
            config.target_array = target.clone();
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        Ok(())
    }
}

pub async fn run(command: Commands, manager: Arc<dyn RaidManager>) -> anyhow::Result<()> {
    match command {
        Commands::Devices { json } => {
            let devices = manager.list_block_devices().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No disks found.");
            } else {
                for device in devices {
                    println!(
                        "{:<16} {:>8}  {:<10} {}",
                        device.path,
                        device.size,
                        device.status(),
                        device.mountpoint.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Arrays { json } => {
            let arrays = manager.list_arrays().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&arrays)?);
            } else if arrays.is_empty() {
                println!("No RAID arrays found.");
            } else {
                for array in arrays {
                    let level = array.level.map(|l| l.to_string()).unwrap_or_default();
                    let degraded = if array.degraded { " (degraded)" } else { "" };
                    println!(
                        "{:<8} {:<7} {:>10}  {}{}  [{}] {}",
                        array.name,
                        level,
                        array_size(array.size_bytes),
                        array.state,
                        degraded,
                        array.member_devices.join(" "),
                        array.mount_target.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Create { level, devices, yes } => create(manager, level, &devices, yes).await?,
        Commands::Delete { name, confirm } => {
            let confirmation = DeleteConfirmation::typed(&name, &confirm)
                .map_err(crate::core::RaidError::from)?;
            let report = manager.delete_array(&confirmation).await?;
            for step in &report.steps {
                match &step.error {
                    None => println!("  ok      {}", step.action),
                    Some(err) => println!("  failed  {}: {}", step.action, err),
                }
            }
            let remaining = remaining_arrays(&report.arrays_after);
            if !report.is_clean() {
                bail!("{}\n{remaining}", report.summary());
            }
            println!("{}", report.summary());
            println!("{remaining}");
        }
        Commands::Mount { name, mount_point } => {
            manager.mount_array(&name, &mount_point).await?;
            println!("Successfully mounted {name} to {mount_point}");
        }
        Commands::Unmount { name } => match manager.unmount_array(&name).await? {
            UnmountOutcome::Unmounted { target } => {
                println!("Successfully unmounted {name} from {target}")
            }
            UnmountOutcome::NotMounted => println!("{name} is not currently mounted."),
        },
        Commands::Format { name, fs_type } => {
            manager.create_filesystem(&name, fs_type).await?;
            println!(
                "Successfully created {} filesystem on {name}",
                fs_type.display_name()
            );
        }
        Commands::Add { name, device } => {
            manager.add_drive(&name, &device).await?;
            println!("Successfully added {device} to {name}");
        }
    }
    Ok(())
}

fn remaining_arrays(arrays: &[ArrayHandle]) -> String {
    if arrays.is_empty() {
        "No RAID arrays remain.".to_string()
    } else {
        let names: Vec<&str> = arrays.iter().map(|a| a.name.as_str()).collect();
        format!("Remaining arrays: {}", names.join(", "))
    }
}

/// Streams the creation session to the terminal. Ctrl-C cancels it.
async fn create(
    manager: Arc<dyn RaidManager>,
    level: RaidLevel,
    devices: &[String],
    assume_yes: bool,
) -> anyhow::Result<()> {
    let mut session = manager.create_array(level, devices)?;
    println!("Running: {}", session.command());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        let event = tokio::select! {
            event = session.next_event() => event,
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                eprintln!("Interrupted, cancelling...");
                session.cancel();
                continue;
            }
        };

        match event {
            Some(SessionEvent::Progress(line)) => println!("{line}"),
            Some(SessionEvent::ConfirmationNeeded) => {
                let proceed = if assume_yes {
                    println!("Answering yes (--yes).");
                    true
                } else {
                    tokio::select! {
                        answer = ask_yes_no("Continue creating array? [y/N] ") => answer?,
                        _ = &mut ctrl_c, if !interrupted => {
                            interrupted = true;
                            false
                        }
                    }
                };
                info!(proceed, "confirmation answered from the terminal");
                session.decide(proceed);
            }
            Some(SessionEvent::Finished(outcome)) => {
                return match outcome.error() {
                    Some(err) => Err(err.into()),
                    None => {
                        println!("{}", outcome.message);
                        Ok(())
                    }
                };
            }
            None => bail!("creation session ended without a result"),
        }
    }
}

/// Reads the answer on a detached thread so an unanswered prompt never holds up shutdown
async fn ask_yes_no(question: &'static str) -> anyhow::Result<bool> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let read = || -> io::Result<String> {
            print!("{question}");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        };
        let _ = tx.send(read());
    });

    let answer = rx.await.context("terminal prompt closed")??;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommand_parsing() {
        let cli = Cli::try_parse_from([
            "raidie", "create", "--level", "raid5", "/dev/sdb", "/dev/sdc", "/dev/sdd", "--yes",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Create { level, devices, yes }) => {
                assert_eq!(level, RaidLevel::Raid5);
                assert_eq!(devices.len(), 3);
                assert!(yes);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_no_subcommand_means_interactive() {
        let cli = Cli::try_parse_from(["raidie"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_rejects_unknown_filesystem_and_level() {
        assert!(Cli::try_parse_from(["raidie", "format", "md0", "--fs", "ntfs"]).is_err());
        assert!(Cli::try_parse_from(["raidie", "create", "-l", "4", "/dev/sdb", "/dev/sdc"]).is_err());
    }

    #[test]
    fn test_overrides_win_over_config() {
        let cli = Cli::try_parse_from([
            "raidie",
            "--elevation",
            "doas",
            "--target-array",
            "md5",
            "--log-level",
            "debug",
            "arrays",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config).unwrap();
        assert_eq!(config.elevation, Elevation::Doas);
        assert_eq!(config.target_array, "md5");
        assert_eq!(config.log_level, LoggingLevel::Debug);
    }

    #[test]
    fn test_invalid_target_override() {
        let cli = Cli::try_parse_from(["raidie", "--target-array", "../md0"]).unwrap();
        let mut config = Config::default();
        assert!(cli.apply_overrides(&mut config).is_err());
        assert_eq!(config.target_array, "md0");
    }

    #[test]
    fn test_remaining_arrays_after_delete() {
        assert_eq!(remaining_arrays(&[]), "No RAID arrays remain.");

        let array = |name: &str| ArrayHandle {
            name: name.to_string(),
            level: Some(RaidLevel::Raid1),
            member_devices: vec!["/dev/sdb".to_string(), "/dev/sdc".to_string()],
            state: crate::core::ArrayState::Active,
            size_bytes: None,
            degraded: false,
            mount_target: None,
        };
        assert_eq!(remaining_arrays(&[array("md1"), array("md2")]), "Remaining arrays: md1, md2");
    }
}
