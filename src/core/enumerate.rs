//! Parsers for the textual reports the kernel tools print.
//!
//! Every parser treats its input as an unstable contract: lines that do not
//! have the expected shape are skipped instead of failing the whole report.

use std::collections::HashMap;

use super::{ArrayHandle, ArrayState, BlockDevice, DeviceKind, RaidLevel};

/// Name prefixes of physical disks offered for array creation
pub const DISK_PREFIXES: &[&str] = &["sd", "nvme"];

const ARRAY_PREFIX: &str = "md";
const ACTIVE_MEMBER_MARKER: &str = "active sync";

/// Parses `lsblk -ndo NAME,SIZE,TYPE,MOUNTPOINT` output.
///
/// Only whole disks whose name starts with one of [`DISK_PREFIXES`] are kept.
pub fn parse_block_devices(output: &str) -> Vec<BlockDevice> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let name = parts.next()?;
            let size = parts.next()?;
            let kind = DeviceKind::from_lsblk(parts.next()?);
            // MOUNTPOINT may itself contain spaces
            let mountpoint = parts.collect::<Vec<_>>().join(" ");

            if kind != DeviceKind::Disk || !DISK_PREFIXES.iter().any(|p| name.starts_with(p)) {
                return None;
            }

            Some(BlockDevice {
                path: format!("/dev/{name}"),
                size: size.to_string(),
                kind,
                mountpoint: (!mountpoint.is_empty()).then_some(mountpoint),
            })
        })
        .collect()
}

/// Parses `/proc/mdstat`.
///
/// ```text
/// md0 : active raid1 sdc[1] sdb[0]
///       1953382464 blocks super 1.2 [2/2] [UU]
/// ```
pub fn parse_mdstat(output: &str) -> Vec<ArrayHandle> {
    let mut arrays: Vec<ArrayHandle> = Vec::new();

    for line in output.lines() {
        if line.starts_with(ARRAY_PREFIX) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let Some(name) = parts.first() else {
                continue;
            };

            let state = if parts.contains(&"inactive") {
                ArrayState::Stopped
            } else {
                ArrayState::Active
            };
            let level = parts
                .iter()
                .find(|part| part.starts_with("raid"))
                .and_then(|part| part.parse::<RaidLevel>().ok());
            let member_devices = parts
                .iter()
                .filter_map(|part| {
                    let (device, rest) = part.split_once('[')?;
                    rest.contains(']').then(|| format!("/dev/{device}"))
                })
                .collect();

            arrays.push(ArrayHandle {
                name: name.to_string(),
                level,
                member_devices,
                state,
                size_bytes: None,
                degraded: false,
                mount_target: None,
            });
            continue;
        }

        // Continuation lines describe the array above them
        let Some(current) = arrays.last_mut() else {
            continue;
        };
        let trimmed = line.trim();
        if current.size_bytes.is_none() {
            let mut words = trimmed.split_whitespace();
            if let (Some(count), Some("blocks")) = (words.next(), words.next()) {
                current.size_bytes = count.parse::<u64>().ok().map(|kib| kib * 1024);
            }
        }
        if let Some(status) = trimmed
            .split_whitespace()
            .filter(|w| w.starts_with('[') && w.ends_with(']') && !w.contains('/'))
            .last()
        {
            if status.chars().all(|c| matches!(c, '[' | ']' | 'U' | '_')) {
                current.degraded = status.contains('_');
            }
        }
    }

    arrays
}

/// Devices marked `active sync` in `mdadm --detail` output; the device is the last column.
pub fn parse_detail_members(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains(ACTIVE_MEMBER_MARKER))
        .filter_map(|line| line.split_whitespace().last())
        .map(str::to_string)
        .collect()
}

/// Parses `findmnt -rn -o SOURCE,TARGET` into source -> target.
///
/// findmnt's raw mode escapes spaces as `\x20`.
pub fn parse_mount_table(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (source, target) = line.trim().split_once(' ')?;
            Some((source.to_string(), target.trim().replace("\\x20", " ")))
        })
        .collect()
}

/// Marks arrays that appear in the mount table as mounted
pub fn apply_mounts(arrays: &mut [ArrayHandle], mounts: &HashMap<String, String>) {
    for array in arrays {
        if let Some(target) = mounts.get(&array.device_path()) {
            array.mount_target = Some(target.clone());
            if array.state == ArrayState::Active {
                array.state = ArrayState::Mounted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DeviceStatus;

    const LSBLK_SAMPLE: &str = "\
sda    931.5G disk
sdb      1.8T disk /mnt/backup
sdc      1.8T disk
sdc1     1.8T part
nvme0n1  476.9G disk /
loop0     55.7M loop /snap/core18/2829
sr0      1024M rom
md0      1.8T raid1 /srv/data
garbage
vda       20G
";

    const MDSTAT_SAMPLE: &str = "\
Personalities : [raid1] [raid6] [raid5] [raid4]
md127 : inactive sdf[0](S)
      976630488 blocks super 1.2

md0 : active raid1 sdc[1] sdb[0]
      1953382464 blocks super 1.2 [2/2] [UU]
      bitmap: 0/15 pages [0KB], 65536KB chunk

md1 : active raid5 sde[3] sdd[1] sdg[0]
      3906764800 blocks super 1.2 level 5, 512k chunk, algorithm 2 [3/2] [UU_]
      [>....................]  recovery =  1.3% (26112000/1953382400) finish=160.2min speed=200490K/sec

unused devices: <none>
";

    const DETAIL_SAMPLE: &str = "\
/dev/md0:
           Version : 1.2
        Raid Level : raid1
      Raid Devices : 2
             State : clean

    Number   Major   Minor   RaidDevice State
       0       8       16        0      active sync   /dev/sdb
       1       8       32        1      active sync   /dev/sdc
       2       8       48        -      spare   /dev/sdd
";

    #[test]
    fn test_block_devices_filtered_and_classified() {
        let devices = parse_block_devices(LSBLK_SAMPLE);

        let paths: Vec<&str> = devices.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["/dev/sda", "/dev/sdb", "/dev/sdc", "/dev/nvme0n1"]);

        let available: Vec<&str> = devices
            .iter()
            .filter(|d| d.status() == DeviceStatus::Available)
            .map(|d| d.path.as_str())
            .collect();
        let mounted: Vec<&str> = devices
            .iter()
            .filter(|d| d.status() == DeviceStatus::Mounted)
            .map(|d| d.path.as_str())
            .collect();
        assert_eq!(available, vec!["/dev/sda", "/dev/sdc"]);
        assert_eq!(mounted, vec!["/dev/sdb", "/dev/nvme0n1"]);

        assert_eq!(devices[1].size, "1.8T");
        assert_eq!(devices[1].mountpoint.as_deref(), Some("/mnt/backup"));
    }

    #[test]
    fn test_block_devices_skip_malformed_lines() {
        let devices = parse_block_devices("sdx\nsdy 10G\n\nsdz 10G disk\n");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].path, "/dev/sdz");
        assert_eq!(devices[0].mountpoint, None);
    }

    #[test]
    fn test_mountpoint_with_spaces_is_kept_whole() {
        let devices = parse_block_devices("sdb 1T disk /media/user/My Disk\n");
        assert_eq!(devices[0].mountpoint.as_deref(), Some("/media/user/My Disk"));
    }

    #[test]
    fn test_mdstat_lists_only_md_lines() {
        let arrays = parse_mdstat(MDSTAT_SAMPLE);
        let names: Vec<&str> = arrays.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["md127", "md0", "md1"]);
    }

    #[test]
    fn test_mdstat_details() {
        let arrays = parse_mdstat(MDSTAT_SAMPLE);

        let md127 = &arrays[0];
        assert_eq!(md127.state, ArrayState::Stopped);
        assert_eq!(md127.level, None);
        assert_eq!(md127.member_devices, vec!["/dev/sdf"]);

        let md0 = &arrays[1];
        assert_eq!(md0.state, ArrayState::Active);
        assert_eq!(md0.level, Some(RaidLevel::Raid1));
        assert_eq!(md0.member_devices, vec!["/dev/sdc", "/dev/sdb"]);
        assert_eq!(md0.size_bytes, Some(1953382464 * 1024));
        assert!(!md0.degraded);

        let md1 = &arrays[2];
        assert_eq!(md1.level, Some(RaidLevel::Raid5));
        assert!(md1.degraded);
    }

    #[test]
    fn test_empty_mdstat() {
        assert!(parse_mdstat("Personalities : \nunused devices: <none>\n").is_empty());
    }

    #[test]
    fn test_detail_members_only_active_sync() {
        assert_eq!(parse_detail_members(DETAIL_SAMPLE), vec!["/dev/sdb", "/dev/sdc"]);
    }

    #[test]
    fn test_mount_table_marks_arrays_mounted() {
        let mounts = parse_mount_table("/dev/nvme0n1p2 /\n/dev/md0 /srv/raid\\x20data\n");
        let mut arrays = parse_mdstat(MDSTAT_SAMPLE);
        apply_mounts(&mut arrays, &mounts);

        assert_eq!(arrays[1].state, ArrayState::Mounted);
        assert_eq!(arrays[1].mount_target.as_deref(), Some("/srv/raid data"));
        assert_eq!(arrays[2].state, ArrayState::Active);
    }
}
