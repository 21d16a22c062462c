use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::enumerate::{
    apply_mounts, parse_block_devices, parse_detail_members, parse_mdstat, parse_mount_table,
};
use crate::core::raid_ops::{
    DeleteConfirmation, DeleteReport, RaidManager, StepOutcome, UnmountOutcome,
};
use crate::core::runner::{CommandRunner, Invocation};
use crate::core::session::{CreationSlot, SessionConfig, SessionHandle, spawn_session};
use crate::core::{
    ArrayHandle, BlockDevice, FileSystemType, RaidError, RaidLevel, ValidationError,
    validate_array_name, validate_device_path,
};
use crate::utils;

const MDADM: &str = "mdadm";

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Array name every creation targets
    pub target_array: String,
    pub session: SessionConfig,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            target_array: "md0".to_string(),
            session: SessionConfig::default(),
        }
    }
}

/// Linux software RAID manager driving mdadm, lsblk and findmnt
pub struct MdadmManager {
    runner: Arc<dyn CommandRunner>,
    settings: ManagerSettings,
    creation: CreationSlot,
}

impl MdadmManager {
    pub fn new(runner: Arc<dyn CommandRunner>, settings: ManagerSettings) -> Self {
        Self {
            runner,
            settings,
            creation: CreationSlot::default(),
        }
    }

    /// Exact command line for creating the target array
    pub fn create_command(&self, level: RaidLevel, devices: &[String]) -> Invocation {
        let mut argv = vec![
            MDADM.to_string(),
            "--create".to_string(),
            "--verbose".to_string(),
            format!("/dev/{}", self.settings.target_array),
            format!("--level={}", level.as_mdadm_arg()),
            format!("--raid-devices={}", devices.len()),
        ];
        argv.extend(devices.iter().cloned());
        Invocation::elevated(argv)
    }

    fn validate_create(&self, level: RaidLevel, devices: &[String]) -> Result<(), ValidationError> {
        let required = level.minimum_devices();
        if devices.len() < required {
            return Err(ValidationError::InsufficientDevices {
                level,
                required,
                provided: devices.len(),
            });
        }

        let mut seen = HashSet::new();
        for device in devices {
            validate_device_path(device)?;
            if !seen.insert(device.as_str()) {
                return Err(ValidationError::DuplicateDevice(device.clone()));
            }
        }

        validate_array_name(&self.settings.target_array)
    }

    fn read_mdstat(&self) -> Result<Vec<ArrayHandle>, RaidError> {
        let output = self
            .runner
            .run(&Invocation::user(["cat", "/proc/mdstat"]))
            .map_err(|e| RaidError::Enumeration(format!("Error refreshing RAID list: {e}")))?;
        Ok(parse_mdstat(&output.stdout))
    }

    /// Members of an assembled array, falling back to /proc/mdstat
    fn collect_members(&self, array: &str, steps: &mut Vec<StepOutcome>) -> Vec<String> {
        let path = format!("/dev/{array}");
        let action = format!("query members of {path}");
        let detail = self
            .runner
            .run(&Invocation::elevated([MDADM, "--detail", path.as_str()]));

        let members = match detail {
            Ok(output) => {
                steps.push(StepOutcome::ok(action));
                parse_detail_members(&output.stdout)
            }
            Err(e) => {
                warn!(array, error = %e, "could not query array members");
                steps.push(StepOutcome::failed(action, &e));
                Vec::new()
            }
        };
        if !members.is_empty() {
            return members;
        }

        self.read_mdstat()
            .ok()
            .and_then(|arrays| arrays.into_iter().find(|a| a.name == array))
            .map(|a| a.member_devices)
            .unwrap_or_default()
    }
}

#[async_trait]
impl RaidManager for MdadmManager {
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>, RaidError> {
        let output = self
            .runner
            .run(&Invocation::user(["lsblk", "-ndo", "NAME,SIZE,TYPE,MOUNTPOINT"]))
            .map_err(|e| RaidError::Enumeration(format!("Error refreshing devices: {e}")))?;

        Ok(parse_block_devices(&output.stdout))
    }

    async fn list_arrays(&self) -> Result<Vec<ArrayHandle>, RaidError> {
        let mut arrays = self.read_mdstat()?;

        match self
            .runner
            .run(&Invocation::user(["findmnt", "-rn", "-o", "SOURCE,TARGET"]).tolerant())
        {
            Ok(output) if output.success() => apply_mounts(&mut arrays, &parse_mount_table(&output.stdout)),
            Ok(output) => warn!(exit_code = ?output.exit_code, "findmnt failed, mount state unknown"),
            Err(e) => warn!(error = %e, "findmnt failed, mount state unknown"),
        }

        Ok(arrays)
    }

    fn create_array(&self, level: RaidLevel, devices: &[String]) -> Result<SessionHandle, RaidError> {
        self.validate_create(level, devices)?;

        let guard = self
            .creation
            .try_claim()
            .ok_or(ValidationError::CreationInProgress)?;

        let target = &self.settings.target_array;
        match self.read_mdstat() {
            Ok(arrays) if arrays.iter().any(|a| &a.name == target) => {
                return Err(ValidationError::ArrayNameTaken(target.clone()).into());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not check for an existing {target}, continuing"),
        }

        let invocation = self.create_command(level, devices);
        let argv = self.runner.resolve(&invocation);
        info!(%level, devices = ?devices, target = %target, "starting RAID creation");

        Ok(spawn_session(
            argv,
            self.settings.session.clone(),
            Some(Box::new(move || drop(guard))),
        ))
    }

    async fn delete_array(&self, confirmation: &DeleteConfirmation) -> Result<DeleteReport, RaidError> {
        let array = confirmation.array();
        validate_array_name(array)?;
        let path = format!("/dev/{array}");
        info!(array, "deleting RAID array");

        let mut steps = Vec::new();
        let mut skipped = Vec::new();

        // Membership is only visible while the array is assembled.
        let members = self.collect_members(array, &mut steps);

        let stop = format!("stop {path}");
        match self.runner.run(&Invocation::elevated([MDADM, "--stop", path.as_str()])) {
            Ok(_) => {
                info!(array, "stopped RAID array");
                steps.push(StepOutcome::ok(stop));

                let remove = format!("remove {path}");
                match self.runner.run(&Invocation::elevated([MDADM, "--remove", path.as_str()])) {
                    Ok(_) => steps.push(StepOutcome::ok(remove)),
                    Err(e) => {
                        warn!(array, error = %e, "removing array device failed");
                        steps.push(StepOutcome::failed(remove, &e));
                    }
                }

                for device in &members {
                    let action = format!("zero superblock on {device}");
                    match self
                        .runner
                        .run(&Invocation::elevated([MDADM, "--zero-superblock", device.as_str()]))
                    {
                        Ok(_) => {
                            info!(device, "cleared superblock");
                            steps.push(StepOutcome::ok(action));
                        }
                        Err(e) => {
                            warn!(device, error = %e, "clearing superblock failed");
                            steps.push(StepOutcome::failed(action, &e));
                        }
                    }
                }
            }
            Err(e) => {
                // A running array's members must not lose their metadata
                warn!(array, error = %e, "stopping array failed, leaving members untouched");
                steps.push(StepOutcome::failed(stop, &e));
                skipped.push(format!("remove {path}"));
                skipped.extend(members.iter().map(|d| format!("zero superblock on {d}")));
            }
        }

        let arrays_after = self.list_arrays().await.unwrap_or_else(|e| {
            warn!(error = %e, "refresh after delete failed");
            Vec::new()
        });

        Ok(DeleteReport {
            array: array.to_string(),
            steps,
            skipped,
            arrays_after,
        })
    }

    async fn mount_array(&self, array: &str, mount_point: &str) -> Result<(), RaidError> {
        validate_array_name(array)?;
        if !mount_point.starts_with('/') {
            return Err(ValidationError::InvalidMountPoint(mount_point.to_string()).into());
        }

        self.runner
            .run(&Invocation::elevated(["mkdir", "-p", mount_point]))?;
        self.runner.run(&Invocation::elevated([
            "mount".to_string(),
            format!("/dev/{array}"),
            mount_point.to_string(),
        ]))?;

        info!(array, mount_point, "mounted RAID array");
        Ok(())
    }

    async fn unmount_array(&self, array: &str) -> Result<UnmountOutcome, RaidError> {
        validate_array_name(array)?;
        let path = format!("/dev/{array}");

        // findmnt exits 1 when the source is not mounted
        let lookup = self
            .runner
            .run(&Invocation::user(["findmnt", "-n", "-o", "TARGET", path.as_str()]).tolerant())?;

        let Some(target) = lookup
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
        else {
            info!(array, "not currently mounted");
            return Ok(UnmountOutcome::NotMounted);
        };

        self.runner
            .run(&Invocation::elevated(["umount", target.as_str()]))?;
        info!(array, target = %target, "unmounted RAID array");
        Ok(UnmountOutcome::Unmounted { target })
    }

    async fn create_filesystem(&self, array: &str, fs_type: FileSystemType) -> Result<(), RaidError> {
        validate_array_name(array)?;

        self.runner.run(&Invocation::elevated([
            fs_type.mkfs_program(),
            format!("/dev/{array}"),
        ]))?;

        info!(array, fs = fs_type.display_name(), "created filesystem");
        Ok(())
    }

    async fn add_drive(&self, array: &str, device: &str) -> Result<(), RaidError> {
        validate_array_name(array)?;
        validate_device_path(device)?;

        self.runner.run(&Invocation::elevated([
            MDADM.to_string(),
            "--add".to_string(),
            format!("/dev/{array}"),
            device.to_string(),
        ]))?;

        info!(array, device, "added drive to RAID array");
        Ok(())
    }

    fn has_privileges(&self) -> bool {
        utils::is_root()
    }

    fn creation_pending(&self) -> bool {
        self.creation.is_busy()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::runner::testing::SpyRunner;
    use crate::core::session::{SessionEvent, Verdict};

    fn manager(spy: &Arc<SpyRunner>) -> MdadmManager {
        let settings = ManagerSettings {
            target_array: "md0".to_string(),
            session: SessionConfig {
                prompt_timeout: Duration::from_secs(10),
                stop_grace: Duration::from_millis(500),
            },
        };
        MdadmManager::new(spy.clone(), settings)
    }

    fn devices(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn finish(handle: &mut SessionHandle) -> crate::core::session::SessionOutcome {
        while let Some(event) = handle.blocking_next_event() {
            if let SessionEvent::Finished(outcome) = event {
                return outcome;
            }
        }
        panic!("no verdict");
    }

    const MDSTAT_MD1: &str = "Personalities : [raid1]\nmd1 : active raid1 sdx[1] sdy[0]\n      1024 blocks super 1.2 [2/2] [UU]\nunused devices: <none>\n";

    #[test]
    fn test_create_rejects_short_device_lists_without_running_anything() {
        let pool = devices(&["/dev/sda", "/dev/sdb", "/dev/sdc"]);

        for level in RaidLevel::ALL {
            let spy = Arc::new(SpyRunner::new());
            let mgr = manager(&spy);
            let short = &pool[..level.minimum_devices() - 1];

            let err = mgr.create_array(level, short).err().expect("must be rejected");
            assert!(
                matches!(err, RaidError::Validation(ValidationError::InsufficientDevices { .. })),
                "{level}: {err}"
            );
            assert!(spy.calls().is_empty(), "{level} ran {:?}", spy.argvs());
            assert!(spy.resolved().is_empty(), "{level} built a session command");
            assert!(!mgr.creation_pending());
        }
    }

    #[test]
    fn test_create_rejects_duplicates_and_bad_paths() {
        let spy = Arc::new(SpyRunner::new());
        let mgr = manager(&spy);

        let err = mgr
            .create_array(RaidLevel::Raid1, &devices(&["/dev/sdb", "/dev/sdb"]))
            .err()
            .expect("duplicate");
        assert!(matches!(err, RaidError::Validation(ValidationError::DuplicateDevice(_))));

        let err = mgr
            .create_array(RaidLevel::Raid1, &devices(&["/dev/sdb", "sdc"]))
            .err()
            .expect("bad path");
        assert!(matches!(err, RaidError::Validation(ValidationError::InvalidDevicePath(_))));
        assert!(spy.calls().is_empty());
    }

    #[test]
    fn test_create_builds_exact_command_and_runs_session() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["cat", "/proc/mdstat"], 0, MDSTAT_MD1, "");
        spy.spawn_as(&["sh", "-c", "echo 'mdadm: array /dev/md0 started.'"]);
        let mgr = manager(&spy);

        let mut handle = mgr
            .create_array(RaidLevel::Raid5, &devices(&["/dev/sdd", "/dev/sdb", "/dev/sdc"]))
            .expect("valid request");
        assert!(mgr.creation_pending());

        let resolved = spy.resolved();
        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved[0].display(),
            "mdadm --create --verbose /dev/md0 --level=5 --raid-devices=3 /dev/sdd /dev/sdb /dev/sdc"
        );

        let outcome = finish(&mut handle);
        assert_eq!(outcome.verdict, Verdict::Success);
        assert_eq!(outcome.output_lines, vec!["mdadm: array /dev/md0 started."]);
        assert!(!mgr.creation_pending());
    }

    #[test]
    fn test_second_creation_rejected_while_first_pending() {
        let spy = Arc::new(SpyRunner::new());
        spy.spawn_as(&["sh", "-c", "printf 'Continue creating array? '; read a; echo $a"]);
        let mgr = manager(&spy);
        let pair = devices(&["/dev/sdb", "/dev/sdc"]);

        let mut first = mgr.create_array(RaidLevel::Raid1, &pair).expect("first");
        let err = mgr.create_array(RaidLevel::Raid1, &pair).err().expect("second");
        assert!(matches!(err, RaidError::Validation(ValidationError::CreationInProgress)));

        loop {
            if first.blocking_next_event() == Some(SessionEvent::ConfirmationNeeded) {
                break;
            }
        }
        first.decide(false);
        assert_eq!(finish(&mut first).verdict, Verdict::Aborted);

        assert!(mgr.create_array(RaidLevel::Raid1, &pair).is_ok());
    }

    #[test]
    fn test_create_refuses_existing_target_name() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(
            &["cat", "/proc/mdstat"],
            0,
            "md0 : active raid1 sdx[1] sdy[0]\n",
            "",
        );
        let mgr = manager(&spy);

        let err = mgr
            .create_array(RaidLevel::Raid1, &devices(&["/dev/sdb", "/dev/sdc"]))
            .err()
            .expect("taken");
        assert!(matches!(err, RaidError::Validation(ValidationError::ArrayNameTaken(_))));
        assert!(spy.resolved().is_empty());
        assert!(!mgr.creation_pending());
    }

    #[tokio::test]
    async fn test_list_block_devices_enumeration_error() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["lsblk"], 32, "", "lsblk: failed to access sysfs directory");
        let mgr = manager(&spy);

        let err = mgr.list_block_devices().await.unwrap_err();
        assert!(matches!(err, RaidError::Enumeration(_)));
        assert!(err.to_string().contains("Error refreshing devices"));
    }

    #[tokio::test]
    async fn test_list_arrays_marks_mounted() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["cat", "/proc/mdstat"], 0, MDSTAT_MD1, "");
        spy.respond(&["findmnt"], 0, "/dev/sda2 /\n/dev/md1 /srv/raid\n", "");
        let mgr = manager(&spy);

        let arrays = mgr.list_arrays().await.unwrap();
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].state, crate::core::ArrayState::Mounted);
        assert_eq!(arrays[0].mount_target.as_deref(), Some("/srv/raid"));
    }

    #[tokio::test]
    async fn test_delete_continues_past_one_failed_superblock_clear() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(
            &["mdadm", "--detail", "/dev/md0"],
            0,
            "    0  8  16  0  active sync   /dev/sdb\n    1  8  32  1  active sync   /dev/sdc\n    2  8  48  2  active sync   /dev/sdd\n",
            "",
        );
        spy.respond(
            &["mdadm", "--zero-superblock", "/dev/sdc"],
            1,
            "",
            "mdadm: Couldn't open /dev/sdc for write",
        );
        spy.respond(&["cat", "/proc/mdstat"], 0, "Personalities :\nunused devices: <none>\n", "");
        let mgr = manager(&spy);

        let confirmation = DeleteConfirmation::typed("md0", "md0").unwrap();
        let report = mgr.delete_array(&confirmation).await.unwrap();

        let zeroed: Vec<&StepOutcome> = report
            .steps
            .iter()
            .filter(|s| s.action.starts_with("zero superblock"))
            .collect();
        assert_eq!(zeroed.len(), 3);
        assert!(zeroed[0].error.is_none());
        assert!(zeroed[1].error.as_deref().unwrap().contains("Couldn't open /dev/sdc"));
        assert!(zeroed[2].error.is_none());
        assert!(!report.is_clean());
        assert!(report.summary().contains("/dev/sdc"));

        assert_eq!(
            spy.argvs(),
            vec![
                "mdadm --detail /dev/md0",
                "mdadm --stop /dev/md0",
                "mdadm --remove /dev/md0",
                "mdadm --zero-superblock /dev/sdb",
                "mdadm --zero-superblock /dev/sdc",
                "mdadm --zero-superblock /dev/sdd",
                "cat /proc/mdstat",
                "findmnt -rn -o SOURCE,TARGET",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_keeps_metadata_when_stop_fails() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(
            &["mdadm", "--detail"],
            0,
            "    0  8  16  0  active sync   /dev/sdb\n",
            "",
        );
        spy.respond(&["mdadm", "--stop"], 1, "", "mdadm: Cannot get exclusive access to /dev/md0");
        let mgr = manager(&spy);

        let report = mgr
            .delete_array(&DeleteConfirmation::typed("md0", "md0").unwrap())
            .await
            .unwrap();

        assert!(!spy.argvs().iter().any(|a| a.contains("--zero-superblock")));
        assert!(!spy.argvs().iter().any(|a| a.contains("--remove")));
        assert_eq!(report.failures().count(), 1);
        assert_eq!(
            report.skipped,
            vec!["remove /dev/md0".to_string(), "zero superblock on /dev/sdb".to_string()]
        );
        assert!(report.summary().contains("remaining steps skipped, array still running"));
        assert!(spy.argvs().contains(&"cat /proc/mdstat".to_string()));
    }

    #[tokio::test]
    async fn test_delete_falls_back_to_mdstat_members() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["mdadm", "--detail"], 0, "/dev/md1:\n   State : inactive\n", "");
        spy.respond(&["cat", "/proc/mdstat"], 0, MDSTAT_MD1, "");
        let mgr = manager(&spy);

        let report = mgr
            .delete_array(&DeleteConfirmation::typed("md1", "md1").unwrap())
            .await
            .unwrap();

        assert!(report.is_clean());
        let argvs = spy.argvs();
        assert!(argvs.contains(&"mdadm --zero-superblock /dev/sdx".to_string()));
        assert!(argvs.contains(&"mdadm --zero-superblock /dev/sdy".to_string()));
    }

    #[tokio::test]
    async fn test_unmount_when_not_mounted_is_informational() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["findmnt"], 1, "", "");
        let mgr = manager(&spy);

        let outcome = mgr.unmount_array("md0").await.unwrap();

        assert_eq!(outcome, UnmountOutcome::NotMounted);
        assert_eq!(spy.argvs(), vec!["findmnt -n -o TARGET /dev/md0"]);
    }

    #[tokio::test]
    async fn test_unmount_uses_exact_target() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["findmnt"], 0, "/srv/raid data\n", "");
        let mgr = manager(&spy);

        let outcome = mgr.unmount_array("md0").await.unwrap();

        assert_eq!(
            outcome,
            UnmountOutcome::Unmounted {
                target: "/srv/raid data".to_string()
            }
        );
        let last = spy.calls().pop().unwrap();
        assert_eq!(last.argv, vec!["umount", "/srv/raid data"]);
        assert_eq!(last.privilege, crate::core::runner::Privilege::Elevated);
    }

    #[tokio::test]
    async fn test_mount_creates_directory_then_mounts() {
        let spy = Arc::new(SpyRunner::new());
        let mgr = manager(&spy);

        mgr.mount_array("md0", "/mnt/raid").await.unwrap();
        mgr.mount_array("md0", "/mnt/raid").await.unwrap();

        assert_eq!(
            spy.argvs(),
            vec![
                "mkdir -p /mnt/raid",
                "mount /dev/md0 /mnt/raid",
                "mkdir -p /mnt/raid",
                "mount /dev/md0 /mnt/raid",
            ]
        );
    }

    #[tokio::test]
    async fn test_mount_aborts_when_directory_creation_fails() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["mkdir"], 1, "", "mkdir: cannot create directory: Read-only file system");
        let mgr = manager(&spy);

        let err = mgr.mount_array("md0", "/mnt/raid").await.unwrap_err();
        assert!(matches!(err, RaidError::Execution { .. }));
        assert_eq!(spy.argvs(), vec!["mkdir -p /mnt/raid"]);

        let err = mgr.mount_array("md0", "relative/dir").await.unwrap_err();
        assert!(matches!(err, RaidError::Validation(ValidationError::InvalidMountPoint(_))));
    }

    #[tokio::test]
    async fn test_create_filesystem_and_add_drive_commands() {
        let spy = Arc::new(SpyRunner::new());
        let mgr = manager(&spy);

        mgr.create_filesystem("md0", FileSystemType::Xfs).await.unwrap();
        mgr.add_drive("md0", "/dev/sdd").await.unwrap();

        assert_eq!(spy.argvs(), vec!["mkfs.xfs /dev/md0", "mdadm --add /dev/md0 /dev/sdd"]);
        assert!(spy
            .calls()
            .iter()
            .all(|c| c.privilege == crate::core::runner::Privilege::Elevated));
    }

    #[tokio::test]
    async fn test_format_failure_carries_exit_code_and_stderr() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["mkfs.ext4"], 1, "", "/dev/md0 is apparently in use by the system");
        let mgr = manager(&spy);

        match mgr.create_filesystem("md0", FileSystemType::Ext4).await {
            Err(RaidError::Execution {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(1));
                assert!(stderr.contains("in use"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
