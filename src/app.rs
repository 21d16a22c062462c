use std::sync::Arc;

use tracing::{info, warn};

use crate::core::raid_ops::{DeleteConfirmation, RaidManager, UnmountOutcome};
use crate::core::session::{SessionEvent, SessionHandle};
use crate::core::{AppState, ArrayHandle, BlockDevice, FileSystemType, RaidLevel};

const CONSOLE_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Devices,
    Arrays,
}

/// Outcome of a background operation, delivered to the interface loop
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub state: AppState,
    pub refresh: bool,
}

/// Main application state
pub struct App {
    pub devices: Vec<BlockDevice>,
    pub arrays: Vec<ArrayHandle>,
    pub focus: Focus,
    pub selected_device_index: usize,
    pub selected_array_index: usize,
    /// Devices picked for the next array, in the order they were picked
    pub marked_devices: Vec<String>,
    pub state: AppState,
    pub input_buffer: String,
    pub raid_manager: Arc<dyn RaidManager>,
    pub level_options: Vec<RaidLevel>,
    pub selected_level_index: usize,
    pub fs_options: Vec<FileSystemType>,
    pub selected_fs_index: usize,
    pub session: Option<SessionHandle>,
    pub session_log: Vec<String>,
    pub awaiting_decision: bool,
    /// Rolling list of notices and warnings shown under the tables
    pub console: Vec<String>,
    pub should_quit: bool,
    pub tick: u64,
    pub operation_tx: tokio::sync::mpsc::UnboundedSender<OperationResult>,
    pub operation_rx: tokio::sync::mpsc::UnboundedReceiver<OperationResult>,
}

impl App {
    pub fn new(raid_manager: Arc<dyn RaidManager>) -> Self {
        let (operation_tx, operation_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            devices: Vec::new(),
            arrays: Vec::new(),
            focus: Focus::Devices,
            selected_device_index: 0,
            selected_array_index: 0,
            marked_devices: Vec::new(),
            state: AppState::Idle,
            input_buffer: String::new(),
            raid_manager,
            level_options: RaidLevel::ALL.to_vec(),
            selected_level_index: 1,
            fs_options: FileSystemType::ALL.to_vec(),
            selected_fs_index: 0,
            session: None,
            session_log: Vec::new(),
            awaiting_decision: false,
            console: Vec::new(),
            should_quit: false,
            tick: 0,
            operation_tx,
            operation_rx,
        }
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.console.push(line.into());
        if self.console.len() > CONSOLE_LIMIT {
            let excess = self.console.len() - CONSOLE_LIMIT;
            self.console.drain(..excess);
        }
    }

    /// Re-reads devices and arrays. Enumeration failures leave an empty list and a notice.
    pub async fn refresh(&mut self) {
        self.refresh_devices().await;
        self.refresh_arrays().await;
    }

    pub async fn refresh_devices(&mut self) {
        match self.raid_manager.list_block_devices().await {
            Ok(devices) => self.devices = devices,
            Err(e) => {
                warn!(error = %e, "device enumeration failed");
                self.devices.clear();
                self.log(e.to_string());
            }
        }
        self.marked_devices
            .retain(|path| self.devices.iter().any(|d| &d.path == path));
        clamp(&mut self.selected_device_index, self.devices.len());
    }

    pub async fn refresh_arrays(&mut self) {
        match self.raid_manager.list_arrays().await {
            Ok(arrays) => self.arrays = arrays,
            Err(e) => {
                warn!(error = %e, "array enumeration failed");
                self.arrays.clear();
                self.log(e.to_string());
            }
        }
        clamp(&mut self.selected_array_index, self.arrays.len());
    }

    pub fn toggle_focus(&mut self) {
        self.focus = match self.focus {
            Focus::Devices => Focus::Arrays,
            Focus::Arrays => Focus::Devices,
        };
    }

    pub fn select_next(&mut self) {
        let (index, len) = self.focused_cursor();
        if len > 0 {
            *index = (*index + 1) % len;
        }
    }

    pub fn select_previous(&mut self) {
        let (index, len) = self.focused_cursor();
        if len > 0 {
            *index = if *index == 0 { len - 1 } else { *index - 1 };
        }
    }

    fn focused_cursor(&mut self) -> (&mut usize, usize) {
        match self.focus {
            Focus::Devices => (&mut self.selected_device_index, self.devices.len()),
            Focus::Arrays => (&mut self.selected_array_index, self.arrays.len()),
        }
    }

    pub fn select_next_option(&mut self) {
        let (index, len) = self.menu_cursor();
        if len > 0 {
            *index = (*index + 1) % len;
        }
    }

    pub fn select_previous_option(&mut self) {
        let (index, len) = self.menu_cursor();
        if len > 0 {
            *index = if *index == 0 { len - 1 } else { *index - 1 };
        }
    }

    fn menu_cursor(&mut self) -> (&mut usize, usize) {
        match self.state {
            AppState::LevelMenu => (&mut self.selected_level_index, self.level_options.len()),
            _ => (&mut self.selected_fs_index, self.fs_options.len()),
        }
    }

    pub fn selected_device(&self) -> Option<&BlockDevice> {
        self.devices.get(self.selected_device_index)
    }

    pub fn selected_array(&self) -> Option<&ArrayHandle> {
        self.arrays.get(self.selected_array_index)
    }

    pub fn selected_level(&self) -> Option<RaidLevel> {
        self.level_options.get(self.selected_level_index).copied()
    }

    pub fn selected_fs(&self) -> Option<FileSystemType> {
        self.fs_options.get(self.selected_fs_index).copied()
    }

    pub fn is_marked(&self, path: &str) -> bool {
        self.marked_devices.iter().any(|p| p == path)
    }

    pub fn toggle_mark(&mut self) {
        let Some(path) = self.selected_device().map(|d| d.path.clone()) else {
            return;
        };
        if let Some(pos) = self.marked_devices.iter().position(|p| *p == path) {
            self.marked_devices.remove(pos);
        } else {
            self.marked_devices.push(path);
        }
    }

    pub fn enter_level_menu(&mut self) {
        if self.session.is_some() || self.raid_manager.creation_pending() {
            self.state = AppState::Error("A RAID creation is already running".to_string());
            return;
        }
        self.state = AppState::LevelMenu;
    }

    /// Array-targeted dialogs need an array under the cursor
    fn enter_array_dialog(&mut self, state: AppState) {
        if self.selected_array().is_none() {
            self.state = AppState::Error("Please select a RAID array first.".to_string());
            return;
        }
        self.input_buffer.clear();
        self.selected_fs_index = 0;
        self.state = state;
    }

    pub fn enter_format_menu(&mut self) {
        self.enter_array_dialog(AppState::FormattingMenu);
    }

    pub fn enter_mount_prompt(&mut self) {
        self.enter_array_dialog(AppState::MountPrompt);
    }

    pub fn enter_add_drive_prompt(&mut self) {
        self.enter_array_dialog(AppState::AddDrivePrompt);
    }

    pub fn enter_delete_confirm(&mut self) {
        if let Some(array) = self.selected_array() {
            let name = array.name.clone();
            self.enter_array_dialog(AppState::ConfirmDelete(name));
        } else {
            self.enter_array_dialog(AppState::Idle);
        }
    }

    pub fn cancel(&mut self) {
        self.state = if self.session.is_some() {
            AppState::Creating
        } else {
            AppState::Idle
        };
        self.input_buffer.clear();
    }

    pub fn start_creation(&mut self) {
        let Some(level) = self.selected_level() else {
            return;
        };

        match self.raid_manager.create_array(level, &self.marked_devices) {
            Ok(handle) => {
                self.log(format!("Running: {}", handle.command()));
                self.session_log.clear();
                self.awaiting_decision = false;
                self.session = Some(handle);
                self.state = AppState::Creating;
            }
            Err(e) => {
                self.state = AppState::Error(e.to_string());
            }
        }
    }

    /// Drains pending session events. Returns true when the array list should be re-read.
    pub fn poll_session(&mut self) -> bool {
        let mut refresh = false;
        while let Some(event) = self.session.as_mut().and_then(SessionHandle::try_next_event) {
            match event {
                SessionEvent::Progress(line) => self.session_log.push(line),
                SessionEvent::ConfirmationNeeded => self.awaiting_decision = true,
                SessionEvent::Finished(outcome) => {
                    self.session = None;
                    self.awaiting_decision = false;
                    self.log(outcome.message.clone());
                    self.state = if let Some(err) = outcome.error() {
                        refresh = true;
                        AppState::Error(err.to_string())
                    } else if outcome.succeeded() {
                        self.marked_devices.clear();
                        refresh = true;
                        AppState::Success(outcome.message)
                    } else {
                        AppState::Info(outcome.message)
                    };
                }
            }
        }
        refresh
    }

    pub fn answer_confirmation(&mut self, proceed: bool) {
        if let Some(session) = &self.session {
            if session.decide(proceed) {
                self.awaiting_decision = false;
            }
        }
    }

    pub fn cancel_creation(&mut self) {
        if let Some(session) = &self.session {
            session.cancel();
            self.awaiting_decision = false;
        }
    }

    fn spawn_operation<F>(&mut self, progress: String, operation: F)
    where
        F: Future<Output = OperationResult> + Send + 'static,
    {
        self.state = AppState::InProgress(progress);
        let tx = self.operation_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(operation.await);
        });
    }

    pub fn mount_selected(&mut self) {
        let Some(array) = self.selected_array().map(|a| a.name.clone()) else {
            return;
        };
        let mount_point = self.input_buffer.trim().to_string();
        if mount_point.is_empty() {
            return;
        }

        let manager = self.raid_manager.clone();
        self.spawn_operation(format!("Mounting {array}..."), async move {
            match manager.mount_array(&array, &mount_point).await {
                Ok(()) => OperationResult {
                    state: AppState::Success(format!("Successfully mounted {array} to {mount_point}")),
                    refresh: true,
                },
                Err(e) => failed(e),
            }
        });
    }

    pub fn unmount_selected(&mut self) {
        let Some(array) = self.selected_array().map(|a| a.name.clone()) else {
            self.state = AppState::Error("Please select a RAID array to unmount.".to_string());
            return;
        };

        let manager = self.raid_manager.clone();
        self.spawn_operation(format!("Unmounting {array}..."), async move {
            match manager.unmount_array(&array).await {
                Ok(UnmountOutcome::Unmounted { target }) => OperationResult {
                    state: AppState::Success(format!("Successfully unmounted {array} from {target}")),
                    refresh: true,
                },
                Ok(UnmountOutcome::NotMounted) => OperationResult {
                    state: AppState::Info(format!("{array} is not currently mounted.")),
                    refresh: false,
                },
                Err(e) => failed(e),
            }
        });
    }

    pub fn format_selected(&mut self) {
        let (Some(array), Some(fs_type)) = (
            self.selected_array().map(|a| a.name.clone()),
            self.selected_fs(),
        ) else {
            return;
        };

        let manager = self.raid_manager.clone();
        self.spawn_operation(
            format!("Creating {} filesystem on {array}...", fs_type.display_name()),
            async move {
                match manager.create_filesystem(&array, fs_type).await {
                    Ok(()) => OperationResult {
                        state: AppState::Success(format!(
                            "Successfully created {} filesystem on {array}",
                            fs_type.display_name()
                        )),
                        refresh: false,
                    },
                    Err(e) => failed(e),
                }
            },
        );
    }

    pub fn add_drive_selected(&mut self) {
        let Some(array) = self.selected_array().map(|a| a.name.clone()) else {
            return;
        };
        let device = self.input_buffer.trim().to_string();
        if device.is_empty() {
            return;
        }

        let manager = self.raid_manager.clone();
        self.spawn_operation(format!("Adding {device} to {array}..."), async move {
            match manager.add_drive(&array, &device).await {
                Ok(()) => OperationResult {
                    state: AppState::Success(format!("Successfully added {device} to {array}")),
                    refresh: true,
                },
                Err(e) => failed(e),
            }
        });
    }

    pub fn delete_selected(&mut self) {
        let AppState::ConfirmDelete(array) = self.state.clone() else {
            return;
        };

        let confirmation = match DeleteConfirmation::typed(&array, &self.input_buffer) {
            Ok(confirmation) => confirmation,
            Err(e) => {
                self.state = AppState::Error(crate::core::RaidError::from(e).to_string());
                return;
            }
        };

        info!(array = %array, "delete confirmed");
        let manager = self.raid_manager.clone();
        self.spawn_operation(format!("Deleting {array}..."), async move {
            match manager.delete_array(&confirmation).await {
                Ok(report) if report.is_clean() => OperationResult {
                    state: AppState::Success(report.summary()),
                    refresh: true,
                },
                Ok(report) => OperationResult {
                    state: AppState::Error(report.summary()),
                    refresh: true,
                },
                Err(e) => OperationResult {
                    refresh: true,
                    ..failed(e)
                },
            }
        });
    }
}

fn failed(e: crate::core::RaidError) -> OperationResult {
    OperationResult {
        state: AppState::Error(e.to_string()),
        refresh: false,
    }
}

fn clamp(index: &mut usize, len: usize) {
    if *index >= len {
        *index = len.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::runner::testing::SpyRunner;
    use crate::core::session::SessionConfig;
    use crate::platform::linux::{ManagerSettings, MdadmManager};

    const LSBLK: &str = "sda 931.5G disk /\nsdb 1.8T disk\nsdc 1.8T disk\n";

    fn app_with(spy: &Arc<SpyRunner>) -> App {
        let settings = ManagerSettings {
            target_array: "md0".to_string(),
            session: SessionConfig {
                prompt_timeout: Duration::from_secs(10),
                stop_grace: Duration::from_millis(500),
            },
        };
        App::new(Arc::new(MdadmManager::new(spy.clone(), settings)))
    }

    #[tokio::test]
    async fn test_enumeration_failure_leaves_usable_empty_list() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["lsblk"], 1, "", "lsblk: permission denied");
        spy.respond(&["cat", "/proc/mdstat"], 1, "", "cat: /proc/mdstat: No such file");
        let mut app = app_with(&spy);

        app.refresh().await;

        assert!(app.devices.is_empty());
        assert!(app.arrays.is_empty());
        assert_eq!(app.state, AppState::Idle);
        assert_eq!(app.console.len(), 2);
        app.select_next();
        assert_eq!(app.selected_device_index, 0);
    }

    #[tokio::test]
    async fn test_marks_keep_pick_order() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["lsblk"], 0, LSBLK, "");
        let mut app = app_with(&spy);
        app.refresh_devices().await;

        app.selected_device_index = 2;
        app.toggle_mark();
        app.selected_device_index = 1;
        app.toggle_mark();
        assert_eq!(app.marked_devices, vec!["/dev/sdc", "/dev/sdb"]);

        app.toggle_mark();
        assert_eq!(app.marked_devices, vec!["/dev/sdc"]);
    }

    #[tokio::test]
    async fn test_short_selection_shows_rejection() {
        let spy = Arc::new(SpyRunner::new());
        spy.respond(&["lsblk"], 0, LSBLK, "");
        let mut app = app_with(&spy);
        app.refresh_devices().await;
        app.selected_device_index = 1;
        app.toggle_mark();

        app.state = AppState::LevelMenu;
        app.selected_level_index = 2; // raid5
        app.start_creation();

        match &app.state {
            AppState::Error(msg) => assert!(msg.starts_with("Rejected before attempting")),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(app.session.is_none());
    }

    #[test]
    fn test_delete_needs_typed_name() {
        let spy = Arc::new(SpyRunner::new());
        let mut app = app_with(&spy);
        app.state = AppState::ConfirmDelete("md0".to_string());
        app.input_buffer = "md9".to_string();

        app.delete_selected();

        assert!(matches!(app.state, AppState::Error(_)));
        assert!(spy.calls().is_empty());
    }

    fn finish_session(app: &mut App) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while app.session.is_some() && std::time::Instant::now() < deadline {
            if app.poll_session() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_cancel_after_yes_shows_outcome_unknown() {
        let spy = Arc::new(SpyRunner::new());
        let mut app = app_with(&spy);
        app.state = AppState::Creating;
        app.session = Some(crate::core::session::spawn_session(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf 'Continue creating array? '; read answer; echo writing-superblocks; exec sleep 30".to_string(),
            ],
            SessionConfig {
                prompt_timeout: Duration::from_secs(10),
                stop_grace: Duration::from_millis(500),
            },
            None,
        ));

        while !app.session_log.iter().any(|l| l == "writing-superblocks") {
            app.poll_session();
            if app.awaiting_decision {
                app.answer_confirmation(true);
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        app.cancel_creation();

        assert!(finish_session(&mut app));
        match &app.state {
            AppState::Error(msg) => assert!(msg.starts_with("Attempted, outcome unknown")),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_no_at_prompt_is_informational() {
        let spy = Arc::new(SpyRunner::new());
        let mut app = app_with(&spy);
        app.state = AppState::Creating;
        app.session = Some(crate::core::session::spawn_session(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "printf 'Continue creating array? '; read answer".to_string(),
            ],
            SessionConfig {
                prompt_timeout: Duration::from_secs(10),
                stop_grace: Duration::from_millis(500),
            },
            None,
        ));

        while !app.awaiting_decision {
            app.poll_session();
            std::thread::sleep(Duration::from_millis(20));
        }
        app.answer_confirmation(false);
        finish_session(&mut app);

        assert_eq!(app.state, AppState::Info("RAID creation aborted by user.".to_string()));
    }
}
