pub mod dashboard;
pub mod prompt;

use ratatui::Frame;

use crate::app::App;
use crate::core::AppState;

/// Main draw function that dispatches to appropriate view
pub fn draw(frame: &mut Frame, app: &App) {
    dashboard::draw_dashboard(frame, app);

    match &app.state {
        AppState::Idle => {}
        AppState::LevelMenu => {
            let items: Vec<String> = app
                .level_options
                .iter()
                .map(|level| format!("{}  (min {} devices)", level.display_name(), level.minimum_devices()))
                .collect();
            let title = format!(" RAID Level for {} device(s) ", app.marked_devices.len());
            prompt::draw_option_menu(frame, &title, &items, app.selected_level_index);
        }
        AppState::FormattingMenu => {
            let items: Vec<String> = app
                .fs_options
                .iter()
                .map(|fs| fs.display_name().to_string())
                .collect();
            prompt::draw_option_menu(frame, " Select Filesystem ", &items, app.selected_fs_index);
        }
        AppState::MountPrompt => {
            prompt::draw_text_prompt(frame, " Mount Point ", "Enter mount point:", &app.input_buffer);
        }
        AppState::AddDrivePrompt => {
            prompt::draw_text_prompt(
                frame,
                " Add Drive ",
                "Enter the path of the new drive (e.g., /dev/sdd):",
                &app.input_buffer,
            );
        }
        AppState::ConfirmDelete(array) => {
            prompt::draw_confirm_delete(frame, array, &app.input_buffer);
        }
        AppState::Creating => {
            prompt::draw_creation(frame, app);
        }
        AppState::InProgress(msg) => {
            prompt::draw_status_message(frame, app, msg, prompt::MessageType::Progress);
        }
        AppState::Info(msg) => {
            prompt::draw_status_message(frame, app, msg, prompt::MessageType::Info);
        }
        AppState::Error(msg) => {
            prompt::draw_status_message(frame, app, msg, prompt::MessageType::Error);
        }
        AppState::Success(msg) => {
            prompt::draw_status_message(frame, app, msg, prompt::MessageType::Success);
        }
    }
}
