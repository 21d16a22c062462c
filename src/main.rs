mod app;
mod cli;
mod config;
mod core;
mod logging;
mod platform;
mod ui;
mod utils;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use tracing::{error, info};

use crate::app::App;
use crate::cli::Cli;
use crate::config::Config;
use crate::core::AppState;
use crate::core::raid_ops::RaidManager;
use crate::core::runner::Elevation;
use crate::platform::get_raid_manager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config)?;

    // Re-exec happens before anything else touches the terminal or the log files.
    if config.elevation == Elevation::Process {
        utils::escalate_if_needed()
            .map_err(|e| anyhow::anyhow!("Failed to acquire root privileges: {e}"))?;
    }

    logging::init(&config, cli.command.is_some());
    info!(version = env!("CARGO_PKG_VERSION"), target_array = %config.target_array, "raidie starting");

    // The full-screen interface owns the terminal, so sudo/doas must not prompt on it
    let raid_manager = get_raid_manager(&config, cli.command.is_some());

    match cli.command {
        Some(command) => cli::run(command, raid_manager).await,
        None => run_tui(raid_manager, &config).await,
    }
}

async fn run_tui(raid_manager: Arc<dyn RaidManager>, config: &Config) -> anyhow::Result<()> {
    // Safety check: Validate terminal size BEFORE entering raw mode or alternate screen.
    let (cols, rows) = crossterm::terminal::size()?;
    if cols == 0 || rows == 0 || cols > 1000 || rows > 1000 {
        anyhow::bail!(
            "Invalid terminal size detected ({}x{}). Please ensure you're running in a valid terminal.",
            cols,
            rows
        );
    }

    // Ask for the password now, while the terminal is still in cooked mode
    if !utils::is_root() {
        if let Some(argv) = config.elevation.credential_check() {
            info!(command = %argv.join(" "), "priming elevation credentials");
            let Some((program, args)) = argv.split_first() else {
                anyhow::bail!("empty elevation command");
            };
            let status = std::process::Command::new(program)
                .args(args)
                .status()
                .map_err(|e| anyhow::anyhow!("Failed to run `{}`: {e}", argv.join(" ")))?;
            if !status.success() {
                anyhow::bail!(
                    "`{}` failed; raidie needs elevated rights for array operations",
                    argv.join(" ")
                );
            }
        }
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(raid_manager);

    // Without an elevation front-end every privileged command runs as the current user
    if !app.raid_manager.has_privileges() && config.elevation == Elevation::None {
        app.state = AppState::Error(
            "Warning: Not running as root and elevation is disabled. Array operations will fail."
                .to_string(),
        );
    }

    app.refresh().await;

    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(e) = result {
        error!(error = %e, "interface loop failed");
        eprintln!("Error: {e}");
    }

    Ok(())
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> anyhow::Result<()> {
    loop {
        app.tick = app.tick.wrapping_add(1);

        // Check for operation results
        let mut refresh = false;
        while let Ok(result) = app.operation_rx.try_recv() {
            app.state = result.state;
            refresh |= result.refresh;
        }
        refresh |= app.poll_session();
        if refresh {
            app.refresh().await;
        }

        terminal.draw(|f| ui::draw(f, app))?;

        // Poll for events with timeout for tick
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                match &app.state {
                    AppState::Idle => {
                        handle_idle_input(app, key.code).await;
                    }
                    AppState::LevelMenu | AppState::FormattingMenu => {
                        handle_menu_input(app, key.code);
                    }
                    AppState::MountPrompt | AppState::AddDrivePrompt | AppState::ConfirmDelete(_) => {
                        handle_text_input(app, key.code);
                    }
                    AppState::Creating => {
                        handle_creating_input(app, key.code);
                    }
                    AppState::InProgress(_) => {
                        // Block input during operations
                    }
                    AppState::Info(_) | AppState::Error(_) | AppState::Success(_) => {
                        handle_message_input(app, key.code);
                    }
                }

                if app.should_quit {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_idle_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('q') => app.should_quit = true,
        KeyCode::Up => app.select_previous(),
        KeyCode::Down => app.select_next(),
        KeyCode::Tab => app.toggle_focus(),
        KeyCode::Char(' ') => app.toggle_mark(),
        KeyCode::Char('c') => app.enter_level_menu(),
        KeyCode::Char('m') => app.enter_mount_prompt(),
        KeyCode::Char('u') => app.unmount_selected(),
        KeyCode::Char('f') => app.enter_format_menu(),
        KeyCode::Char('a') => app.enter_add_drive_prompt(),
        KeyCode::Char('d') => app.enter_delete_confirm(),
        KeyCode::Char('r') => app.refresh().await,
        _ => {}
    }
}

fn handle_menu_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Esc => app.cancel(),
        KeyCode::Up => app.select_previous_option(),
        KeyCode::Down => app.select_next_option(),
        KeyCode::Enter => match app.state {
            AppState::LevelMenu => app.start_creation(),
            AppState::FormattingMenu => app.format_selected(),
            _ => {}
        },
        _ => {}
    }
}

fn handle_text_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Esc => app.cancel(),
        KeyCode::Enter => match app.state {
            AppState::MountPrompt => app.mount_selected(),
            AppState::AddDrivePrompt => app.add_drive_selected(),
            AppState::ConfirmDelete(_) => app.delete_selected(),
            _ => {}
        },
        KeyCode::Backspace => {
            app.input_buffer.pop();
        }
        KeyCode::Char(c) => {
            app.input_buffer.push(c);
        }
        _ => {}
    }
}

fn handle_creating_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('y') | KeyCode::Char('Y') if app.awaiting_decision => {
            app.answer_confirmation(true)
        }
        KeyCode::Char('n') | KeyCode::Char('N') if app.awaiting_decision => {
            app.answer_confirmation(false)
        }
        KeyCode::Esc => app.cancel_creation(),
        _ => {}
    }
}

fn handle_message_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('q') if app.session.is_none() => app.should_quit = true,
        KeyCode::Esc | KeyCode::Enter => app.cancel(),
        _ => {}
    }
}
