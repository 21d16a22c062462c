use ratatui::{
    layout::{Alignment, Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Padding, Paragraph, Row, Table},
    Frame,
};

use crate::app::{App, Focus};
use crate::core::{AppState, ArrayState, DeviceStatus};
use crate::utils::array_size;

// Design tokens for consistent styling
const COLOR_PRIMARY: Color = Color::Rgb(99, 179, 237);    // Soft blue
const COLOR_SUCCESS: Color = Color::Rgb(104, 211, 145);   // Soft green
const COLOR_WARNING: Color = Color::Rgb(246, 173, 85);    // Soft orange
const COLOR_DANGER: Color = Color::Rgb(252, 129, 129);    // Soft red
const COLOR_MUTED: Color = Color::Rgb(113, 128, 150);     // Gray
const COLOR_BORDER: Color = Color::Rgb(74, 85, 104);      // Dark gray

/// Draw the main dashboard with device and array tables
pub fn draw_dashboard(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let inner_area = area.inner(Margin::new(2, 1));

    let chunks = Layout::vertical([
        Constraint::Length(5),      // Header
        Constraint::Percentage(40), // Devices
        Constraint::Min(6),         // Arrays
        Constraint::Length(5),      // Console
        Constraint::Length(3),      // Help bar
    ])
    .split(inner_area);

    draw_header(frame, chunks[0], app);
    draw_device_table(frame, chunks[1], app);
    draw_array_table(frame, chunks[2], app);
    draw_console(frame, chunks[3], app);
    draw_help_bar(frame, chunks[4], app);
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let (badge_text, badge_style) = if app.raid_manager.has_privileges() {
        (
            " ● ROOT ",
            Style::default()
                .fg(Color::Black)
                .bg(COLOR_SUCCESS)
                .add_modifier(Modifier::BOLD),
        )
    } else {
        (
            " ○ USER ",
            Style::default()
                .fg(Color::Black)
                .bg(COLOR_WARNING)
                .add_modifier(Modifier::BOLD),
        )
    };

    let title_line = Line::from(vec![
        Span::styled(
            "Raidie",
            Style::default()
                .fg(COLOR_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(badge_text, badge_style),
    ]);

    let subtitle = Line::from(vec![Span::styled(
        format!(
            "{} disks · {} arrays · {} marked",
            app.devices.len(),
            app.arrays.len(),
            app.marked_devices.len()
        ),
        Style::default().fg(COLOR_MUTED),
    )]);

    let header = Paragraph::new(vec![Line::default(), title_line, Line::default(), subtitle])
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER))
                .padding(Padding::horizontal(2)),
        );

    frame.render_widget(header, area);
}

fn header_row(titles: &[&str]) -> Row<'static> {
    let cells: Vec<Cell> = titles
        .iter()
        .map(|h| {
            Cell::from(format!(" {} ", h)).style(
                Style::default()
                    .fg(COLOR_MUTED)
                    .add_modifier(Modifier::BOLD),
            )
        })
        .collect();
    Row::new(cells).height(1).bottom_margin(1)
}

fn row_style(is_selected: bool, focused: bool, base_color: Color) -> Style {
    if is_selected && focused {
        Style::default()
            .fg(Color::Black)
            .bg(base_color)
            .add_modifier(Modifier::BOLD)
    } else if is_selected {
        Style::default().fg(base_color).add_modifier(Modifier::UNDERLINED)
    } else {
        Style::default().fg(base_color)
    }
}

fn table_block(title: &'static str, focused: bool) -> Block<'static> {
    let border_color = if focused { COLOR_PRIMARY } else { COLOR_BORDER };
    Block::default()
        .borders(Borders::ALL)
        .border_set(border::ROUNDED)
        .border_style(Style::default().fg(border_color))
        .title(title)
        .title_style(Style::default().fg(Color::White).bold())
        .padding(Padding::horizontal(1))
}

fn draw_device_table(frame: &mut Frame, area: Rect, app: &App) {
    let focused = app.focus == Focus::Devices;

    let rows: Vec<Row> = app
        .devices
        .iter()
        .enumerate()
        .map(|(i, device)| {
            let marked = app.is_marked(&device.path);
            let base_color = match device.status() {
                DeviceStatus::Mounted => COLOR_MUTED,
                DeviceStatus::Available if marked => COLOR_PRIMARY,
                DeviceStatus::Available => Color::White,
            };

            let status_icon = match device.status() {
                DeviceStatus::Mounted => "●",
                DeviceStatus::Available => "○",
            };

            Row::new(vec![
                Cell::from(if marked { " [x] " } else { " [ ] " }),
                Cell::from(format!(" {} ", device.path)),
                Cell::from(format!(" {} ", device.size)),
                Cell::from(format!(" {} ", device.mountpoint.as_deref().unwrap_or("—"))),
                Cell::from(format!(" {} {} ", status_icon, device.status())),
            ])
            .style(row_style(i == app.selected_device_index, focused, base_color))
        })
        .collect();

    let widths = [
        Constraint::Length(5),
        Constraint::Min(16),
        Constraint::Length(10),
        Constraint::Percentage(30),
        Constraint::Length(14),
    ];

    let table = Table::new(rows, widths)
        .header(header_row(&["", "DEVICE", "SIZE", "MOUNT POINT", "STATUS"]))
        .block(table_block(" Disks ", focused))
        .column_spacing(1);

    frame.render_widget(table, area);
}

fn draw_array_table(frame: &mut Frame, area: Rect, app: &App) {
    let focused = app.focus == Focus::Arrays;

    let mut rows: Vec<Row> = app
        .arrays
        .iter()
        .enumerate()
        .map(|(i, array)| {
            let base_color = match array.state {
                ArrayState::Stopped => COLOR_MUTED,
                _ if array.degraded => COLOR_DANGER,
                ArrayState::Mounted => COLOR_SUCCESS,
                _ => Color::White,
            };

            let level = array
                .level
                .map(|l| l.to_string())
                .unwrap_or_else(|| "—".to_string());
            let members: Vec<&str> = array
                .member_devices
                .iter()
                .map(|m| m.trim_start_matches("/dev/"))
                .collect();
            let state = if array.degraded {
                format!("{} (degraded)", array.state)
            } else {
                array.state.to_string()
            };

            Row::new(vec![
                Cell::from(format!(" {} ", array.name)),
                Cell::from(format!(" {} ", level)),
                Cell::from(format!(" {} ", array_size(array.size_bytes))),
                Cell::from(format!(" {} ", members.join(", "))),
                Cell::from(format!(" {} ", array.mount_target.as_deref().unwrap_or("—"))),
                Cell::from(format!(" {} ", state)),
            ])
            .style(row_style(i == app.selected_array_index, focused, base_color))
        })
        .collect();

    if let Some(session) = &app.session {
        rows.push(
            Row::new(vec![
                Cell::from(" … "),
                Cell::from(""),
                Cell::from(""),
                Cell::from(format!(" {} ", session.command())),
                Cell::from(""),
                Cell::from(format!(" {} ", ArrayState::Creating)),
            ])
            .style(Style::default().fg(COLOR_WARNING)),
        );
    }

    let widths = [
        Constraint::Length(9),
        Constraint::Length(8),
        Constraint::Length(11),
        Constraint::Min(16),
        Constraint::Percentage(20),
        Constraint::Length(20),
    ];

    let table = Table::new(rows, widths)
        .header(header_row(&["ARRAY", "LEVEL", "SIZE", "MEMBERS", "MOUNTED AT", "STATE"]))
        .block(table_block(" Arrays ", focused))
        .column_spacing(1);

    frame.render_widget(table, area);
}

fn draw_console(frame: &mut Frame, area: Rect, app: &App) {
    let visible = area.height.saturating_sub(2) as usize;
    let start = app.console.len().saturating_sub(visible);
    let lines: Vec<Line> = app.console[start..]
        .iter()
        .map(|l| Line::from(Span::styled(l.clone(), Style::default().fg(COLOR_MUTED))))
        .collect();

    let console = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_set(border::ROUNDED)
            .border_style(Style::default().fg(COLOR_BORDER))
            .title(" Output "),
    );

    frame.render_widget(console, area);
}

fn draw_help_bar(frame: &mut Frame, area: Rect, app: &App) {
    let bindings = match (&app.state, app.focus) {
        (AppState::Idle, Focus::Devices) => vec![
            ("↑↓", "Navigate"),
            ("Space", "Mark"),
            ("c", "Create"),
            ("Tab", "Arrays"),
            ("r", "Refresh"),
            ("q", "Quit"),
        ],
        (AppState::Idle, Focus::Arrays) => vec![
            ("m", "Mount"),
            ("u", "Unmount"),
            ("f", "Format"),
            ("a", "Add"),
            ("d", "Delete"),
            ("Tab", "Disks"),
            ("q", "Quit"),
        ],
        (AppState::Creating, _) if app.awaiting_decision => {
            vec![("y", "Continue"), ("n", "Abort")]
        }
        (AppState::Creating, _) => vec![("Esc", "Cancel")],
        _ => vec![("Esc", "Back"), ("q", "Quit")],
    };

    let mut spans = Vec::new();
    for (i, (key, action)) in bindings.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled("  │  ", Style::default().fg(COLOR_BORDER)));
        }
        spans.push(Span::styled(
            format!(" {} ", key),
            Style::default()
                .fg(Color::White)
                .bg(COLOR_BORDER)
                .add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(
            format!(" {}", action),
            Style::default().fg(COLOR_MUTED),
        ));
    }

    let help = Paragraph::new(Line::from(spans))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_set(border::ROUNDED)
                .border_style(Style::default().fg(COLOR_BORDER)),
        );

    frame.render_widget(help, area);
}
