use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use crate::app::App;

pub enum MessageType {
    Progress,
    Info,
    Success,
    Error,
}

/// Draw a single-choice menu (RAID level, filesystem)
pub fn draw_option_menu(frame: &mut Frame, title: &str, options: &[String], selected: usize) {
    let area = centered_rect(50, 40, frame.area());

    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let items: Vec<ListItem> = options
        .iter()
        .enumerate()
        .map(|(i, option)| {
            let style = if i == selected {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD | Modifier::REVERSED)
            } else {
                Style::default()
            };
            ListItem::new(option.clone()).style(style)
        })
        .collect();

    frame.render_widget(List::new(items), inner);
}

/// Draw a free-text input dialog
pub fn draw_text_prompt(frame: &mut Frame, title: &str, label: &str, input: &str) {
    let area = centered_rect(60, 25, frame.area());
    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([Constraint::Length(2), Constraint::Length(3), Constraint::Min(0)]).split(inner);

    frame.render_widget(
        Paragraph::new(label.to_string()).style(Style::default().fg(Color::Yellow)),
        chunks[0],
    );
    frame.render_widget(
        Paragraph::new(input.to_string()).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Input ")
                .style(Style::default().fg(Color::White)),
        ),
        chunks[1],
    );
}

/// Draw confirmation dialog for array deletion
pub fn draw_confirm_delete(frame: &mut Frame, array: &str, input: &str) {
    let area = centered_rect(60, 40, frame.area());

    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" ⚠️  CONFIRM DELETE ")
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Red));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([
        Constraint::Length(3),
        Constraint::Length(2),
        Constraint::Length(3),
        Constraint::Min(1),
    ])
    .split(inner);

    let warning = Paragraph::new(Line::from(vec![
        Span::styled(
            "WARNING: ",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            "This stops /dev/{array} and erases the RAID metadata on every member device!"
        )),
    ]))
    .wrap(Wrap { trim: true });
    frame.render_widget(warning, chunks[0]);

    let instruction = Paragraph::new(format!("Type '{}' to confirm:", array))
        .style(Style::default().fg(Color::Yellow));
    frame.render_widget(instruction, chunks[1]);

    let input_display = Paragraph::new(input.to_string()).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Input ")
            .style(Style::default().fg(Color::White)),
    );
    frame.render_widget(input_display, chunks[2]);
}

/// Draw the live log of a running creation, with the yes/no question when mdadm asks one
pub fn draw_creation(frame: &mut Frame, app: &App) {
    let area = centered_rect(80, 70, frame.area());
    frame.render_widget(Clear, area);

    let block = Block::default()
        .title(" Creating RAID array ")
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([Constraint::Length(2), Constraint::Min(3), Constraint::Length(3)]).split(inner);

    let command = app
        .session
        .as_ref()
        .map(|s| s.command().to_string())
        .unwrap_or_default();
    frame.render_widget(
        Paragraph::new(format!("$ {command}"))
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: false }),
        chunks[0],
    );

    let visible = chunks[1].height as usize;
    let start = app.session_log.len().saturating_sub(visible);
    let lines: Vec<Line> = app.session_log[start..]
        .iter()
        .map(|l| Line::from(l.clone()))
        .collect();
    frame.render_widget(
        Paragraph::new(lines).style(Style::default().fg(Color::White)),
        chunks[1],
    );

    let footer = if app.awaiting_decision {
        Paragraph::new(Line::from(vec![
            Span::styled(
                "Confirmation Needed: ",
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
            Span::raw("mdadm asks to continue creating the array. [y] continue  [n] abort"),
        ]))
    } else {
        let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let spinner = spinner_frames[app.tick as usize % spinner_frames.len()];
        Paragraph::new(format!("{spinner} working... (Esc to cancel)"))
            .style(Style::default().fg(Color::Cyan))
    };
    frame.render_widget(
        footer.block(Block::default().borders(Borders::TOP)),
        chunks[2],
    );
}

/// Draw status/info messages
pub fn draw_status_message(frame: &mut Frame, app: &App, message: &str, msg_type: MessageType) {
    let area = centered_rect(60, 40, frame.area());

    frame.render_widget(Clear, area);

    let (title, color) = match msg_type {
        MessageType::Progress => (" Progress ", Color::Cyan),
        MessageType::Info => (" Info ", Color::Yellow),
        MessageType::Success => (" Success ", Color::Green),
        MessageType::Error => (" Error ", Color::Red),
    };

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .style(Style::default().fg(color));

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(inner);

    let in_progress = matches!(msg_type, MessageType::Progress);
    let text = if in_progress {
        let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let spinner = spinner_frames[app.tick as usize % spinner_frames.len()];
        format!("{} {}", spinner, message)
    } else {
        message.to_string()
    };

    frame.render_widget(
        Paragraph::new(text)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .style(Style::default().fg(color)),
        chunks[0],
    );

    if !in_progress {
        let footer = Paragraph::new("Press Esc/Enter to dismiss")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(footer, chunks[1]);
    }
}

/// Helper to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let [area] = Layout::horizontal([Constraint::Percentage(percent_x)])
        .flex(Flex::Center)
        .areas(r);
    let [area] = Layout::vertical([Constraint::Percentage(percent_y)])
        .flex(Flex::Center)
        .areas(area);
    area
}
