use anyhow::Result;
use crossterm::{
    ExecutableCommand,
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::db::Database;
use crate::models::{Application, ApplicationStatus, Listing};

struct AppState {
    items: Vec<(Application, Listing)>,
    selected: usize,
    scroll_offset: u16,
}

impl AppState {
    fn new(items: Vec<(Application, Listing)>) -> Self {
        Self {
            items,
            selected: 0,
            scroll_offset: 0,
        }
    }

    fn current(&self) -> Option<&(Application, Listing)> {
        self.items.get(self.selected)
    }

    fn next(&mut self) {
        if !self.items.is_empty() && self.selected < self.items.len() - 1 {
            self.selected += 1;
            self.scroll_offset = 0;
        }
    }

    fn prev(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
            self.scroll_offset = 0;
        }
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }
}

/// Interactive approval gate over reviewed applications, best fit first.
/// Exactly three decisions per item: submitted, rejected, or skipped.
pub fn run_approval(db: &Database) -> Result<()> {
    let items = db.pending_approvals()?;
    if items.is_empty() {
        println!("No applications waiting for approval.");
        return Ok(());
    }

    let mut state = AppState::new(items);

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state, db);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    state: &mut AppState,
    db: &Database,
) -> Result<()> {
    let mut list_state = ListState::default();
    list_state.select(Some(0));

    loop {
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        if let Event::Key(key) = event::read()? {
            if key.kind != KeyEventKind::Press {
                continue;
            }
            let prev_selected = state.selected;
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.next(),
                KeyCode::Up | KeyCode::Char('k') => state.prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('o') => {
                    if let Some((app, listing)) = state.current() {
                        open_resources(app, listing);
                    }
                }
                KeyCode::Char('s') => {
                    decide(state, db, ApplicationStatus::Submitted);
                    state.next();
                }
                KeyCode::Char('r') => {
                    decide(state, db, ApplicationStatus::UserRejected);
                    state.next();
                }
                // Defer: no state change, revisit next session
                KeyCode::Char('n') => state.next(),
                _ => {}
            }
            if state.selected != prev_selected {
                list_state.select(Some(state.selected));
            }
        }
    }
    Ok(())
}

/// Apply a human decision to the selected application. Only undecided
/// (reviewed) items are actionable; everything else is a no-op.
fn decide(state: &mut AppState, db: &Database, decision: ApplicationStatus) {
    let target = state
        .current()
        .filter(|(app, _)| app.status == ApplicationStatus::Reviewed)
        .map(|(app, _)| (app.id.clone(), app.listing_key.clone()));
    let Some((id, listing_key)) = target else {
        return;
    };

    let applied = match decision {
        ApplicationStatus::Submitted => db.mark_submitted(&id).is_ok(),
        ApplicationStatus::UserRejected => db.mark_user_rejected(&id).is_ok(),
        _ => false,
    };
    if applied {
        let _ = db.audit(Some(&listing_key), decision.as_str(), &id);
        if let Some((app, _)) = state.items.get_mut(state.selected) {
            app.status = decision;
        }
    }
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(frame.area());

    // Left panel: pending applications
    let items: Vec<ListItem> = state
        .items
        .iter()
        .map(|(app, listing)| {
            let status_icon = match app.status {
                ApplicationStatus::Reviewed => " ",
                ApplicationStatus::Submitted => "+",
                ApplicationStatus::UserRejected => "x",
                ApplicationStatus::Drafted => "?",
            };
            let fit = listing.fit_score.unwrap_or_default();
            let role = if listing.role.len() > 30 {
                format!("{}...", &listing.role[..27])
            } else {
                listing.role.clone()
            };
            ListItem::new(format!(
                "{} {:>3.0} {} | {}",
                status_icon, fit, role, listing.company
            ))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Pending approvals ({}) ",
            state.items.len()
        )))
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: application detail
    let detail = build_detail(state);
    let detail_widget = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title(" Application "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    // Footer help
    let help_area = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1)])
        .split(frame.area());

    let help = Paragraph::new(
        " j/k:navigate  J/K:scroll  o:open  s:submitted  r:reject  n:skip  q:quit",
    )
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, help_area[1]);
}

fn build_detail<'a>(state: &'a AppState) -> Text<'a> {
    let Some((app, listing)) = state.current() else {
        return Text::raw("Nothing selected");
    };

    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        &listing.role,
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", listing.company)));

    let status_style = match app.status {
        ApplicationStatus::Reviewed => Style::default().fg(Color::Yellow),
        ApplicationStatus::Submitted => Style::default().fg(Color::Green),
        ApplicationStatus::UserRejected => Style::default().fg(Color::Red),
        ApplicationStatus::Drafted => Style::default(),
    };
    lines.push(Line::from(Span::styled(
        format!("Status: {}", app.status),
        status_style,
    )));

    lines.push(Line::from(format!(
        "Fit: {:.0}/100    Review: {:.1}/100",
        listing.fit_score.unwrap_or_default(),
        app.review_score
    )));
    if !listing.careers_page_verified {
        lines.push(Line::from(Span::styled(
            "Unverified: role not corroborated on the careers page",
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::from(format!("URL: {}", listing.url)));
    if let Some(path) = &app.resume_path {
        lines.push(Line::from(format!("Resume: {path}")));
    }
    if let Some(path) = &app.cover_letter_path {
        lines.push(Line::from(format!("Cover letter: {path}")));
    }

    lines.push(Line::from(""));

    if let Some(feedback) = &app.feedback {
        lines.push(Line::from(Span::styled(
            "REVIEW FEEDBACK",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in textwrap::fill(feedback, 70).lines() {
            lines.push(Line::from(format!("  {line}")));
        }
        lines.push(Line::from(""));
    }

    if let Some(rationale) = &listing.fit_rationale {
        lines.push(Line::from(Span::styled(
            "FIT RATIONALE",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in textwrap::fill(rationale, 70).lines() {
            lines.push(Line::from(format!("  {line}")));
        }
    }

    Text::from(lines)
}

fn open_resources(app: &Application, listing: &Listing) {
    open_target(&listing.url);
    if let Some(path) = &app.resume_path {
        open_target(path);
    }
    if let Some(path) = &app.cover_letter_path {
        open_target(path);
    }
}

/// Hand a URL or file to the platform opener. Failures are ignored; the
/// paths stay visible in the detail panel either way.
fn open_target(target: &str) {
    let result = if cfg!(target_os = "macos") {
        std::process::Command::new("open").arg(target).spawn()
    } else if cfg!(target_os = "windows") {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", target])
            .spawn()
    } else {
        std::process::Command::new("xdg-open").arg(target).spawn()
    };
    let _ = result;
}
