use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::models::{ApplicationStatus, JobApplication, KillSwitchState, Stats};

struct AppState {
    jobs: Vec<JobApplication>,
    selected: usize,
    scroll_offset: u16,
    stats: Stats,
    kill_switch: KillSwitchState,
}

impl AppState {
    fn new(jobs: Vec<JobApplication>, stats: Stats, kill_switch: KillSwitchState) -> Self {
        Self {
            jobs,
            selected: 0,
            scroll_offset: 0,
            stats,
            kill_switch,
        }
    }

    fn current_job(&self) -> Option<&JobApplication> {
        self.jobs.get(self.selected)
    }

    fn refresh(&mut self, db: &Database) {
        if let Ok(stats) = db.stats() {
            self.stats = stats;
        }
        if let Ok(state) = db.kill_switch() {
            self.kill_switch = state;
        }
    }

    fn next(&mut self) {
        if !self.jobs.is_empty() && self.selected < self.jobs.len() - 1 {
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

pub fn run_dashboard(db: &Database, status: Option<ApplicationStatus>) -> Result<()> {
    let jobs = db.jobs_by_status(status)?;
    if jobs.is_empty() {
        println!("No applications found.");
        return Ok(());
    }

    let mut state = AppState::new(jobs, db.stats()?, db.kill_switch()?);

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
    let clock = SystemClock;
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
                KeyCode::Char('d') => set_status(state, db, &clock, ApplicationStatus::Denied),
                KeyCode::Char('a') => set_status(state, db, &clock, ApplicationStatus::Accepted),
                KeyCode::Char('n') => set_status(state, db, &clock, ApplicationStatus::NoResponse),
                _ => {}
            }
            if state.selected != prev_selected {
                list_state.select(Some(state.selected));
            }
        }
    }
    Ok(())
}

// Terminal transitions only; the ledger refuses anything the state machine
// forbids and the row simply stays as it was.
fn set_status(state: &mut AppState, db: &Database, clock: &SystemClock, status: ApplicationStatus) {
    let Some(job) = state.current_job() else { return };
    let draft = job.draft_filename.clone();
    if db
        .update_status(&draft, status, Some("closed from dashboard"), clock.now())
        .is_ok()
    {
        if let Ok(Some(updated)) = db.get_job(&draft) {
            state.jobs[state.selected] = updated;
        }
        state.refresh(db);
    }
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(frame.area());

    // Status banner
    let banner = if state.kill_switch.active {
        let reason = state
            .kill_switch
            .reason
            .as_deref()
            .unwrap_or("no reason recorded");
        Paragraph::new(format!(" KILL SWITCH ACTIVE - {reason} "))
            .style(Style::default().fg(Color::White).bg(Color::Red))
    } else {
        Paragraph::new(format!(
            " pending {}  applied {}  denied {}  avg fit {} ",
            state.stats.pending, state.stats.applied, state.stats.denied, state.stats.avg_fit_score
        ))
        .style(Style::default().fg(Color::DarkGray))
    };
    frame.render_widget(banner, rows[0]);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(rows[1]);

    // Left panel: application list
    let items: Vec<ListItem> = state
        .jobs
        .iter()
        .map(|job| {
            let status_icon = match job.status {
                ApplicationStatus::Pending => " ",
                ApplicationStatus::Applied => "+",
                ApplicationStatus::Denied => "x",
                ApplicationStatus::Accepted => "*",
                ApplicationStatus::NoResponse => "-",
            };
            let position = if job.position.chars().count() > 30 {
                let short: String = job.position.chars().take(27).collect();
                format!("{short}...")
            } else {
                job.position.clone()
            };
            ListItem::new(format!(
                "{} #{:<4} {} | {}",
                status_icon, job.id, position, job.company
            ))
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Applications ({}) ",
            state.jobs.len()
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
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));

    frame.render_widget(detail_widget, chunks[1]);

    let help = Paragraph::new(" j/k:navigate  J/K:scroll  d:denied a:accepted n:no-response  q:quit")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, rows[2]);
}

fn build_detail(state: &AppState) -> Text<'_> {
    let Some(job) = state.current_job() else {
        return Text::raw("No application selected");
    };

    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(Span::styled(
        &job.position,
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {}", job.company)));

    let status_style = match job.status {
        ApplicationStatus::Pending => Style::default().fg(Color::Yellow),
        ApplicationStatus::Applied => Style::default().fg(Color::Cyan),
        ApplicationStatus::Denied => Style::default().fg(Color::Red),
        ApplicationStatus::Accepted => Style::default().fg(Color::Green),
        ApplicationStatus::NoResponse => Style::default().fg(Color::DarkGray),
    };
    lines.push(Line::from(Span::styled(
        format!("Status: {}", job.status),
        status_style,
    )));

    lines.push(Line::from(format!(
        "Fit: {}/100   Confidence: {}/100",
        job.fit_score, job.confidence_score
    )));
    lines.push(Line::from(format!("Draft: {}", job.draft_filename)));

    if let Some(url) = &job.job_url {
        lines.push(Line::from(format!("URL: {url}")));
    }
    if let Some(source) = &job.source {
        lines.push(Line::from(format!("Source: {source}")));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(format!(
        "Created: {}",
        job.created_date.format("%Y-%m-%d %H:%M")
    )));
    if let Some(applied) = job.applied_date {
        lines.push(Line::from(format!(
            "Applied: {}",
            applied.format("%Y-%m-%d %H:%M")
        )));
    }
    if let Some(response) = job.response_date {
        lines.push(Line::from(format!(
            "Response: {}",
            response.format("%Y-%m-%d %H:%M")
        )));
    }

    let contact: Vec<&str> = [
        job.contact_name.as_deref(),
        job.contact_email.as_deref(),
        job.contact_phone.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !contact.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Contact",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(format!("  {}", contact.join("  "))));
    }

    if let Some(notes) = &job.notes {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Notes",
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for line in textwrap::fill(notes, 70).lines() {
            lines.push(Line::from(format!("  {line}")));
        }
    }

    Text::from(lines)
}
