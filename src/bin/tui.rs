mod tui_app;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};
use tui_app::{
    format_countdown, format_delta, format_price, format_time_ms, truncate, ApiStatus, AppState,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &client).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
) -> io::Result<()> {
    let poll_interval = Duration::from_secs(1);
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app))?;

        let timeout = poll_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.force_refresh(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= poll_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState) {
    let area = f.area();

    // Outer vertical split: header | active panel | event table | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Length(6), // active event
            Constraint::Min(0),    // events
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_active_panel(f, app, chunks[1]);
    render_events_table(f, app, chunks[2]);
    render_footer(f, app, chunks[3]);
}

fn delta_color(v: Option<f64>) -> Color {
    match v {
        Some(d) if d > 0.0 => Color::Green,
        Some(d) if d < 0.0 => Color::Red,
        _ => Color::White,
    }
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let feed = &app.health.connection;
    let (status_text, status_color) = match &app.status {
        ApiStatus::Error(e) => (format!("✗ api: {}", truncate(e, 40)), Color::Red),
        ApiStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ApiStatus::Connected if feed.connected => {
            let source = feed.source.as_deref().unwrap_or("feed");
            (format!("● {source}"), Color::Green)
        }
        ApiStatus::Connected => {
            let reason = feed.error.as_deref().unwrap_or("feed disconnected");
            (format!("● {}", truncate(reason, 40)), Color::Red)
        }
    };

    let title_spans = vec![
        Span::styled(
            " BTC Up/Down 15m  ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(status_text, Style::default().fg(status_color)),
        Span::raw("  │  "),
        Span::styled(
            format_price(app.price.price),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(
            format_delta(app.price.delta),
            Style::default().fg(delta_color(app.price.delta)),
        ),
    ];

    let paragraph = Paragraph::new(Line::from(title_spans))
        .block(Block::default().borders(Borders::ALL).border_style(
            Style::default().fg(Color::DarkGray),
        ));

    f.render_widget(paragraph, area);
}

fn render_active_panel(f: &mut Frame, app: &AppState, area: Rect) {
    let label = Style::default().fg(Color::DarkGray);
    let lines = match &app.current {
        Some(current) => {
            let countdown = current
                .countdown
                .as_ref()
                .map_or("—".to_string(), |c| format_countdown(c.remaining_secs));
            vec![
                Line::from(Span::styled(
                    truncate(&current.title, area.width.saturating_sub(4) as usize),
                    Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
                )),
                Line::from(vec![
                    Span::styled("Price to beat  ", label),
                    Span::raw(format_price(current.price_to_beat)),
                    Span::raw("    "),
                    Span::styled("Diff  ", label),
                    Span::styled(format_delta(current.diff), Style::default().fg(delta_color(current.diff))),
                ]),
                Line::from(vec![
                    Span::styled("Time left      ", label),
                    Span::styled(countdown, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
                ]),
                Line::from(Span::styled(current.slug.clone(), label)),
            ]
        }
        None => vec![Line::from(Span::styled("No active event", label))],
    };

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                " ACTIVE EVENT ",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    );
    f.render_widget(panel, area);
}

fn render_events_table(f: &mut Frame, app: &AppState, area: Rect) {
    let header_cells = ["Event", "Window (UTC)", "Status", "Price to beat", "Last price"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .events
        .events
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let status_color = match e.status.as_str() {
                "active" => Color::Green,
                "upcoming" => Color::Cyan,
                _ => Color::DarkGray,
            };
            let window = format!("{}–{}", format_time_ms(e.start_time_ms), format_time_ms(e.end_time_ms));
            let row = Row::new(vec![
                Cell::from(truncate(&e.title, 40)),
                Cell::from(window).style(Style::default().fg(Color::DarkGray)),
                Cell::from(e.status.clone()).style(Style::default().fg(status_color)),
                Cell::from(format_price(e.price_to_beat)),
                Cell::from(format_price(e.last_price)),
            ]);
            if app.events.current_index == Some(i) {
                row.style(Style::default().add_modifier(Modifier::BOLD))
            } else {
                row
            }
        })
        .collect();

    let title = match &app.events.catalog_error {
        Some(err) => format!(" EVENTS ({}) ", truncate(err, 40)),
        None => " EVENTS ".to_string(),
    };

    let table = Table::new(
        rows,
        [
            Constraint::Min(20),
            Constraint::Length(13),
            Constraint::Length(9),
            Constraint::Length(14),
            Constraint::Length(14),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(Span::styled(
                title,
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    );

    f.render_widget(table, area);
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh events  "),
        Span::styled(
            format!("failed refreshes: {}", app.health.refreshes_failed),
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
