use std::collections::HashSet;
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use mdb_core::derived_config::fetch_missing_metadata;
use mdb_core::dispatcher::{QueryDispatcher, QueryService};
use mdb_core::history::{highlight_spans, HistoryEntry, QueryHistory};
use mdb_core::instances::{load_registry, InstanceRef};
use mdb_core::panel::{reduce, ExecuteRequest, PanelEvent, PanelState};
use mdb_core::query_result::AggregatedTable;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};
use ratatui::{Frame, Terminal};
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

const TICK_RATE: Duration = Duration::from_millis(120);
const SPINNER_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];
const EDITOR_HEIGHT: u16 = 8;
const GROUP_ID_WIDTH: u16 = 9;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Completions reported by background work.
#[derive(Debug, Clone, PartialEq)]
enum BackendEvent {
    Panel(PanelEvent),
    InstancesFailed(String),
    MetadataFailed { instance: InstanceRef, message: String },
}

/// Background work requested by [`TuiApp::handle`].
#[derive(Debug, Clone, PartialEq)]
enum Command {
    LoadInstances,
    FetchMetadata(Vec<InstanceRef>),
    Dispatch(ExecuteRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectionKey {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq)]
enum Msg {
    Quit,
    Input(char),
    Backspace,
    Submit,
    Execute,
    ToggleMode,
    NextGroupType,
    NextInstance,
    PreviousInstance,
    ShowTables,
    ToggleHistory,
    ToggleErrors,
    Escape,
    Navigate(DirectionKey),
    Tick,
    Backend(BackendEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Overlay {
    None,
    Errors,
    Tables,
    History { search: String, cursor: usize },
}

#[derive(Debug)]
struct TuiApp {
    panel: PanelState,
    overlay: Overlay,
    pending_metadata: HashSet<InstanceRef>,
    table_offset: usize,
    spinner: usize,
    status_line: String,
    should_quit: bool,
}

impl TuiApp {
    fn new(history: QueryHistory) -> Self {
        Self {
            panel: PanelState::new(history),
            overlay: Overlay::None,
            pending_metadata: HashSet::new(),
            table_offset: 0,
            spinner: 0,
            status_line: "Loading instances".to_string(),
            should_quit: false,
        }
    }

    fn startup(&self) -> Vec<Command> {
        vec![Command::LoadInstances]
    }

    fn apply(&mut self, event: PanelEvent) {
        let state = std::mem::take(&mut self.panel);
        self.panel = reduce(state, event);
    }

    fn handle(&mut self, msg: Msg) -> Vec<Command> {
        match msg {
            Msg::Quit => {
                self.should_quit = true;
                Vec::new()
            }
            Msg::Input(ch) => {
                if let Overlay::History { search, cursor } = &mut self.overlay {
                    search.push(ch);
                    *cursor = 0;
                } else if self.overlay == Overlay::None {
                    self.edit_query(|text| text.push(ch));
                }
                Vec::new()
            }
            Msg::Backspace => {
                if let Overlay::History { search, cursor } = &mut self.overlay {
                    search.pop();
                    *cursor = 0;
                } else if self.overlay == Overlay::None {
                    self.edit_query(|text| {
                        text.pop();
                    });
                }
                Vec::new()
            }
            Msg::Submit => match self.overlay {
                Overlay::History { .. } => self.replay_selected_history(),
                Overlay::None => {
                    self.edit_query(|text| text.push('\n'));
                    Vec::new()
                }
                Overlay::Errors | Overlay::Tables => {
                    self.overlay = Overlay::None;
                    Vec::new()
                }
            },
            Msg::Execute => self.execute(),
            Msg::ToggleMode => {
                let mode = self.panel.selection.mode().toggled();
                self.apply(PanelEvent::SetMode(mode));
                self.status_line = format!("Mode: {mode}");
                self.request_missing_metadata()
            }
            Msg::NextGroupType => self.next_group_type(),
            Msg::NextInstance => self.step_instance(true),
            Msg::PreviousInstance => self.step_instance(false),
            Msg::ShowTables => {
                self.overlay = Overlay::Tables;
                self.request_missing_metadata()
            }
            Msg::ToggleHistory => {
                self.overlay = if matches!(self.overlay, Overlay::History { .. }) {
                    Overlay::None
                } else {
                    Overlay::History {
                        search: String::new(),
                        cursor: 0,
                    }
                };
                Vec::new()
            }
            Msg::ToggleErrors => {
                if self.overlay == Overlay::Errors {
                    self.overlay = Overlay::None;
                } else if self.panel.errors.is_empty() {
                    self.status_line = "No errors for the last query".to_string();
                } else {
                    self.overlay = Overlay::Errors;
                }
                Vec::new()
            }
            Msg::Escape => {
                if self.panel.dispatch_failure.is_some() {
                    self.apply(PanelEvent::DismissDispatchFailure);
                } else {
                    self.overlay = Overlay::None;
                }
                Vec::new()
            }
            Msg::Navigate(direction) => {
                self.navigate(direction);
                Vec::new()
            }
            Msg::Tick => {
                if self.panel.dispatch_in_flight {
                    self.spinner = (self.spinner + 1) % SPINNER_FRAMES.len();
                }
                Vec::new()
            }
            Msg::Backend(event) => self.on_backend_event(event),
        }
    }

    fn edit_query(&mut self, edit: impl FnOnce(&mut String)) {
        let mut text = self.panel.query_text.clone();
        edit(&mut text);
        self.apply(PanelEvent::EditQueryText(text));
    }

    fn execute(&mut self) -> Vec<Command> {
        match self.panel.execute_request(SystemTime::now()) {
            Ok(request) => {
                info!(mode = %request.selection.mode(), "executing query");
                self.apply(PanelEvent::ExecuteStarted(request.clone()));
                self.status_line = "Query running".to_string();
                vec![Command::Dispatch(request)]
            }
            Err(blocked) => {
                self.status_line = blocked.to_string();
                Vec::new()
            }
        }
    }

    fn next_group_type(&mut self) -> Vec<Command> {
        let group_types = self.panel.registry.group_types();
        if group_types.is_empty() {
            self.status_line = "No group types available".to_string();
            return Vec::new();
        }

        let next = group_types
            .iter()
            .position(|group_type| group_type == self.panel.selection.group_type())
            .map_or(0, |index| (index + 1) % group_types.len());
        let group_type = group_types[next].clone();
        self.status_line = format!("Group type: {group_type}");
        self.apply(PanelEvent::SelectGroupType(group_type));
        self.request_missing_metadata()
    }

    fn step_instance(&mut self, forward: bool) -> Vec<Command> {
        let instances = self.panel.registry.instances();
        if instances.is_empty() {
            self.status_line = "No instances available".to_string();
            return Vec::new();
        }

        let len = instances.len();
        let current = self
            .panel
            .selection
            .instance()
            .and_then(|selected| instances.iter().position(|instance| instance.is(selected)));
        let next = match (current, forward) {
            (None, _) => 0,
            (Some(index), true) => (index + 1) % len,
            (Some(index), false) => (index + len - 1) % len,
        };
        let reference = instances[next].reference();
        self.status_line = format!("Instance: {reference} ({})", reference.group_type);
        self.apply(PanelEvent::SelectInstance(reference));
        self.request_missing_metadata()
    }

    fn navigate(&mut self, direction: DirectionKey) {
        match &mut self.overlay {
            Overlay::History { search, cursor } => {
                let matches = self.panel.history.search(search).len();
                *cursor = match direction {
                    DirectionKey::Up => cursor.saturating_sub(1),
                    DirectionKey::Down => (*cursor + 1).min(matches.saturating_sub(1)),
                };
            }
            Overlay::None => {
                let last_row = self.panel.table.rows.len().saturating_sub(1);
                self.table_offset = match direction {
                    DirectionKey::Up => self.table_offset.saturating_sub(1),
                    DirectionKey::Down => (self.table_offset + 1).min(last_row),
                };
            }
            Overlay::Errors | Overlay::Tables => {}
        }
    }

    fn replay_selected_history(&mut self) -> Vec<Command> {
        let Overlay::History { search, cursor } = &self.overlay else {
            return Vec::new();
        };
        let Some(entry) = history_matches(&self.panel.history, search)
            .get(*cursor)
            .map(|entry| (*entry).clone())
        else {
            return Vec::new();
        };

        self.overlay = Overlay::None;
        self.status_line = format!("Replayed: {}", entry.label());
        self.apply(PanelEvent::ReplayHistoryEntry(entry));
        self.request_missing_metadata()
    }

    fn on_backend_event(&mut self, event: BackendEvent) -> Vec<Command> {
        match event {
            BackendEvent::Panel(event) => {
                let registry_loaded = matches!(event, PanelEvent::InstancesLoaded(_));
                let dispatch_finished = matches!(
                    event,
                    PanelEvent::DispatchCompleted { .. } | PanelEvent::DispatchFailed(_)
                );
                if let PanelEvent::TableMetadataLoaded { instance, .. } = &event {
                    self.pending_metadata.remove(instance);
                }
                if matches!(event, PanelEvent::DispatchCompleted { .. }) {
                    self.table_offset = 0;
                }

                self.apply(event);

                if dispatch_finished {
                    self.status_line = self.dispatch_summary();
                }
                if registry_loaded {
                    self.status_line = format!("Loaded {} instances", self.panel.registry.len());
                    return self.request_missing_metadata();
                }
                Vec::new()
            }
            BackendEvent::InstancesFailed(message) => {
                self.status_line = format!("Failed to load instances: {message}");
                Vec::new()
            }
            BackendEvent::MetadataFailed { instance, message } => {
                self.pending_metadata.remove(&instance);
                self.status_line = format!("Autocomplete for {instance} unavailable: {message}");
                Vec::new()
            }
        }
    }

    fn dispatch_summary(&self) -> String {
        match &self.panel.dispatch_failure {
            Some(failure) => format!("Query failed: {failure}"),
            None => format!(
                "{} rows, {} errors",
                self.panel.table.rows.len(),
                self.panel.errors.len()
            ),
        }
    }

    /// Requests metadata for selected instances that lack it and are not
    /// already being fetched.
    fn request_missing_metadata(&mut self) -> Vec<Command> {
        let missing = self
            .panel
            .missing_metadata()
            .into_iter()
            .filter(|instance| self.pending_metadata.insert(instance.clone()))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Vec::new()
        } else {
            vec![Command::FetchMetadata(missing)]
        }
    }
}

/// Runs [`Command`]s on a tokio runtime and reports completions over a channel.
struct Backend {
    runtime: Runtime,
    service: Arc<dyn QueryService>,
    sender: UnboundedSender<BackendEvent>,
}

impl Backend {
    fn new(
        service: Arc<dyn QueryService>,
    ) -> Result<(Self, UnboundedReceiver<BackendEvent>), TuiError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("mdb-backend")
            .build()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok((
            Self {
                runtime,
                service,
                sender,
            },
            receiver,
        ))
    }

    fn run(&self, command: Command) {
        let service = Arc::clone(&self.service);
        let sender = self.sender.clone();
        match command {
            Command::LoadInstances => {
                self.runtime.spawn(async move {
                    let event = match load_registry(service.as_ref()).await {
                        Ok(registry) => BackendEvent::Panel(PanelEvent::InstancesLoaded(registry)),
                        Err(error) => {
                            warn!(%error, "instance list request failed");
                            BackendEvent::InstancesFailed(error.to_string())
                        }
                    };
                    report(&sender, event);
                });
            }
            Command::FetchMetadata(missing) => {
                debug!(count = missing.len(), "fetching table metadata");
                self.runtime.spawn(async move {
                    for fetch in fetch_missing_metadata(service.as_ref(), &missing).await {
                        let event = match fetch.outcome {
                            Ok(metadata) => BackendEvent::Panel(PanelEvent::TableMetadataLoaded {
                                instance: fetch.instance,
                                metadata,
                            }),
                            Err(error) => BackendEvent::MetadataFailed {
                                instance: fetch.instance,
                                message: error.to_string(),
                            },
                        };
                        report(&sender, event);
                    }
                });
            }
            Command::Dispatch(request) => {
                self.runtime.spawn(async move {
                    let mode = request.selection.mode();
                    let dispatcher = QueryDispatcher::new(service);
                    let event = match dispatcher.dispatch(&request.query, &request.selection).await
                    {
                        Ok(results) => PanelEvent::DispatchCompleted { mode, results },
                        Err(error) => PanelEvent::DispatchFailed(error.to_string()),
                    };
                    report(&sender, BackendEvent::Panel(event));
                });
            }
        }
    }

    /// Closes the service's pools, then drops any work still running.
    fn shutdown(self) {
        let closed = self.runtime.block_on(async {
            tokio::time::timeout(CLOSE_TIMEOUT, self.service.close()).await
        });
        if closed.is_err() {
            warn!("timed out closing database connections");
        }
        self.runtime.shutdown_background();
    }
}

fn report(sender: &UnboundedSender<BackendEvent>, event: BackendEvent) {
    if sender.send(event).is_err() {
        debug!("ui loop closed before backend completion");
    }
}

/// Runs the query panel until the operator quits.
pub fn run(service: Arc<dyn QueryService>, history: QueryHistory) -> Result<(), TuiError> {
    let (backend, receiver) = Backend::new(service)?;
    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, &backend, receiver, history);
    let restore_result = restore_terminal(&mut terminal);
    backend.shutdown();

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    backend: &Backend,
    mut receiver: UnboundedReceiver<BackendEvent>,
    history: QueryHistory,
) -> Result<(), TuiError> {
    let mut app = TuiApp::new(history);
    for command in app.startup() {
        backend.run(command);
    }
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|frame| render(frame, &app))?;

        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key) {
                        for command in app.handle(message) {
                            backend.run(command);
                        }
                    }
                }
            }
        }

        while let Ok(event) = receiver.try_recv() {
            for command in app.handle(Msg::Backend(event)) {
                backend.run(command);
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            app.handle(Msg::Tick);
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(EDITOR_HEIGHT),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);

    let mut editor_text = app.panel.query_text.clone();
    editor_text.push('_');
    let editor = Paragraph::new(editor_text)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(format!(
            "Query [{}]",
            app.panel.derived.editor_mode()
        )));
    frame.render_widget(editor, chunks[1]);

    render_table(frame, &app.panel.table, app.table_offset, chunks[2]);

    let footer = Paragraph::new(vec![
        Line::from(format!("Status: {}", app.status_line)),
        Line::from(
            "Ctrl+E run | Ctrl+G mode | Ctrl+T group | Ctrl+N/B instance | Ctrl+Space tables | \
             Ctrl+R history | Ctrl+O errors | Ctrl+Q quit",
        ),
    ])
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[3]);

    match &app.overlay {
        Overlay::None => {}
        Overlay::Errors => render_errors_popup(frame, app),
        Overlay::Tables => render_tables_popup(frame, app),
        Overlay::History { search, cursor } => render_history_popup(frame, app, search, *cursor),
    }

    if let Some(failure) = &app.panel.dispatch_failure {
        let area = centered_rect(60, 30, frame.area());
        frame.render_widget(Clear, area);
        let popup = Paragraph::new(vec![
            Line::from(failure.as_str()),
            Line::from(""),
            Line::from("Esc to dismiss"),
        ])
        .wrap(Wrap { trim: false })
        .style(Style::default().fg(Color::Red))
        .block(Block::default().borders(Borders::ALL).title("Query failed"));
        frame.render_widget(popup, area);
    }
}

fn render_header(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let selection = &app.panel.selection;
    let instance = selection
        .instance()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let running = if app.panel.dispatch_in_flight {
        format!("running {}", SPINNER_FRAMES[app.spinner])
    } else {
        "idle".to_string()
    };

    let mut spans = vec![
        Span::styled(
            format!(" Mode: {} ", selection.mode()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!("Group: {}", non_empty_or_dash(selection.group_type()))),
        Span::raw(" | "),
        Span::raw(format!("Instance: {instance}")),
        Span::raw(" | "),
        Span::raw(format!("Dialect: {}", app.panel.derived.dialect)),
        Span::raw(" | "),
        Span::raw(running),
    ];
    if !app.panel.errors.is_empty() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            format!("{} errors (Ctrl+O)", app.panel.errors.len()),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    let header = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("mdb"));
    frame.render_widget(header, area);
}

fn render_table(frame: &mut Frame<'_>, table: &AggregatedTable, offset: usize, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("Results ({} rows)", table.rows.len()));
    if table.columns.is_empty() {
        frame.render_widget(Paragraph::new("No results").block(block), area);
        return;
    }

    let pinned = table.has_group_id();
    let pinned_style = Style::default().fg(Color::Cyan);
    let visible = usize::from(area.height.saturating_sub(3));
    let rows = (offset..table.rows.len())
        .take(visible)
        .filter_map(|index| table.row_values(index))
        .map(|values| {
            Row::new(values.into_iter().enumerate().map(|(position, value)| {
                let cell = Cell::from(cell_text(value));
                if pinned && position == 0 {
                    cell.style(pinned_style)
                } else {
                    cell
                }
            }))
        });
    let header = Row::new(
        table
            .columns
            .iter()
            .map(|column| Cell::from(column.name.clone())),
    )
    .style(Style::default().add_modifier(Modifier::BOLD));

    frame.render_widget(
        Table::new(rows, column_widths(table))
            .header(header)
            .block(block),
        area,
    );
}

/// A leading `groupId` column keeps a fixed width; the rest share the space.
fn column_widths(table: &AggregatedTable) -> Vec<Constraint> {
    let pinned = usize::from(table.has_group_id());
    let shared = u32::try_from(table.columns.len() - pinned)
        .unwrap_or(u32::MAX)
        .max(1);
    (0..table.columns.len())
        .map(|position| {
            if position < pinned {
                Constraint::Length(GROUP_ID_WIDTH)
            } else {
                Constraint::Ratio(1, shared)
            }
        })
        .collect()
}

fn render_errors_popup(frame: &mut Frame<'_>, app: &TuiApp) {
    let area = centered_rect(70, 60, frame.area());
    frame.render_widget(Clear, area);
    let mut lines = Vec::new();
    for record in &app.panel.errors {
        lines.push(Line::from(vec![
            Span::styled(
                format!("{}: ", record.group_id),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(record.message.clone()),
        ]));
        if let Some(detail) = record.detail_text() {
            lines.push(Line::from(Span::styled(
                format!("    {detail}"),
                Style::default().fg(Color::DarkGray),
            )));
        }
    }
    let popup = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Errors"));
    frame.render_widget(popup, area);
}

fn render_tables_popup(frame: &mut Frame<'_>, app: &TuiApp) {
    let area = centered_rect(60, 60, frame.area());
    frame.render_widget(Clear, area);
    let lines = match &app.panel.derived.table_metadata {
        Some(metadata) if !metadata.is_empty() => metadata
            .iter()
            .map(|(table, columns)| {
                Line::from(vec![
                    Span::styled(table.clone(), Style::default().add_modifier(Modifier::BOLD)),
                    Span::raw(format!(": {}", columns.join(", "))),
                ])
            })
            .collect(),
        Some(_) => vec![Line::from("No tables")],
        None if app.pending_metadata.is_empty() => vec![Line::from("No metadata available")],
        None => vec![Line::from("Loading tables...")],
    };
    let popup = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title("Tables"));
    frame.render_widget(popup, area);
}

fn render_history_popup(frame: &mut Frame<'_>, app: &TuiApp, search: &str, cursor: usize) {
    let area = centered_rect(80, 70, frame.area());
    frame.render_widget(Clear, area);
    let mut lines = vec![Line::from(format!("Search: {search}_")), Line::from("")];
    let matches = history_matches(&app.panel.history, search);
    if matches.is_empty() {
        lines.push(Line::from("No matching queries"));
    }
    for (index, entry) in matches.iter().enumerate() {
        let text = format!("{} | {}", entry.label(), entry.query.replace('\n', " "));
        let marker = if index == cursor { "> " } else { "  " };
        let mut spans = vec![Span::raw(marker)];
        spans.extend(
            highlight_segments(&text, search)
                .into_iter()
                .map(|(segment, highlighted)| {
                    if highlighted {
                        Span::styled(
                            segment,
                            Style::default()
                                .fg(Color::Yellow)
                                .add_modifier(Modifier::BOLD),
                        )
                    } else {
                        Span::raw(segment)
                    }
                }),
        );
        lines.push(Line::from(spans));
    }
    let popup = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("History (Enter to replay)"),
    );
    frame.render_widget(popup, area);
}

/// Most recent first.
fn history_matches<'a>(history: &'a QueryHistory, search: &str) -> Vec<&'a HistoryEntry> {
    let mut matches = history.search(search);
    matches.reverse();
    matches
}

/// Splits `text` into `(segment, highlighted)` pieces for display.
fn highlight_segments(text: &str, needle: &str) -> Vec<(String, bool)> {
    let mut segments = Vec::new();
    let mut position = 0;
    for range in highlight_spans(text, needle) {
        if range.start > position {
            segments.push((text[position..range.start].to_string(), false));
        }
        segments.push((text[range.clone()].to_string(), true));
        position = range.end;
    }
    if position < text.len() {
        segments.push((text[position..].to_string(), false));
    }
    segments
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn non_empty_or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent) -> Option<Msg> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('q')) => Some(Msg::Quit),
        (KeyModifiers::CONTROL, KeyCode::Char('e')) | (_, KeyCode::F(5)) => Some(Msg::Execute),
        (KeyModifiers::CONTROL, KeyCode::Char('g')) => Some(Msg::ToggleMode),
        (KeyModifiers::CONTROL, KeyCode::Char('t')) => Some(Msg::NextGroupType),
        (KeyModifiers::CONTROL, KeyCode::Char('n')) => Some(Msg::NextInstance),
        (KeyModifiers::CONTROL, KeyCode::Char('b')) => Some(Msg::PreviousInstance),
        (KeyModifiers::CONTROL, KeyCode::Char(' ')) => Some(Msg::ShowTables),
        (KeyModifiers::CONTROL, KeyCode::Char('r')) => Some(Msg::ToggleHistory),
        (KeyModifiers::CONTROL, KeyCode::Char('o')) => Some(Msg::ToggleErrors),
        (_, KeyCode::Esc) => Some(Msg::Escape),
        (_, KeyCode::Enter) => Some(Msg::Submit),
        (_, KeyCode::Backspace) => Some(Msg::Backspace),
        (_, KeyCode::Up) => Some(Msg::Navigate(DirectionKey::Up)),
        (_, KeyCode::Down) => Some(Msg::Navigate(DirectionKey::Down)),
        (KeyModifiers::NONE | KeyModifiers::SHIFT, KeyCode::Char(ch)) => Some(Msg::Input(ch)),
        _ => None,
    }
}
