use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossterm::event::{Event, EventStream, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use futures::StreamExt;
use rag::{AnswerStream, Config, CorpusKind, CorpusStatus, IngestReport, RagService};
use ratatui::{Frame, Terminal};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Margin, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const HELP: &str = "Ask a question about the active corpus, or use a command:\n\
    /load <file.pdf | youtube url>  index a PDF or a video transcript\n\
    /summary                        summarize the active corpus\n\
    /status                         show what is loaded\n\
    /reset                          unload the active corpus\n\
    /chat <message>                 talk to the model without retrieval";

/// Logs go to a file so they never draw over the terminal UI.
fn init_tracing() {
    let filter = match std::env::var("RAG_LOG") {
        Ok(env) => EnvFilter::new(env),
        Err(_) => EnvFilter::new("info"),
    };
    let path = std::env::var_os("RAG_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("docchat.log"));
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let service = match Config::from_env().and_then(RagService::from_config) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            eprintln!("docchat: {}", err);
            std::process::exit(2);
        }
    };
    init_tracing();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(service);
    let res = run_app(&mut terminal, &mut app).await;
    app.cancel();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

struct App {
    input: String,
    cursor: usize,
    corpus: CorpusKind,
    context: Option<String>,
    answer: String,
    service: Arc<RagService>,
    output_focus: OutputFocus,
    context_pane: Pane,
    answer_pane: Pane,
    job: u64,
    task: Option<JoinHandle<()>>,
    spinner_idx: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFocus {
    Context,
    Answer,
}

enum Update {
    Context(String),
    Fragment(String),
    Ingested(IngestReport),
    Finished,
    Failed(String),
}

/// An update tagged with the job that produced it; stale jobs are ignored.
struct Tagged {
    job: u64,
    update: Update,
}

impl App {
    fn new(service: Arc<RagService>) -> Self {
        Self {
            input: String::new(),
            cursor: 0,
            corpus: CorpusKind::Pdf,
            context: None,
            answer: HELP.to_string(),
            service,
            output_focus: OutputFocus::Answer,
            context_pane: Pane::default(),
            answer_pane: Pane::default(),
            job: 0,
            task: None,
            spinner_idx: 0,
        }
    }

    fn is_loading(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn insert_char(&mut self, c: char) {
        self.input.insert(self.cursor, c);
        self.cursor += c.len_utf8();
    }

    fn delete_char(&mut self) {
        if let Some((idx, _)) = self.input[..self.cursor].char_indices().next_back() {
            self.input.remove(idx);
            self.cursor = idx;
        }
    }

    fn move_left(&mut self) {
        if let Some((idx, _)) = self.input[..self.cursor].char_indices().next_back() {
            self.cursor = idx;
        }
    }

    fn move_right(&mut self) {
        if let Some(c) = self.input[self.cursor..].chars().next() {
            self.cursor += c.len_utf8();
        }
    }

    fn toggle_corpus(&mut self) {
        self.corpus = match self.corpus {
            CorpusKind::Pdf => CorpusKind::Video,
            CorpusKind::Video => CorpusKind::Pdf,
        };
        self.context = None;
        self.answer = describe_status(self.corpus, &self.service.status(self.corpus));
        self.answer_pane.auto_scroll = true;
    }

    /// Stops the running job, dropping its answer stream.
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                task.abort();
                self.answer.push_str("\n\n[cancelled]");
                self.answer_pane.auto_scroll = true;
                tracing::info!(job = self.job, "job cancelled");
            }
        }
        self.job += 1;
    }

    fn submit(&mut self, tx: &mpsc::UnboundedSender<Tagged>) {
        let line = self.input.trim().to_string();
        if line.is_empty() || self.is_loading() {
            return;
        }
        self.input.clear();
        self.cursor = 0;

        let (command, arg) = match line.strip_prefix('/') {
            Some(rest) => {
                let (cmd, arg) = rest.split_once(' ').unwrap_or((rest, ""));
                (Some(cmd.to_string()), arg.trim().to_string())
            }
            None => (None, line.clone()),
        };

        match command.as_deref() {
            None => {
                let kind = self.corpus;
                self.start(tx, "Retrieving context...", move |service, tx| async move {
                    let answer = service.ask(kind, &arg).await?;
                    tx(Update::Context(answer.context));
                    pump(answer.fragments, &tx).await;
                    Ok::<_, rag::Error>(())
                });
            }
            Some("load") if arg.is_empty() => {
                self.answer = "Usage: /load <file.pdf | youtube url>".to_string();
            }
            Some("load") => {
                let is_pdf = Path::new(&arg)
                    .extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
                self.corpus = if is_pdf { CorpusKind::Pdf } else { CorpusKind::Video };
                self.start(tx, "Indexing...", move |service, tx| async move {
                    let report = if is_pdf {
                        service.ingest_pdf(Path::new(&arg)).await?
                    } else {
                        service.ingest_video(&arg).await?
                    };
                    tx(Update::Ingested(report));
                    tx(Update::Finished);
                    Ok::<_, rag::Error>(())
                });
            }
            Some("summary") => {
                let kind = self.corpus;
                self.start(tx, "Summarizing...", move |service, tx| async move {
                    let fragments = service.summarize(kind).await?;
                    pump(fragments, &tx).await;
                    Ok::<_, rag::Error>(())
                });
            }
            Some("chat") if !arg.is_empty() => {
                self.start(tx, "", move |service, tx| async move {
                    let fragments = service.chat("", &arg).await?;
                    pump(fragments, &tx).await;
                    Ok::<_, rag::Error>(())
                });
            }
            Some("status") => {
                let pdf = describe_status(CorpusKind::Pdf, &self.service.status(CorpusKind::Pdf));
                let video =
                    describe_status(CorpusKind::Video, &self.service.status(CorpusKind::Video));
                self.answer = format!("{}\n\n{}", pdf, video);
            }
            Some("reset") => {
                self.context = None;
                self.answer = if self.service.reset(self.corpus) {
                    format!("The {} was unloaded.", self.corpus)
                } else {
                    format!("No {} was loaded.", self.corpus)
                };
            }
            _ => self.answer = HELP.to_string(),
        }
        self.answer_pane.auto_scroll = true;
        self.context_pane.auto_scroll = true;
    }

    /// Runs `job` on its own task. Every update it emits is tagged with a fresh job id.
    fn start<F, Fut>(&mut self, tx: &mpsc::UnboundedSender<Tagged>, placeholder: &str, job: F)
    where
        F: FnOnce(Arc<RagService>, Emit) -> Fut,
        Fut: Future<Output = rag::Result<()>> + Send + 'static,
    {
        self.cancel();
        self.context = None;
        self.answer = placeholder.to_string();
        let id = self.job;
        let sender = tx.clone();
        let emit: Emit = Arc::new(move |update: Update| {
            let _ = sender.send(Tagged { job: id, update });
        });
        let fut = job(self.service.clone(), emit.clone());
        self.task = Some(tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::warn!(job = id, error = %err, "job failed");
                emit(Update::Failed(err.to_string()));
            }
        }));
    }

    fn apply(&mut self, update: Update) {
        match update {
            Update::Context(context) => {
                self.context = Some(context);
                self.answer.clear();
            }
            Update::Fragment(fragment) => self.answer.push_str(&fragment),
            Update::Ingested(report) => {
                self.answer = format!(
                    "Indexed {} chunks from {} ({}).{}",
                    report.chunk_count,
                    report.label,
                    report.kind,
                    if report.replaced {
                        " The previous one was replaced."
                    } else {
                        ""
                    }
                );
                if let Some(meta) = self.service.status(report.kind).metadata
                    && meta.synthetic
                {
                    self.answer
                        .push_str("\nThe real transcript was unavailable; placeholder text was indexed.");
                }
            }
            Update::Finished => {}
            Update::Failed(err) => {
                if !self.answer.is_empty() {
                    self.answer.push_str("\n\n");
                }
                self.answer.push_str(&format!("Error: {}", err));
            }
        }
        self.context_pane.auto_scroll = true;
        self.answer_pane.auto_scroll = true;
    }

    fn focused(&mut self) -> &mut Pane {
        match self.output_focus {
            OutputFocus::Context => &mut self.context_pane,
            OutputFocus::Answer => &mut self.answer_pane,
        }
    }
}

/// Scroll state of one output pane, refreshed on every draw.
#[derive(Default)]
struct Pane {
    scroll: usize,
    content_len: usize,
    view_height: usize,
    auto_scroll: bool,
}

impl Pane {
    fn max_scroll(&self) -> usize {
        self.content_len.saturating_sub(self.view_height)
    }

    fn scroll_up(&mut self, by: usize) {
        self.scroll = self.scroll.saturating_sub(by);
    }

    fn scroll_down(&mut self, by: usize) {
        self.scroll = (self.scroll + by).min(self.max_scroll());
    }

    fn page(&self) -> usize {
        self.view_height.max(1)
    }

    /// Measures `text` against `area` and clamps the scroll offset, jumping to the
    /// bottom once if new output arrived.
    fn fit(&mut self, text: &str, area: Rect) {
        self.content_len = line_count(text);
        self.view_height = inner_height(area);
        if self.auto_scroll {
            self.scroll = self.max_scroll();
            self.auto_scroll = false;
        } else {
            self.scroll = self.scroll.min(self.max_scroll());
        }
    }
}

type Emit = Arc<dyn Fn(Update) + Send + Sync>;

/// Forwards fragments until the stream ends or fails.
async fn pump(mut fragments: AnswerStream, emit: &Emit) {
    while let Some(item) = fragments.next().await {
        match item {
            Ok(fragment) => emit(Update::Fragment(fragment)),
            Err(err) => {
                emit(Update::Failed(err.to_string()));
                return;
            }
        }
    }
    emit(Update::Finished);
}

fn describe_status(kind: CorpusKind, status: &CorpusStatus) -> String {
    if !status.ready {
        return format!("No {} loaded. Use /load to index one.", kind);
    }
    let mut out = format!(
        "{}: {} ({} chunks)",
        kind,
        status.label.as_deref().unwrap_or("untitled"),
        status.chunk_count
    );
    if let Some(meta) = &status.metadata {
        if let Some(author) = &meta.author {
            out.push_str(&format!("\nAuthor: {}", author));
        }
        if let Some(duration) = &meta.duration {
            out.push_str(&format!("\nDuration: {}", duration));
        }
        if meta.synthetic {
            out.push_str("\nTranscript: placeholder");
        }
    }
    out
}

fn inner_width(area: Rect) -> usize {
    area.width.saturating_sub(2) as usize
}

fn inner_height(area: Rect) -> usize {
    area.height.saturating_sub(2) as usize
}

/// First visible character when the input is wider than the box.
fn view_start(input: &str, cursor: usize, max_width: usize) -> usize {
    let len = input.chars().count();
    if len <= max_width {
        return 0;
    }
    let cursor = input[..cursor].chars().count();
    let start = cursor.saturating_sub(max_width / 2);
    start.min(len - max_width)
}

fn truncate_input(input: &str, cursor: usize, max_width: usize) -> String {
    let start = view_start(input, cursor, max_width);
    input.chars().skip(start).take(max_width).collect()
}

fn cursor_x_in_view(input: &str, cursor: usize, max_width: usize) -> usize {
    let start = view_start(input, cursor, max_width);
    input[..cursor]
        .chars()
        .count()
        .saturating_sub(start)
        .min(max_width)
}

fn line_count(text: &str) -> usize {
    text.lines().count().max(1)
}

fn render_pane(frame: &mut Frame, area: Rect, title: String, text: String, pane: &mut Pane) {
    pane.fit(&text, area);
    let block = Block::bordered()
        .title(title)
        .title_style(Style::default().fg(Color::Black).add_modifier(Modifier::BOLD))
        .border_style(Style::default().fg(Color::Black));
    let body = Paragraph::new(text)
        .style(Style::default().fg(Color::Blue))
        .scroll((pane.scroll as u16, 0))
        .wrap(Wrap { trim: false })
        .block(block);
    frame.render_widget(body, area);

    let mut state = ScrollbarState::new(pane.content_len).position(pane.scroll);
    let bar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
        .track_style(Style::default().fg(Color::DarkGray))
        .thumb_style(Style::default().fg(Color::Blue));
    frame.render_stateful_widget(
        bar,
        area.inner(Margin {
            vertical: 1,
            horizontal: 0,
        }),
        &mut state,
    );
}

fn draw_ui(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> io::Result<()> {
    const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];
    let loading = app.is_loading();

    terminal.draw(|frame| {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(8),
                Constraint::Length(3),
                Constraint::Length(3),
            ])
            .split(frame.area());
        let panes = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(rows[0]);

        let mark = |focus: OutputFocus| if app.output_focus == focus { " *" } else { "" };
        let context_title = format!("Context{}", mark(OutputFocus::Context));
        let answer_title = if loading {
            format!("Answer {}{}", SPINNER[app.spinner_idx], mark(OutputFocus::Answer))
        } else {
            format!("Answer{}", mark(OutputFocus::Answer))
        };
        let context_text = app.context.clone().unwrap_or_else(|| {
            "Retrieved context will appear here after you ask a question.".to_string()
        });
        let answer_text = app.answer.clone();

        render_pane(frame, panes[0], context_title, context_text, &mut app.context_pane);
        render_pane(frame, panes[1], answer_title, answer_text, &mut app.answer_pane);

        let grey = Style::default().fg(Color::DarkGray);
        let bold = Style::default().fg(Color::Black).add_modifier(Modifier::BOLD);
        let input_title = format!("Ask the {}", app.corpus);
        let width = inner_width(rows[1]);
        let input = Paragraph::new(truncate_input(&app.input, app.cursor, width))
            .style(grey)
            .block(Block::bordered().title(input_title).title_style(bold).border_style(grey));
        frame.render_widget(input, rows[1]);
        let cursor_x = cursor_x_in_view(&app.input, app.cursor, width);
        frame.set_cursor_position((rows[1].x + 1 + cursor_x as u16, rows[1].y + 1));

        let help_text = if loading {
            "Esc: Cancel | Ctrl+O: Focus | Up/Down/PgUp/PgDn/Home/End: Scroll | Ctrl+C: Quit"
        } else {
            "Enter: Ask | /help: Commands | Tab: PDF/Video | Ctrl+O: Focus | Up/Down/PgUp/PgDn/Home/End: Scroll | Esc/Ctrl+C: Quit"
        };
        let help = Paragraph::new(help_text)
            .style(grey)
            .wrap(Wrap { trim: true })
            .block(Block::bordered().title("Controls").title_style(bold).border_style(grey));
        frame.render_widget(help, rows[2]);
    })?;

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> io::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Tagged>();
    let mut events = EventStream::new();
    let mut spinner_tick = tokio::time::interval(Duration::from_millis(100));
    spinner_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    draw_ui(terminal, app)?;

    loop {
        tokio::select! {
            _ = spinner_tick.tick() => {
                if app.is_loading() {
                    app.spinner_idx = (app.spinner_idx + 1) % 4;
                    draw_ui(terminal, app)?;
                }
            }
            Some(tagged) = rx.recv() => {
                if tagged.job == app.job {
                    app.apply(tagged.update);
                    draw_ui(terminal, app)?;
                }
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        match key.code {
                            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                            KeyCode::Esc if app.is_loading() => app.cancel(),
                            KeyCode::Esc => return Ok(()),
                            KeyCode::Enter => app.submit(&tx),
                            KeyCode::Up => app.focused().scroll_up(1),
                            KeyCode::Down => app.focused().scroll_down(1),
                            KeyCode::PageUp => {
                                let pane = app.focused();
                                pane.scroll_up(pane.page());
                            }
                            KeyCode::PageDown => {
                                let pane = app.focused();
                                pane.scroll_down(pane.page());
                            }
                            KeyCode::Home => app.focused().scroll = 0,
                            KeyCode::End => {
                                let pane = app.focused();
                                pane.scroll = pane.max_scroll();
                            }
                            KeyCode::Char('o') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                                app.output_focus = match app.output_focus {
                                    OutputFocus::Context => OutputFocus::Answer,
                                    OutputFocus::Answer => OutputFocus::Context,
                                };
                            }
                            KeyCode::Tab if !app.is_loading() => app.toggle_corpus(),
                            KeyCode::Left => app.move_left(),
                            KeyCode::Right => app.move_right(),
                            KeyCode::Backspace => app.delete_char(),
                            KeyCode::Char(ch) => app.insert_char(ch),
                            _ => {}
                        }
                        draw_ui(terminal, app)?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => {}
                    None => return Ok(()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_view_follows_the_cursor() {
        let input = "héllo wörld";
        assert_eq!(truncate_input(input, input.len(), 20), input);
        let end = input.len();
        assert_eq!(truncate_input(input, end, 5), "wörld");
        assert_eq!(cursor_x_in_view(input, end, 5), 5);
        assert_eq!(truncate_input(input, 0, 5), "héllo");
        assert_eq!(cursor_x_in_view(input, 0, 5), 0);
    }

    #[test]
    fn status_text_covers_absent_and_ready() {
        let absent = describe_status(CorpusKind::Video, &CorpusStatus::default());
        assert!(absent.contains("No video loaded"));

        let ready = CorpusStatus {
            ready: true,
            chunk_count: 12,
            label: Some("paper.pdf".to_string()),
            metadata: None,
        };
        assert_eq!(describe_status(CorpusKind::Pdf, &ready), "PDF: paper.pdf (12 chunks)");
    }
}
