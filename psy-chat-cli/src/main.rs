mod accessory;
mod client;
mod speech;
mod video;

use accessory::{parse_command, Accessory};
use anyhow::Result;
use clap::Parser;
use client::{BackendClient, ConnectionStatus};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use psy_chat_shared::{Author, ChatMessage, ServerEvent};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame, Terminal,
};
use speech::{EspeakEngine, Gender, Speaker, VOICE_POLL_INTERVAL};
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info};
use video::VideoCue;

const TICK_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "psy-chat", about = "Terminal client for the psy-chat relay server")]
struct Args {
    /// WebSocket endpoint of the relay server
    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    server: String,

    /// Read AI replies aloud
    #[arg(long)]
    speech: bool,

    /// Speech synthesizer binary
    #[arg(long, default_value = "espeak-ng")]
    speech_program: String,

    /// Only voices for this language are offered
    #[arg(long, default_value = "ru-RU")]
    voice_lang: String,

    #[arg(long, value_enum, default_value_t = Gender::Female)]
    gender: Gender,

    /// Clip offered in the gallery; repeat for more (pick one with /thumb <n>)
    #[arg(long = "video", value_name = "PATH")]
    video_gallery: Vec<String>,

    #[arg(long, default_value = "psy-chat.log")]
    log_file: String,
}

enum Entry {
    Chat(ChatMessage),
    /// Local feedback that never went over the wire.
    Notice(String),
}

struct App {
    entries: Vec<Entry>,
    input: String,
    /// Cursor position in characters, not bytes.
    cursor_position: usize,
    scroll_offset: usize,
    connection_status: ConnectionStatus,
    accessories: Vec<Box<dyn Accessory>>,
}

impl App {
    fn new(accessories: Vec<Box<dyn Accessory>>) -> Self {
        Self {
            entries: vec![],
            input: String::new(),
            cursor_position: 0,
            scroll_offset: 0,
            connection_status: ConnectionStatus::Disconnected,
            accessories,
        }
    }

    /// Takes the input line. Returns the text to send, or `None` when the
    /// line was empty or consumed by an accessory command.
    fn submit(&mut self, now: Instant) -> Option<String> {
        if self.input.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.input);
        self.cursor_position = 0;
        self.scroll_to_bottom();

        if let Some((command, arg)) = parse_command(&text) {
            let feedback = self
                .accessories
                .iter_mut()
                .find_map(|accessory| accessory.handle_command(command, arg));
            if let Some(feedback) = feedback {
                self.entries.push(Entry::Notice(feedback));
                return None;
            }
        }

        for accessory in &mut self.accessories {
            accessory.on_submit(now);
        }
        Some(text)
    }

    fn receive(&mut self, event: ServerEvent) {
        let ServerEvent::ChatMessage(message) = event;
        if message.is_ai() {
            for accessory in &mut self.accessories {
                accessory.on_ai_message(&message.text);
            }
        }
        self.entries.push(Entry::Chat(message));
        self.scroll_to_bottom();
    }

    fn tick(&mut self, now: Instant) {
        for accessory in &mut self.accessories {
            accessory.on_tick(now);
        }
    }

    fn notice(&mut self, text: String) {
        self.entries.push(Entry::Notice(text));
        self.scroll_to_bottom();
    }

    fn byte_index(&self) -> usize {
        self.input
            .char_indices()
            .nth(self.cursor_position)
            .map_or(self.input.len(), |(i, _)| i)
    }

    fn move_cursor_left(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
        }
    }

    fn move_cursor_right(&mut self) {
        if self.cursor_position < self.input.chars().count() {
            self.cursor_position += 1;
        }
    }

    fn insert_char(&mut self, c: char) {
        let index = self.byte_index();
        self.input.insert(index, c);
        self.cursor_position += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_position > 0 {
            self.cursor_position -= 1;
            let index = self.byte_index();
            self.input.remove(index);
        }
    }

    fn scroll_up(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_add(amount);
    }

    fn scroll_down(&mut self, amount: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(amount);
    }

    fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to a file so they don't corrupt the TUI
    if let Ok(file) = std::fs::File::create(&args.log_file) {
        tracing_subscriber::fmt()
            .with_writer(file)
            .with_ansi(false)
            .init();
    }

    let mut accessories: Vec<Box<dyn Accessory>> = Vec::new();
    if args.speech {
        let voices = speech::watch_voices(args.speech_program.clone(), VOICE_POLL_INTERVAL);
        let engine = EspeakEngine::new(args.speech_program.clone());
        accessories.push(Box::new(Speaker::new(
            engine,
            voices,
            args.voice_lang.clone(),
            args.gender,
        )));
    }
    accessories.push(Box::new(VideoCue::new(args.video_gallery.clone())));

    let mut app = App::new(accessories);
    info!("Connecting to {}", args.server);
    let (client, mut event_rx, mut status_rx) = BackendClient::new(args.server.clone());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(event) = event::read() {
            if ui_tx.send(event).is_err() {
                break;
            }
        }
    });

    let res = run_app(&mut terminal, &mut app, client, &mut event_rx, &mut status_rx, &mut ui_rx).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    client: BackendClient,
    event_rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
    status_rx: &mut mpsc::UnboundedReceiver<ConnectionStatus>,
    ui_rx: &mut mpsc::UnboundedReceiver<Event>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);

    loop {
        terminal.draw(|f| ui(f, app))?;

        tokio::select! {
            _ = ticker.tick() => {
                app.tick(Instant::now());
            }
            Some(new_status) = status_rx.recv() => {
                app.connection_status = new_status;
            }
            Some(event) = event_rx.recv() => {
                app.receive(event);
            }
            Some(event) = ui_rx.recv() => {
                match event {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        match key.code {
                            KeyCode::Char('q') if key.modifiers.contains(event::KeyModifiers::CONTROL) => {
                                return Ok(())
                            }
                            KeyCode::Char('c') if key.modifiers.contains(event::KeyModifiers::CONTROL) => {
                                return Ok(())
                            }
                            KeyCode::Char(c) => app.insert_char(c),
                            KeyCode::Backspace => app.delete_char(),
                            KeyCode::Left => app.move_cursor_left(),
                            KeyCode::Right => app.move_cursor_right(),
                            KeyCode::Enter => {
                                if let Some(text) = app.submit(Instant::now()) {
                                    if let Err(e) = client.send_message(text) {
                                        error!("Failed to send message: {}", e);
                                        app.notice(format!("Failed to send message: {}", e));
                                    }
                                }
                            }
                            KeyCode::Up => app.scroll_up(1),
                            KeyCode::Down => app.scroll_down(1),
                            KeyCode::PageUp => app.scroll_up(10),
                            KeyCode::PageDown => app.scroll_down(10),
                            KeyCode::Home => app.cursor_position = 0,
                            KeyCode::End => app.cursor_position = app.input.chars().count(),
                            _ => {}
                        }
                    }
                    Event::Mouse(mouse) => match mouse.kind {
                        event::MouseEventKind::ScrollUp => app.scroll_up(3),
                        event::MouseEventKind::ScrollDown => app.scroll_down(3),
                        _ => {}
                    },
                    _ => {}
                }
            }
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // connection + accessory status
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_status(f, app, chunks[0]);
    render_chat(f, app, chunks[1]);
    render_input(f, app, chunks[2]);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let (color, text) = match &app.connection_status {
        ConnectionStatus::Connected => (Color::Green, "● Connected".to_string()),
        ConnectionStatus::Connecting => (Color::Yellow, "● Connecting...".to_string()),
        ConnectionStatus::Disconnected => (Color::Red, "● Disconnected".to_string()),
        ConnectionStatus::Error(e) => (Color::Red, format!("● Error: {}", e)),
    };

    let mut spans = vec![Span::styled(text, Style::default().fg(color))];
    for status in app.accessories.iter().filter_map(|a| a.status()) {
        spans.push(Span::raw("   "));
        spans.push(Span::styled(status, Style::default().fg(Color::Magenta)));
    }

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_chat(f: &mut Frame, app: &App, area: Rect) {
    let mut all_lines: Vec<Line> = Vec::new();

    for entry in &app.entries {
        let (prefix, style, text) = match entry {
            Entry::Chat(msg) => match msg.user {
                Author::You => ("You", Style::default().fg(Color::Cyan), &msg.text),
                Author::Ai => ("AI", Style::default().fg(Color::Green), &msg.text),
            },
            Entry::Notice(text) => ("System", Style::default().fg(Color::Yellow), text),
        };

        all_lines.push(Line::from(Span::styled(
            format!("{}:", prefix),
            style.add_modifier(Modifier::BOLD),
        )));
        for line in text.lines() {
            all_lines.push(Line::from(Span::styled(line.to_string(), style)));
        }
        all_lines.push(Line::from(""));
    }

    let total_lines = all_lines.len();
    let visible_height = area.height as usize;

    let start_line = if total_lines > visible_height {
        let max_scroll = total_lines - visible_height;
        let actual_scroll = app.scroll_offset.min(max_scroll);
        max_scroll - actual_scroll
    } else {
        0
    };

    let end_line = (start_line + visible_height).min(total_lines);
    let visible_lines: Vec<Line> = all_lines[start_line..end_line].to_vec();

    let chat = Paragraph::new(visible_lines)
        .block(Block::default().borders(Borders::NONE))
        .wrap(Wrap { trim: false });

    f.render_widget(chat, area);
}

fn render_input(f: &mut Frame, app: &App, area: Rect) {
    let (input_text, style) = if app.input.is_empty() {
        ("Type your message...", Style::default().fg(Color::DarkGray))
    } else {
        (app.input.as_str(), Style::default())
    };

    let input = Paragraph::new(input_text)
        .style(style)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Input (Enter to send, Ctrl-Q to quit, /voices /gender /thumbs /thumb /video)")
                .border_style(Style::default().fg(Color::White)),
        )
        .wrap(Wrap { trim: true });

    f.render_widget(input, area);

    if !app.input.is_empty() {
        f.set_cursor_position(input_cursor(area, app.cursor_position));
    }
}

/// Cursor cell inside the bordered input box, clamped to its inner width.
fn input_cursor(area: Rect, cursor_position: usize) -> (u16, u16) {
    let offset = u16::try_from(cursor_position).unwrap_or(u16::MAX);
    let cursor_x = area.x.saturating_add(offset).saturating_add(1);
    let last_x = area.x.saturating_add(area.width.saturating_sub(2));
    (cursor_x.min(last_x), area.y.saturating_add(1))
}
