use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use futures_util::StreamExt;
use game0_core::{
    chat::ChatClient,
    config::Config,
    document::ExtractedGame,
    error::Game0Error,
    extract::{extract, FenceState},
    generation::{AttemptInfo, AttemptOutcome, GenerationObserver, Generator, HttpGenerationBackend},
    http_client::HttpClient,
    model::{AssistantTurn, Conversation, Role, UiMessage},
    preview::SandboxedPreview,
    prompt::{PromptCache, PROMPT_GAME_PLANNING},
    puzzle::{overlay::run_overlay, overlay::OverlayExit, Input, PuzzleGame},
    telemetry::{set_telemetry_sink, GenerationLog, TelemetrySink},
    viewer::CodeViewer,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Plan, generate and preview single-file HTML games", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan a game over the chat endpoint, then generate and preview it
    Run {
        #[arg(short, long, help = "Describe the game you want")]
        message: String,
        #[arg(long, help = "Directory for game.html and preview.html")]
        out: Option<PathBuf>,
        #[arg(long, help = "Play the falling-block puzzle while the game generates")]
        waiting_game: bool,
    },
    /// Generate from a saved conversation (JSON array of messages)
    Generate {
        #[arg(long)]
        history: PathBuf,
        #[arg(long, help = "Assistant turn that triggers generation (default: last assistant message)")]
        turn_id: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        waiting_game: bool,
    },
    /// Extract and wrap the game from a saved model reply
    Extract {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Play the waiting puzzle on its own (arrows move, up rotates, space drops, p pauses, r restarts)
    Puzzle {
        #[arg(long, default_value_t = 30)]
        seconds: u64,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    set_telemetry_sink(Arc::new(LogSink));

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Run {
            message,
            out,
            waiting_game,
        } => {
            let http = HttpClient::from_cfg(&cfg.http)?;
            let prompts = Arc::new(PromptCache::from_config(&cfg.prompts, &http));
            let planning = match prompts.get(PROMPT_GAME_PLANNING).await {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!(error = %e, "planning prompt unavailable, sending without a system prompt");
                    None
                }
            };

            let mut conversation: Conversation = vec![UiMessage::text(
                uuid::Uuid::new_v4().to_string(),
                Role::User,
                message,
            )];
            let chat = ChatClient::from_config(&cfg, http.clone());
            let turn = chat
                .complete_turn(conversation.clone(), planning, |delta| {
                    print!("{delta}");
                    io::stdout().flush().ok();
                })
                .await?;
            println!();
            conversation.push(turn.clone().into_message());

            let generator = Generator::new(Arc::new(HttpGenerationBackend::from_config(&cfg, http)))
                .with_prompts(prompts)
                .with_max_lines(cfg.viewer.max_lines);
            let out = out.unwrap_or_else(|| PathBuf::from(&cfg.output.dir));
            generate_and_preview(&cfg, &generator, &turn, conversation, waiting_game, &out).await?;
        }
        Commands::Generate {
            history,
            turn_id,
            out,
            waiting_game,
        } => {
            let raw = tokio::fs::read_to_string(&history)
                .await
                .with_context(|| format!("reading {}", history.display()))?;
            let conversation: Conversation =
                serde_json::from_str(&raw).context("history must be a JSON array of messages")?;
            let turn = pick_turn(&conversation, turn_id.as_deref())?;

            let http = HttpClient::from_cfg(&cfg.http)?;
            let prompts = Arc::new(PromptCache::from_config(&cfg.prompts, &http));
            let generator = Generator::new(Arc::new(HttpGenerationBackend::from_config(&cfg, http)))
                .with_prompts(prompts)
                .with_max_lines(cfg.viewer.max_lines);
            let out = out.unwrap_or_else(|| PathBuf::from(&cfg.output.dir));
            generate_and_preview(&cfg, &generator, &turn, conversation, waiting_game, &out).await?;
        }
        Commands::Extract { input, out } => {
            let reply = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let Some(extraction) = extract(&reply) else {
                bail!("no ```html block or html document found in {}", input.display());
            };
            let out = out.unwrap_or_else(|| PathBuf::from(&cfg.output.dir));
            write_preview(ExtractedGame::from_extraction(extraction), &out).await?;
        }
        Commands::Puzzle { seconds, seed } => {
            let game = match seed {
                Some(seed) => PuzzleGame::with_seed(&cfg.puzzle, seed),
                None => PuzzleGame::new(&cfg.puzzle),
            };
            let game = Arc::new(Mutex::new(game));
            let token = CancellationToken::new();
            let stopper = {
                let token = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                        _ = tokio::signal::ctrl_c() => {}
                    }
                    token.cancel();
                })
            };
            let keys = KeyInput::start(game.clone(), token.clone(), {
                let token = token.clone();
                move || token.cancel()
            });
            run_puzzle_loop(game, &cfg, token.clone(), |g| draw_frame(None, Some(g))).await;
            token.cancel();
            keys.finish().await;
            stopper.abort();
        }
    }

    Ok(())
}

/// Writes each attempt record to the log under the `game0::telemetry` target.
struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, log: GenerationLog) {
        let fields = log
            .attributes()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!(target: "game0::telemetry", "{fields}");
    }
}

/// The turn to generate from: `turn_id` if given, else the last assistant message.
fn pick_turn(conversation: &Conversation, turn_id: Option<&str>) -> anyhow::Result<AssistantTurn> {
    let found = match turn_id {
        Some(id) => conversation.iter().find(|m| m.id == id),
        None => conversation.iter().rev().find(|m| m.role == Role::Assistant),
    };
    let Some(message) = found else {
        bail!("history has no assistant turn to generate from");
    };
    Ok(AssistantTurn {
        id: message.id.clone(),
        text: message.joined_text(),
    })
}

async fn generate_and_preview(
    cfg: &Config,
    generator: &Generator,
    turn: &AssistantTurn,
    conversation: Conversation,
    waiting_game: bool,
    out: &Path,
) -> anyhow::Result<()> {
    let viewer = Arc::new(Mutex::new(CodeViewer::new(&cfg.viewer)));
    let mut live = LiveView::new(viewer.clone(), !waiting_game);

    let overlay_token = CancellationToken::new();
    let mut keys = None;
    let overlay = waiting_game.then(|| {
        let game = Arc::new(Mutex::new(PuzzleGame::new(&cfg.puzzle)));
        keys = Some(KeyInput::start(game.clone(), overlay_token.clone(), {
            let generator = generator.clone();
            move || {
                generator.cancel();
            }
        }));
        let cfg = cfg.clone();
        let token = overlay_token.clone();
        let viewer = viewer.clone();
        tokio::spawn(async move {
            run_puzzle_loop(game, &cfg, token, |g| {
                let v = viewer.lock().unwrap_or_else(PoisonError::into_inner);
                draw_frame(Some(&v), Some(g));
            })
            .await
        })
    });

    let ctrl_c = {
        let generator = generator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                generator.cancel();
            }
        })
    };

    let result = generator.on_turn_completed(turn, conversation, &mut live).await;
    overlay_token.cancel();
    if let Some(handle) = overlay {
        handle.await.ok();
    }
    if let Some(keys) = keys {
        keys.finish().await;
    }
    ctrl_c.abort();

    match result? {
        AttemptOutcome::Completed(game) => write_preview(game, out).await?,
        AttemptOutcome::NoGame => bail!("the generated reply contained no ```html block or html document"),
        AttemptOutcome::Cancelled => eprintln!("generation cancelled"),
        AttemptOutcome::Skipped(reason) => eprintln!("generation skipped: {reason:?}"),
    }
    Ok(())
}

async fn write_preview(game: ExtractedGame, out: &Path) -> anyhow::Result<()> {
    let mut preview = SandboxedPreview::new();
    preview.replace(game);
    if let Some(files) = preview.write_to(out).await? {
        println!("game:    {}", files.game.display());
        println!("preview: {}", files.host.display());
    }
    Ok(())
}

/// Keep the puzzle going until `token` fires, restarting after each game over.
async fn run_puzzle_loop<F>(game: Arc<Mutex<PuzzleGame>>, cfg: &Config, token: CancellationToken, mut on_frame: F)
where
    F: FnMut(&PuzzleGame),
{
    loop {
        let exit = run_overlay(game.clone(), &cfg.puzzle, token.clone(), &mut on_frame).await;
        if exit == OverlayExit::Cancelled {
            break;
        }
        let mut g = game.lock().unwrap_or_else(PoisonError::into_inner);
        g.reset(tokio::time::Instant::now());
    }
}

/// Redraws the code view as deltas arrive. With the puzzle running, the
/// overlay timer draws frames instead and this only feeds the viewer.
struct LiveView {
    viewer: Arc<Mutex<CodeViewer>>,
    redraw: bool,
    last_draw: Option<Instant>,
}

impl LiveView {
    const MIN_REDRAW: Duration = Duration::from_millis(50);

    fn new(viewer: Arc<Mutex<CodeViewer>>, redraw: bool) -> Self {
        Self {
            viewer,
            redraw,
            last_draw: None,
        }
    }

    fn draw(&mut self, force: bool) {
        if !self.redraw {
            return;
        }
        if !force && self.last_draw.is_some_and(|t| t.elapsed() < Self::MIN_REDRAW) {
            return;
        }
        self.last_draw = Some(Instant::now());
        let v = self.viewer.lock().unwrap_or_else(PoisonError::into_inner);
        draw_frame(Some(&v), None);
    }
}

impl GenerationObserver for LiveView {
    fn on_start(&mut self, attempt: &AttemptInfo) {
        self.viewer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_start(attempt);
        self.draw(true);
    }

    fn on_delta(&mut self, delta: &str) {
        self.viewer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_delta(delta);
        self.draw(false);
    }

    fn on_finish(&mut self, _outcome: &AttemptOutcome) {
        self.draw(true);
    }

    fn on_error(&mut self, _error: &Game0Error) {
        self.draw(true);
    }
}

/// What a keypress means while the waiting game is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Puzzle(Input),
    Quit,
}

fn key_action(key: KeyEvent) -> Option<KeyAction> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return matches!(key.code, KeyCode::Char('c' | 'd')).then_some(KeyAction::Quit);
    }
    let input = match key.code {
        KeyCode::Left => Input::Left,
        KeyCode::Right => Input::Right,
        KeyCode::Down => Input::SoftDrop,
        KeyCode::Up => Input::Rotate,
        KeyCode::Char(' ') => Input::HardDrop,
        KeyCode::Char('p' | 'P') => Input::TogglePause,
        KeyCode::Char('r' | 'R') => Input::Restart,
        KeyCode::Esc => return Some(KeyAction::Quit),
        _ => return None,
    };
    Some(KeyAction::Puzzle(input))
}

/// Restores cooked mode on drop.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        terminal::disable_raw_mode().ok();
    }
}

/// Keyboard control of the puzzle. Inactive when stdin is not a terminal.
struct KeyInput {
    task: Option<tokio::task::JoinHandle<()>>,
    _raw: Option<RawMode>,
}

impl KeyInput {
    /// Forward keypresses to `game` until `token` fires. Ctrl-C and Esc call `on_quit`,
    /// since raw mode swallows the interrupt signal.
    fn start<F>(game: Arc<Mutex<PuzzleGame>>, token: CancellationToken, on_quit: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        if !io::stdin().is_terminal() {
            return Self { task: None, _raw: None };
        }
        let raw = match RawMode::enable() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "raw mode unavailable, puzzle runs unattended");
                return Self { task: None, _raw: None };
            }
        };
        let task = tokio::spawn(async move {
            let mut events = EventStream::new();
            loop {
                let event = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    event = events.next() => event,
                };
                match event {
                    Some(Ok(Event::Key(key))) => match key_action(key) {
                        Some(KeyAction::Puzzle(input)) => {
                            let mut g = game.lock().unwrap_or_else(PoisonError::into_inner);
                            g.apply(input, tokio::time::Instant::now());
                        }
                        Some(KeyAction::Quit) => on_quit(),
                        None => {}
                    },
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "reading keyboard input failed");
                        return;
                    }
                    None => return,
                }
            }
        });
        Self {
            task: Some(task),
            _raw: Some(raw),
        }
    }

    /// Wait for the reader to stop, then leave raw mode.
    async fn finish(mut self) {
        if let Some(task) = self.task.take() {
            task.await.ok();
        }
    }
}

/// Clear the terminal and draw the puzzle (left) beside the code view (right).
fn draw_frame(viewer: Option<&CodeViewer>, puzzle: Option<&PuzzleGame>) {
    let code = viewer.map(CodeViewer::render_ansi).unwrap_or_default();
    let board = puzzle.map(PuzzleGame::render_ansi).unwrap_or_default();
    let blank_board = " ".repeat(20);

    let mut frame = String::from("\x1b[H\x1b[2J");
    if let Some(v) = viewer {
        let p = v.progress();
        let block = match v.fence_state() {
            FenceState::Absent => "",
            FenceState::Open => ", html block open",
            FenceState::Closed => ", html block complete",
        };
        frame.push_str(&format!("generating: {} bytes, {} lines{block}\r\n", p.bytes, p.lines));
    }
    for i in 0..code.len().max(board.len()) {
        if puzzle.is_some() {
            frame.push_str(board.get(i).map_or(blank_board.as_str(), String::as_str));
            frame.push_str("  ");
        }
        if let Some(line) = code.get(i) {
            frame.push_str(line);
        }
        frame.push_str("\r\n");
    }
    let mut stdout = io::stdout().lock();
    stdout.write_all(frame.as_bytes()).ok();
    stdout.flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Conversation {
        vec![
            UiMessage::text("u1", Role::User, "snake"),
            UiMessage::text("a1", Role::Assistant, "plan one"),
            UiMessage::text("u2", Role::User, "faster"),
            UiMessage::text("a2", Role::Assistant, "plan two"),
        ]
    }

    #[test]
    fn picks_last_assistant_turn_by_default() {
        let turn = pick_turn(&history(), None).unwrap();
        assert_eq!(turn.id, "a2");
        assert_eq!(turn.text, "plan two");
    }

    #[test]
    fn picks_explicit_turn() {
        let turn = pick_turn(&history(), Some("a1")).unwrap();
        assert_eq!(turn.text, "plan one");
        assert!(pick_turn(&history(), Some("nope")).is_err());
    }

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn arrow_keys_drive_the_puzzle() {
        let none = KeyModifiers::NONE;
        assert_eq!(key_action(press(KeyCode::Left, none)), Some(KeyAction::Puzzle(Input::Left)));
        assert_eq!(key_action(press(KeyCode::Up, none)), Some(KeyAction::Puzzle(Input::Rotate)));
        assert_eq!(key_action(press(KeyCode::Down, none)), Some(KeyAction::Puzzle(Input::SoftDrop)));
        assert_eq!(
            key_action(press(KeyCode::Char(' '), none)),
            Some(KeyAction::Puzzle(Input::HardDrop))
        );
        assert_eq!(
            key_action(press(KeyCode::Char('P'), KeyModifiers::SHIFT)),
            Some(KeyAction::Puzzle(Input::TogglePause))
        );
        assert_eq!(key_action(press(KeyCode::Char('r'), none)), Some(KeyAction::Puzzle(Input::Restart)));
        assert_eq!(key_action(press(KeyCode::Char('x'), none)), None);
    }

    #[test]
    fn ctrl_c_and_escape_quit() {
        assert_eq!(key_action(press(KeyCode::Char('c'), KeyModifiers::CONTROL)), Some(KeyAction::Quit));
        assert_eq!(key_action(press(KeyCode::Esc, KeyModifiers::NONE)), Some(KeyAction::Quit));
        assert_eq!(key_action(press(KeyCode::Char('p'), KeyModifiers::CONTROL)), None);
    }

    #[test]
    fn key_release_is_ignored() {
        let mut key = press(KeyCode::Left, KeyModifiers::NONE);
        key.kind = KeyEventKind::Release;
        assert_eq!(key_action(key), None);
    }

    #[test]
    fn cli_parses_run() {
        let cli = Cli::parse_from(["game0", "--config", "g.toml", "run", "-m", "pong", "--waiting-game"]);
        assert_eq!(cli.config.as_deref(), Some(Path::new("g.toml")));
        assert!(matches!(
            cli.command,
            Commands::Run { ref message, waiting_game: true, .. } if message == "pong"
        ));
    }
}
