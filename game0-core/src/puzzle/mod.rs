//! Falling-block puzzle that keeps the user busy while a game generates.
//!
//! Pure state machine: every action takes the current instant and returns a
//! [`StepOutcome`]. Locking a piece, clearing rows and spawning the next piece
//! all happen inside one step. The overlay timer lives in [`overlay`].

pub mod board;
pub mod overlay;
pub mod piece;

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::config::PuzzleCfg;
pub use board::{Board, BOARD_HEIGHT, BOARD_WIDTH};
pub use piece::{Piece, PieceColor, PieceKind, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Falling,
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Not applicable in the current phase, paused, or not yet due.
    Ignored,
    Moved,
    Blocked,
    Locked { cleared: usize },
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Left,
    Right,
    SoftDrop,
    Rotate,
    HardDrop,
    TogglePause,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellView {
    Empty,
    Ghost,
    Active(PieceColor),
    Locked(PieceColor),
}

#[derive(Debug, Clone)]
pub struct PuzzleGame {
    board: Board,
    current: Option<Piece>,
    phase: Phase,
    paused: bool,
    rng: StdRng,
    drop_interval: Duration,
    last_drop: Instant,
    rows_cleared: u64,
    pieces_locked: u64,
    /// A player has sent input; attract nudges stop.
    attended: bool,
}

impl PuzzleGame {
    pub fn new(cfg: &PuzzleCfg) -> Self {
        Self::with_rng(cfg, StdRng::from_os_rng())
    }

    /// Deterministic piece sequence.
    pub fn with_seed(cfg: &PuzzleCfg, seed: u64) -> Self {
        Self::with_rng(cfg, StdRng::seed_from_u64(seed))
    }

    fn with_rng(cfg: &PuzzleCfg, rng: StdRng) -> Self {
        Self {
            board: Board::new(),
            current: None,
            phase: Phase::Idle,
            paused: false,
            rng,
            drop_interval: Duration::from_millis(cfg.drop_interval_ms),
            last_drop: Instant::now(),
            rows_cleared: 0,
            pieces_locked: 0,
            attended: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_over(&self) -> bool {
        self.phase == Phase::GameOver
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn current(&self) -> Option<&Piece> {
        self.current.as_ref()
    }

    pub fn rows_cleared(&self) -> u64 {
        self.rows_cleared
    }

    pub fn pieces_locked(&self) -> u64 {
        self.pieces_locked
    }

    pub fn is_attended(&self) -> bool {
        self.attended
    }

    fn active(&self) -> bool {
        self.phase == Phase::Falling && !self.paused && self.current.is_some()
    }

    fn random_kind(&mut self) -> PieceKind {
        PieceKind::ALL[self.rng.random_range(0..PieceKind::ALL.len())]
    }

    /// Spawn a fresh piece; a blocked spawn ends the game.
    fn spawn(&mut self) -> bool {
        let piece = Piece::spawn(self.random_kind());
        if self.board.collides(&piece, piece.position) {
            self.current = None;
            self.phase = Phase::GameOver;
            tracing::debug!(
                rows_cleared = self.rows_cleared,
                pieces = self.pieces_locked,
                "puzzle over"
            );
            false
        } else {
            self.current = Some(piece);
            true
        }
    }

    pub fn start(&mut self, now: Instant) -> StepOutcome {
        if self.phase != Phase::Idle {
            return StepOutcome::Ignored;
        }
        self.phase = Phase::Falling;
        self.last_drop = now;
        if self.spawn() {
            StepOutcome::Moved
        } else {
            StepOutcome::GameOver
        }
    }

    /// Clear the board and start over.
    pub fn reset(&mut self, now: Instant) -> StepOutcome {
        self.board = Board::new();
        self.current = None;
        self.phase = Phase::Idle;
        self.paused = false;
        self.rows_cleared = 0;
        self.pieces_locked = 0;
        self.start(now)
    }

    /// Gravity: one row down once `drop_interval` has elapsed since the last descent.
    pub fn tick(&mut self, now: Instant) -> StepOutcome {
        if !self.active() || now.duration_since(self.last_drop) < self.drop_interval {
            return StepOutcome::Ignored;
        }
        self.last_drop = now;
        self.descend()
    }

    pub fn soft_drop(&mut self, now: Instant) -> StepOutcome {
        if !self.active() {
            return StepOutcome::Ignored;
        }
        self.last_drop = now;
        self.descend()
    }

    pub fn move_left(&mut self) -> StepOutcome {
        self.shift(-1)
    }

    pub fn move_right(&mut self) -> StepOutcome {
        self.shift(1)
    }

    fn shift(&mut self, dx: i32) -> StepOutcome {
        if !self.active() {
            return StepOutcome::Ignored;
        }
        let Some(piece) = self.current.as_mut() else {
            return StepOutcome::Ignored;
        };
        let target = piece.position.offset(dx, 0);
        if self.board.collides(piece, target) {
            return StepOutcome::Blocked;
        }
        piece.position = target;
        StepOutcome::Moved
    }

    /// Rotate clockwise in place; a colliding rotation is a no-op.
    pub fn rotate(&mut self) -> StepOutcome {
        if !self.active() {
            return StepOutcome::Ignored;
        }
        let Some(piece) = self.current.as_mut() else {
            return StepOutcome::Ignored;
        };
        let rotated = piece.rotated();
        if self.board.collides(&rotated, rotated.position) {
            return StepOutcome::Blocked;
        }
        *piece = rotated;
        StepOutcome::Moved
    }

    pub fn hard_drop(&mut self) -> StepOutcome {
        if !self.active() {
            return StepOutcome::Ignored;
        }
        if let (Some(ghost), Some(piece)) = (self.ghost_position(), self.current.as_mut()) {
            piece.position = ghost;
        }
        self.lock_current()
    }

    pub fn pause(&mut self) -> bool {
        if self.phase != Phase::Falling || self.paused {
            return false;
        }
        self.paused = true;
        true
    }

    /// Resume and restart the gravity clock from `now`.
    pub fn resume(&mut self, now: Instant) -> bool {
        if !self.paused {
            return false;
        }
        self.paused = false;
        self.last_drop = now;
        true
    }

    pub fn toggle_pause(&mut self, now: Instant) -> bool {
        if self.paused {
            self.resume(now)
        } else {
            self.pause()
        }
    }

    /// Dispatch a player input. `Restart` only applies once the game is over.
    /// From the first input on, `attract_step` leaves the piece alone.
    pub fn apply(&mut self, input: Input, now: Instant) -> StepOutcome {
        self.attended = true;
        match input {
            Input::Left => self.move_left(),
            Input::Right => self.move_right(),
            Input::SoftDrop => self.soft_drop(now),
            Input::Rotate => self.rotate(),
            Input::HardDrop => self.hard_drop(),
            Input::TogglePause => {
                if self.toggle_pause(now) {
                    StepOutcome::Moved
                } else {
                    StepOutcome::Ignored
                }
            }
            Input::Restart if self.is_over() => self.reset(now),
            Input::Restart => StepOutcome::Ignored,
        }
    }

    /// Unattended play: occasionally nudge or turn the falling piece.
    pub fn attract_step(&mut self) -> StepOutcome {
        if self.attended || !self.active() {
            return StepOutcome::Ignored;
        }
        match self.rng.random_range(0..12u8) {
            0 => self.move_left(),
            1 => self.move_right(),
            2 => self.rotate(),
            _ => StepOutcome::Ignored,
        }
    }

    fn descend(&mut self) -> StepOutcome {
        let Some(piece) = self.current.as_mut() else {
            return StepOutcome::Ignored;
        };
        let below = piece.position.offset(0, 1);
        if self.board.collides(piece, below) {
            return self.lock_current();
        }
        piece.position = below;
        StepOutcome::Moved
    }

    fn lock_current(&mut self) -> StepOutcome {
        let Some(piece) = self.current.take() else {
            return StepOutcome::Ignored;
        };
        self.board.lock(&piece);
        self.pieces_locked += 1;
        let cleared = self.board.clear_full_rows();
        self.rows_cleared += cleared as u64;
        if self.spawn() {
            StepOutcome::Locked { cleared }
        } else {
            StepOutcome::GameOver
        }
    }

    /// Lowest position the current piece can fall to.
    pub fn ghost_position(&self) -> Option<Position> {
        let piece = self.current.as_ref()?;
        let mut pos = piece.position;
        while !self.board.collides(piece, pos.offset(0, 1)) {
            pos = pos.offset(0, 1);
        }
        Some(pos)
    }

    /// Locked cells, then the ghost, then the active piece on top.
    pub fn render(&self) -> Vec<Vec<CellView>> {
        let mut view: Vec<Vec<CellView>> = self
            .board
            .rows()
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.map_or(CellView::Empty, CellView::Locked))
                    .collect()
            })
            .collect();
        let Some(piece) = &self.current else {
            return view;
        };
        let mut paint = |x: i32, y: i32, cell: CellView| {
            if (0..BOARD_WIDTH as i32).contains(&x) && (0..BOARD_HEIGHT as i32).contains(&y) {
                view[y as usize][x as usize] = cell;
            }
        };
        if let Some(ghost) = self.ghost_position() {
            for (x, y) in piece.cells_at(ghost) {
                paint(x, y, CellView::Ghost);
            }
        }
        for (x, y) in piece.cells() {
            paint(x, y, CellView::Active(piece.color));
        }
        view
    }

    /// ASCII frame: `.` empty, `:` ghost, `#` active, a piece letter for locked cells.
    pub fn render_text(&self) -> String {
        let mut out = String::with_capacity((BOARD_WIDTH + 1) * (BOARD_HEIGHT + 1));
        for row in self.render() {
            for cell in row {
                out.push(match cell {
                    CellView::Empty => '.',
                    CellView::Ghost => ':',
                    CellView::Active(_) => '#',
                    CellView::Locked(color) => color_letter(color),
                });
            }
            out.push('\n');
        }
        if self.is_over() {
            out.push_str("GAME OVER\n");
        } else if self.paused {
            out.push_str("PAUSED\n");
        }
        out
    }

    /// Two terminal columns per cell, colored with 24-bit escapes.
    pub fn render_ansi(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .render()
            .into_iter()
            .map(|row| {
                let mut line = String::new();
                for cell in row {
                    match cell {
                        CellView::Empty => line.push_str("\x1b[0m\u{b7} "),
                        CellView::Ghost => line.push_str("\x1b[38;2;120;120;120m\u{2591}\u{2591}"),
                        CellView::Active(c) | CellView::Locked(c) => {
                            let (r, g, b) = c.rgb();
                            line.push_str(&format!("\x1b[38;2;{r};{g};{b}m\u{2588}\u{2588}"));
                        }
                    }
                }
                line.push_str("\x1b[0m");
                line
            })
            .collect();
        lines.push(format!(
            "rows {}  pieces {}{}",
            self.rows_cleared,
            self.pieces_locked,
            if self.is_over() {
                "  GAME OVER"
            } else if self.paused {
                "  PAUSED"
            } else {
                ""
            }
        ));
        lines
    }
}

fn color_letter(color: PieceColor) -> char {
    PieceKind::ALL
        .into_iter()
        .find(|k| k.color() == color)
        .map_or('?', PieceKind::letter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PuzzleCfg {
        PuzzleCfg::default()
    }

    fn started(seed: u64) -> (PuzzleGame, Instant) {
        let now = Instant::now();
        let mut g = PuzzleGame::with_seed(&cfg(), seed);
        assert_eq!(g.start(now), StepOutcome::Moved);
        (g, now)
    }

    #[test]
    fn idle_until_started() {
        let mut g = PuzzleGame::with_seed(&cfg(), 1);
        let now = Instant::now();
        assert_eq!(g.phase(), Phase::Idle);
        assert_eq!(g.move_left(), StepOutcome::Ignored);
        assert_eq!(g.tick(now + Duration::from_secs(5)), StepOutcome::Ignored);
        g.start(now);
        assert_eq!(g.phase(), Phase::Falling);
        assert_eq!(g.current().unwrap().position, Position::new(4, 0));
        assert_eq!(g.start(now), StepOutcome::Ignored);
    }

    #[test]
    fn gravity_waits_for_drop_interval() {
        let (mut g, t0) = started(7);
        assert_eq!(g.tick(t0 + Duration::from_millis(799)), StepOutcome::Ignored);
        assert_eq!(g.tick(t0 + Duration::from_millis(800)), StepOutcome::Moved);
        assert_eq!(g.current().unwrap().position.y, 1);
        assert_eq!(g.tick(t0 + Duration::from_millis(1000)), StepOutcome::Ignored);
        assert_eq!(g.tick(t0 + Duration::from_millis(1600)), StepOutcome::Moved);
    }

    #[test]
    fn soft_drop_restarts_gravity_clock() {
        let (mut g, t0) = started(7);
        assert_eq!(g.soft_drop(t0 + Duration::from_millis(700)), StepOutcome::Moved);
        assert_eq!(g.tick(t0 + Duration::from_millis(1000)), StepOutcome::Ignored);
        assert_eq!(g.tick(t0 + Duration::from_millis(1500)), StepOutcome::Moved);
    }

    #[test]
    fn walls_block_horizontal_moves() {
        let (mut g, _) = started(3);
        let mut moves = 0;
        while g.move_left() == StepOutcome::Moved {
            moves += 1;
            assert!(moves <= BOARD_WIDTH);
        }
        assert_eq!(g.move_left(), StepOutcome::Blocked);
        assert_eq!(g.current().unwrap().position.x, 0);
    }

    #[test]
    fn blocked_rotation_is_noop() {
        let (mut g, _) = started(0);
        g.current = Some(Piece::spawn(PieceKind::I).rotated().at(Position::new(9, 5)));
        let before = g.current().cloned();
        assert_eq!(g.rotate(), StepOutcome::Blocked);
        assert_eq!(g.current().cloned(), before);
    }

    #[test]
    fn hard_drop_locks_at_ghost() {
        let (mut g, _) = started(11);
        let piece = g.current().cloned().unwrap();
        let ghost = g.ghost_position().unwrap();
        assert!(matches!(g.hard_drop(), StepOutcome::Locked { cleared: 0 }));
        for (x, y) in piece.cells_at(ghost) {
            assert_eq!(g.board().cell(x, y), Some(piece.color));
        }
        assert_eq!(g.pieces_locked(), 1);
        assert_eq!(g.current().unwrap().position, Position::new(4, 0));
    }

    #[test]
    fn locking_clears_rows_in_the_same_step() {
        let (mut g, _) = started(5);
        g.board.fill_row(23, PieceColor::Red, Some(0));
        g.current = Some(Piece::spawn(PieceKind::I).rotated().at(Position::new(0, 0)));
        assert_eq!(g.hard_drop(), StepOutcome::Locked { cleared: 1 });
        assert_eq!(g.rows_cleared(), 1);
        assert_eq!(g.board().height(), BOARD_HEIGHT);
        assert_eq!(g.board().cell(0, 23), Some(PieceColor::Cyan));
        assert_eq!(g.board().cell(1, 23), None);
    }

    #[test]
    fn blocked_spawn_ends_game() {
        let (mut g, now) = started(9);
        for y in 0..BOARD_HEIGHT {
            g.board.fill_row(y, PieceColor::Blue, Some(y % BOARD_WIDTH));
        }
        g.board.fill_row(0, PieceColor::Blue, Some(0));
        g.board.fill_row(1, PieceColor::Blue, Some(0));
        g.current = Some(Piece::spawn(PieceKind::O).at(Position::new(0, -2)));
        assert_eq!(g.soft_drop(now), StepOutcome::GameOver);
        assert!(g.is_over());
        assert!(g.current().is_none());
        assert_eq!(g.move_left(), StepOutcome::Ignored);
        assert!(g.render_text().ends_with("GAME OVER\n"));

        assert_eq!(g.apply(Input::Restart, now), StepOutcome::Moved);
        assert_eq!(g.phase(), Phase::Falling);
        assert!(g.board().is_empty());
    }

    #[test]
    fn pause_blocks_actions_until_resumed() {
        let (mut g, t0) = started(2);
        assert!(g.pause());
        assert!(!g.pause());
        assert_eq!(g.move_right(), StepOutcome::Ignored);
        assert_eq!(g.rotate(), StepOutcome::Ignored);
        assert_eq!(g.hard_drop(), StepOutcome::Ignored);
        assert_eq!(g.tick(t0 + Duration::from_secs(10)), StepOutcome::Ignored);
        assert!(g.render_text().ends_with("PAUSED\n"));

        let t1 = t0 + Duration::from_secs(10);
        assert!(g.toggle_pause(t1));
        assert_eq!(g.tick(t1 + Duration::from_millis(100)), StepOutcome::Ignored);
        assert_eq!(g.tick(t1 + Duration::from_millis(800)), StepOutcome::Moved);
    }

    #[test]
    fn restart_ignored_while_playing() {
        let (mut g, now) = started(4);
        assert_eq!(g.apply(Input::Restart, now), StepOutcome::Ignored);
    }

    #[test]
    fn render_layers_ghost_under_active() {
        let (mut g, _) = started(6);
        g.current = Some(Piece::spawn(PieceKind::O));
        let view = g.render();
        assert_eq!(view.len(), BOARD_HEIGHT);
        assert!(view.iter().all(|r| r.len() == BOARD_WIDTH));
        assert_eq!(view[0][4], CellView::Active(PieceColor::Yellow));
        assert_eq!(view[23][5], CellView::Ghost);
        assert_eq!(view[10][0], CellView::Empty);

        let text = g.render_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "....##....");
        assert_eq!(lines[23], "....::....");
    }

    #[test]
    fn same_seed_same_sequence() {
        let (mut a, _) = started(42);
        let (mut b, _) = started(42);
        for _ in 0..20 {
            assert_eq!(a.current().map(|p| p.kind), b.current().map(|p| p.kind));
            a.hard_drop();
            b.hard_drop();
        }
    }

    #[test]
    fn attract_play_eventually_ends() {
        let (mut g, _) = started(13);
        for _ in 0..10_000 {
            if g.is_over() {
                break;
            }
            g.attract_step();
            g.hard_drop();
        }
        assert!(g.is_over());
        assert!(g.pieces_locked() > 0);
    }

    #[test]
    fn player_input_ends_attract_mode() {
        let (mut g, now) = started(21);
        assert!(!g.is_attended());
        assert_eq!(g.apply(Input::Left, now), StepOutcome::Moved);
        assert!(g.is_attended());
        let before = g.current().map(|p| p.position);
        for _ in 0..200 {
            assert_eq!(g.attract_step(), StepOutcome::Ignored);
        }
        assert_eq!(g.current().map(|p| p.position), before);
    }

    #[test]
    fn inputs_map_onto_actions() {
        let (mut g, now) = started(9);
        let x0 = g.current().unwrap().position.x;
        g.apply(Input::Right, now);
        assert_eq!(g.current().unwrap().position.x, x0 + 1);
        g.apply(Input::SoftDrop, now);
        assert_eq!(g.current().unwrap().position.y, 1);
        assert_eq!(g.apply(Input::TogglePause, now), StepOutcome::Moved);
        assert!(g.is_paused());
        assert_eq!(g.apply(Input::HardDrop, now), StepOutcome::Ignored);
        g.apply(Input::TogglePause, now);
        assert!(matches!(g.apply(Input::HardDrop, now), StepOutcome::Locked { .. }));
        assert_eq!(g.pieces_locked(), 1);
    }
}
