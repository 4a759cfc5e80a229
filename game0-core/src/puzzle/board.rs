use super::piece::{Piece, PieceColor, Position};

pub const BOARD_WIDTH: usize = 10;
pub const BOARD_HEIGHT: usize = 24;

pub type Row = [Option<PieceColor>; BOARD_WIDTH];

/// Locked cells of the playfield. Dimensions never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    rows: Vec<Row>,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            rows: vec![[None; BOARD_WIDTH]; BOARD_HEIGHT],
        }
    }

    pub fn width(&self) -> usize {
        BOARD_WIDTH
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn cell(&self, x: i32, y: i32) -> Option<PieceColor> {
        if x < 0 || y < 0 {
            return None;
        }
        self.rows
            .get(y as usize)
            .and_then(|row| row.get(x as usize).copied().flatten())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().flatten().all(Option::is_none)
    }

    /// Walls and floor collide; cells above the top edge do not.
    pub fn collides(&self, piece: &Piece, position: Position) -> bool {
        piece.cells_at(position).any(|(x, y)| {
            x < 0
                || x >= BOARD_WIDTH as i32
                || y >= BOARD_HEIGHT as i32
                || (y >= 0 && self.rows[y as usize][x as usize].is_some())
        })
    }

    /// Write the piece into the grid; cells above the top edge are dropped.
    pub fn lock(&mut self, piece: &Piece) {
        for (x, y) in piece.cells() {
            if (0..BOARD_WIDTH as i32).contains(&x) && (0..BOARD_HEIGHT as i32).contains(&y) {
                self.rows[y as usize][x as usize] = Some(piece.color);
            }
        }
    }

    /// Remove every full row, shifting the rows above down. Returns the count.
    pub fn clear_full_rows(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| row.iter().any(Option::is_none));
        let cleared = before - self.rows.len();
        for _ in 0..cleared {
            self.rows.insert(0, [None; BOARD_WIDTH]);
        }
        cleared
    }

    #[cfg(test)]
    pub(crate) fn fill_row(&mut self, y: usize, color: PieceColor, gap: Option<usize>) {
        for (x, cell) in self.rows[y].iter_mut().enumerate() {
            *cell = if Some(x) == gap { None } else { Some(color) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puzzle::piece::PieceKind;

    #[test]
    fn walls_and_floor_collide() {
        let board = Board::new();
        let i = Piece::spawn(PieceKind::I);
        assert!(!board.collides(&i, Position::new(0, 0)));
        assert!(board.collides(&i, Position::new(-1, 0)));
        assert!(board.collides(&i, Position::new(7, 0)));
        assert!(!board.collides(&i, Position::new(6, 23)));
        assert!(board.collides(&i, Position::new(6, 24)));
    }

    #[test]
    fn cells_above_top_are_allowed() {
        let board = Board::new();
        let o = Piece::spawn(PieceKind::O);
        assert!(!board.collides(&o, Position::new(4, -1)));
        assert!(!board.collides(&o, Position::new(4, -5)));
    }

    #[test]
    fn locked_cells_collide() {
        let mut board = Board::new();
        let o = Piece::spawn(PieceKind::O).at(Position::new(0, 22));
        board.lock(&o);
        assert_eq!(board.cell(0, 22), Some(PieceColor::Yellow));
        assert!(board.collides(&o, Position::new(1, 21)));
        assert!(!board.collides(&o, Position::new(2, 21)));
    }

    #[test]
    fn lock_drops_cells_above_top() {
        let mut board = Board::new();
        let i = Piece::spawn(PieceKind::I).rotated().at(Position::new(0, -2));
        board.lock(&i);
        assert_eq!(board.cell(0, 0), Some(PieceColor::Cyan));
        assert_eq!(board.cell(0, 1), Some(PieceColor::Cyan));
        assert_eq!(board.cell(0, 2), None);
    }

    #[test]
    fn clearing_a_row_shifts_above_down() {
        let mut board = Board::new();
        board.fill_row(23, PieceColor::Red, None);
        board.fill_row(22, PieceColor::Blue, Some(3));
        board.rows[21][5] = Some(PieceColor::Green);

        assert_eq!(board.clear_full_rows(), 1);
        assert_eq!(board.height(), BOARD_HEIGHT);
        assert!(board.rows().iter().all(|r| r.len() == BOARD_WIDTH));
        assert_eq!(board.cell(0, 23), Some(PieceColor::Blue));
        assert_eq!(board.cell(3, 23), None);
        assert_eq!(board.cell(5, 22), Some(PieceColor::Green));
        assert!(board.rows()[0].iter().all(Option::is_none));
    }

    #[test]
    fn clears_non_adjacent_rows() {
        let mut board = Board::new();
        board.fill_row(23, PieceColor::Red, None);
        board.fill_row(22, PieceColor::Blue, Some(0));
        board.fill_row(21, PieceColor::Red, None);
        assert_eq!(board.clear_full_rows(), 2);
        assert_eq!(board.cell(1, 23), Some(PieceColor::Blue));
        assert_eq!(board.cell(0, 23), None);
        assert!(board.rows()[..23].iter().flatten().all(Option::is_none));
        assert_eq!(board.height(), BOARD_HEIGHT);
    }
}
