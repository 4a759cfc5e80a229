use super::board::BOARD_WIDTH;

/// Cell occupancy of a piece, row-major, top row first.
pub type Shape = Vec<Vec<bool>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceColor {
    Cyan,
    Yellow,
    Purple,
    Green,
    Red,
    Blue,
    Orange,
}

impl PieceColor {
    pub fn rgb(self) -> (u8, u8, u8) {
        match self {
            Self::Cyan => (34, 211, 238),
            Self::Yellow => (250, 204, 21),
            Self::Purple => (192, 132, 252),
            Self::Green => (74, 222, 128),
            Self::Red => (248, 113, 113),
            Self::Blue => (96, 165, 250),
            Self::Orange => (251, 146, 60),
        }
    }
}

const SHAPE_I: &[&[u8]] = &[&[1, 1, 1, 1]];
const SHAPE_O: &[&[u8]] = &[&[1, 1], &[1, 1]];
const SHAPE_T: &[&[u8]] = &[&[0, 1, 0], &[1, 1, 1]];
const SHAPE_S: &[&[u8]] = &[&[0, 1, 1], &[1, 1, 0]];
const SHAPE_Z: &[&[u8]] = &[&[1, 1, 0], &[0, 1, 1]];
const SHAPE_J: &[&[u8]] = &[&[1, 0, 0], &[1, 1, 1]];
const SHAPE_L: &[&[u8]] = &[&[0, 0, 1], &[1, 1, 1]];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceKind {
    I,
    O,
    T,
    S,
    Z,
    J,
    L,
}

impl PieceKind {
    pub const ALL: [PieceKind; 7] = [
        PieceKind::I,
        PieceKind::O,
        PieceKind::T,
        PieceKind::S,
        PieceKind::Z,
        PieceKind::J,
        PieceKind::L,
    ];

    pub fn shape(self) -> Shape {
        let rows = match self {
            Self::I => SHAPE_I,
            Self::O => SHAPE_O,
            Self::T => SHAPE_T,
            Self::S => SHAPE_S,
            Self::Z => SHAPE_Z,
            Self::J => SHAPE_J,
            Self::L => SHAPE_L,
        };
        rows.iter()
            .map(|row| row.iter().map(|c| *c == 1).collect())
            .collect()
    }

    pub fn color(self) -> PieceColor {
        match self {
            Self::I => PieceColor::Cyan,
            Self::O => PieceColor::Yellow,
            Self::T => PieceColor::Purple,
            Self::S => PieceColor::Green,
            Self::Z => PieceColor::Red,
            Self::J => PieceColor::Blue,
            Self::L => PieceColor::Orange,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::I => 'I',
            Self::O => 'O',
            Self::T => 'T',
            Self::S => 'S',
            Self::Z => 'Z',
            Self::J => 'J',
            Self::L => 'L',
        }
    }
}

/// Board coordinates of a shape's top-left cell. `y` may be negative
/// while a piece is still entering from above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub kind: PieceKind,
    pub shape: Shape,
    pub color: PieceColor,
    pub position: Position,
}

impl Piece {
    pub fn spawn_position() -> Position {
        Position::new(BOARD_WIDTH as i32 / 2 - 1, 0)
    }

    pub fn spawn(kind: PieceKind) -> Self {
        Self {
            kind,
            shape: kind.shape(),
            color: kind.color(),
            position: Self::spawn_position(),
        }
    }

    /// Clockwise quarter turn: transpose, then reverse each row.
    pub fn rotated(&self) -> Self {
        let rows = self.shape.len();
        let cols = self.shape.first().map_or(0, Vec::len);
        let shape = (0..cols)
            .map(|c| (0..rows).rev().map(|r| self.shape[r][c]).collect())
            .collect();
        Self {
            shape,
            ..self.clone()
        }
    }

    pub fn at(&self, position: Position) -> Self {
        Self {
            position,
            ..self.clone()
        }
    }

    /// Occupied cells in board coordinates if the piece stood at `position`.
    pub fn cells_at(&self, position: Position) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.shape.iter().enumerate().flat_map(move |(dy, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, filled)| **filled)
                .map(move |(dx, _)| (position.x + dx as i32, position.y + dy as i32))
        })
    }

    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.cells_at(self.position)
    }
}
