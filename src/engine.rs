use rand::Rng;
use std::fmt;

/// A direction to move/merge tiles.
///
/// The discriminants are the direction codes of the search backend contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Move {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
}

impl Move {
    /// All directions in search iteration order.
    pub const ALL: [Move; 4] = [Move::Up, Move::Down, Move::Left, Move::Right];

    #[inline]
    pub fn code(self) -> u8 { self as u8 }

    /// Inverse of [`Move::code`]. Codes outside `0..4` map to `None`.
    #[inline]
    pub fn from_code(code: u8) -> Option<Move> {
        match code {
            0 => Some(Move::Up),
            1 => Some(Move::Down),
            2 => Some(Move::Left),
            3 => Some(Move::Right),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Move::Up => "up",
            Move::Down => "down",
            Move::Left => "left",
            Move::Right => "right",
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.pad(self.name()) }
}

/// Tile magnitude: 0 for empty, otherwise a power of two.
pub type Tile = u32;
/// Points gained by merges.
pub type Score = u64;
/// `(row, col)` coordinate, both in `0..4`.
pub type Cell = (usize, usize);

pub const CORNERS: [Cell; 4] = [(0, 0), (0, 3), (3, 0), (3, 3)];

/// Outcome of sliding a board in one direction, before any tile spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveResult {
    pub board: Board,
    pub score: Score,
    /// False when the move is a no-op (illegal).
    pub moved: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("expected 16 cells, got {0}")]
    WrongLength(usize),
    #[error("cell {index} holds {value}, which is neither 0 nor a power of two")]
    InvalidTile { index: usize, value: Tile },
}

/// 4x4 board stored as 16 row-major tile values.
///
/// `Board` is `Copy`; every transformation returns a new value and leaves the
/// receiver untouched, so believed, observed and candidate boards never alias.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Board([Tile; 16]);

impl Board {
    /// A constant empty board (all zeros).
    pub const EMPTY: Board = Board([0; 16]);

    /// Build a board from row-major cells without validation.
    #[inline]
    pub const fn from_cells(cells: [Tile; 16]) -> Self { Board(cells) }

    /// Build a board from untrusted row-major cells.
    ///
    /// ```
    /// use merge2048::engine::Board;
    /// assert!(Board::try_from_slice(&[2; 16]).is_ok());
    /// assert!(Board::try_from_slice(&[3; 16]).is_err());
    /// assert!(Board::try_from_slice(&[2; 15]).is_err());
    /// ```
    pub fn try_from_slice(cells: &[Tile]) -> Result<Self, BoardError> {
        if cells.len() != 16 {
            return Err(BoardError::WrongLength(cells.len()));
        }
        let mut out = [0; 16];
        for (index, (&value, slot)) in cells.iter().zip(out.iter_mut()).enumerate() {
            if value != 0 && !value.is_power_of_two() {
                return Err(BoardError::InvalidTile { index, value });
            }
            *slot = value;
        }
        Ok(Board(out))
    }

    pub fn from_rows(rows: [[Tile; 4]; 4]) -> Self {
        let mut cells = [0; 16];
        for (r, row) in rows.iter().enumerate() {
            cells[r * 4..r * 4 + 4].copy_from_slice(row);
        }
        Board(cells)
    }

    #[inline]
    pub fn cells(&self) -> &[Tile; 16] { &self.0 }

    #[inline]
    pub fn get(&self, (r, c): Cell) -> Tile { self.0[r * 4 + c] }

    pub fn rows(&self) -> [[Tile; 4]; 4] {
        let mut rows = [[0; 4]; 4];
        for (r, row) in rows.iter_mut().enumerate() {
            row.copy_from_slice(&self.0[r * 4..r * 4 + 4]);
        }
        rows
    }

    /// Return a copy with `cell` set to `value`.
    #[inline]
    pub fn with_tile(mut self, (r, c): Cell, value: Tile) -> Self {
        self.0[r * 4 + c] = value;
        self
    }

    /// Return a copy with the tiles at `a` and `b` exchanged.
    #[inline]
    pub fn swapped(mut self, a: Cell, b: Cell) -> Self {
        self.0.swap(a.0 * 4 + a.1, b.0 * 4 + b.1);
        self
    }

    /// Return a copy with every tile equal to `value` removed.
    pub fn without_value(mut self, value: Tile) -> Self {
        for cell in self.0.iter_mut() {
            if *cell == value {
                *cell = 0;
            }
        }
        self
    }

    /// Slide/merge tiles in `dir`. No random insert.
    #[inline]
    pub fn shift(&self, dir: Move) -> MoveResult { simulate_move(self, dir) }

    /// Insert a 2 (90%) or 4 (10%) into a uniformly chosen empty cell.
    ///
    /// A full board is returned unchanged.
    ///
    /// ```
    /// use merge2048::engine::Board;
    /// use rand::{SeedableRng, rngs::StdRng};
    /// let mut rng = StdRng::seed_from_u64(123);
    /// let b = Board::EMPTY.with_random_tile(&mut rng).with_random_tile(&mut rng);
    /// assert_eq!(b.count_empty(), 14);
    /// ```
    pub fn with_random_tile<R: Rng + ?Sized>(self, rng: &mut R) -> Self {
        let empty = self.empty_cells();
        if empty.is_empty() {
            return self;
        }
        let cell = empty[rng.gen_range(0..empty.len())];
        let value = if rng.gen_range(0..10) < 9 { 2 } else { 4 };
        self.with_tile(cell, value)
    }

    /// Highest tile value present (0 on an empty board).
    #[inline]
    pub fn max_tile(&self) -> Tile { self.0.iter().copied().max().unwrap_or(0) }

    #[inline]
    pub fn count_empty(&self) -> usize { self.0.iter().filter(|&&v| v == 0).count() }

    /// Empty cells in row-major order.
    pub fn empty_cells(&self) -> Vec<Cell> { self.cells_where(|v| v == 0) }

    /// Cells holding exactly `value`, in row-major order.
    pub fn cells_with_value(&self, value: Tile) -> Vec<Cell> { self.cells_where(|v| v == value) }

    pub fn count_value(&self, value: Tile) -> usize { self.0.iter().filter(|&&v| v == value).count() }

    fn cells_where(&self, pred: impl Fn(Tile) -> bool) -> Vec<Cell> {
        (0..16).filter(|&i| pred(self.0[i])).map(|i| (i / 4, i % 4)).collect()
    }

    /// True if the maximum tile value sits in at least one corner.
    pub fn corner_has_max(&self) -> bool {
        let mt = self.max_tile();
        CORNERS.iter().any(|&cell| self.get(cell) == mt)
    }

    /// True if some direction changes the board.
    pub fn has_legal_move(&self) -> bool { Move::ALL.iter().any(|&dir| simulate_move(self, dir).moved) }

    #[inline]
    pub fn is_game_over(&self) -> bool { !self.has_legal_move() }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Board({:?})", self.rows()) }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        for (r, row) in self.rows().iter().enumerate() {
            if r > 0 {
                writeln!(f, "{}", "-".repeat(31))?;
            }
            let line: Vec<String> = row.iter().map(|&v| format_val(v)).collect();
            writeln!(f, "{}", line.join("|"))?;
        }
        Ok(())
    }
}

impl From<[[Tile; 4]; 4]> for Board {
    fn from(rows: [[Tile; 4]; 4]) -> Self { Board::from_rows(rows) }
}

fn format_val(val: Tile) -> String {
    match val {
        0 => " ".repeat(7),
        v => format!("{:^7}", v),
    }
}

/// Floor of log2 for a tile value; 0 for an empty cell.
#[inline]
pub fn rank(value: Tile) -> u32 {
    if value == 0 { 0 } else { 31 - value.leading_zeros() }
}

/// Slide one line toward index 0, merging equal neighbours once.
///
/// Returns the new line and the points gained (the sum of merged values).
///
/// ```
/// use merge2048::engine::compress_line;
/// assert_eq!(compress_line([2, 0, 2, 4]), ([4, 4, 0, 0], 4));
/// ```
pub fn compress_line(line: [Tile; 4]) -> ([Tile; 4], Score) {
    let mut tiles = [0; 4];
    let mut n = 0;
    for v in line.into_iter().filter(|&v| v != 0) {
        tiles[n] = v;
        n += 1;
    }
    let mut out = [0; 4];
    let mut score = 0;
    let (mut i, mut o) = (0, 0);
    while i < n {
        if i + 1 < n && tiles[i] == tiles[i + 1] {
            out[o] = tiles[i] * 2;
            score += Score::from(tiles[i]) * 2;
            i += 2;
        } else {
            out[o] = tiles[i];
            i += 1;
        }
        o += 1;
    }
    (out, score)
}

/// Board indices of line `i` for `dir`, ordered so that index 0 is the edge
/// the tiles slide toward.
fn line_indices(dir: Move, i: usize) -> [usize; 4] {
    match dir {
        Move::Left => [i * 4, i * 4 + 1, i * 4 + 2, i * 4 + 3],
        Move::Right => [i * 4 + 3, i * 4 + 2, i * 4 + 1, i * 4],
        Move::Up => [i, 4 + i, 8 + i, 12 + i],
        Move::Down => [12 + i, 8 + i, 4 + i, i],
    }
}

/// Slide/merge every row or column of `board` in `dir`.
///
/// Pure: `board` is never modified.
///
/// ```
/// use merge2048::engine::{simulate_move, Board, Move};
/// let b = Board::from_rows([[2, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
/// let r = simulate_move(&b, Move::Left);
/// assert_eq!(r.board, Board::from_rows([[4, 0, 0, 0], [0; 4], [0; 4], [0; 4]]));
/// assert_eq!((r.score, r.moved), (4, true));
/// ```
pub fn simulate_move(board: &Board, dir: Move) -> MoveResult {
    let mut cells = board.0;
    let mut score = 0;
    let mut moved = false;
    for i in 0..4 {
        let idx = line_indices(dir, i);
        let line = idx.map(|j| board.0[j]);
        let (merged, gained) = compress_line(line);
        if merged != line {
            moved = true;
        }
        for (&j, v) in idx.iter().zip(merged) {
            cells[j] = v;
        }
        score += gained;
    }
    MoveResult { board: Board(cells), score, moved }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn it_compress_line() {
        assert_eq!(compress_line([0, 0, 0, 0]), ([0, 0, 0, 0], 0));
        assert_eq!(compress_line([2, 4, 2, 4]), ([2, 4, 2, 4], 0));
        assert_eq!(compress_line([2, 2, 4, 4]), ([4, 8, 0, 0], 12));
        assert_eq!(compress_line([2, 0, 0, 2]), ([4, 0, 0, 0], 4));
        assert_eq!(compress_line([2, 2, 2, 2]), ([4, 4, 0, 0], 8));
        assert_eq!(compress_line([4, 2, 2, 0]), ([4, 4, 0, 0], 4));
    }

    #[test]
    fn compress_line_does_not_chain_merges() {
        // The 4 produced by 2+2 must not merge with the existing 4.
        assert_eq!(compress_line([2, 2, 4, 0]), ([4, 4, 0, 0], 4));
        assert_eq!(compress_line([2, 2, 4, 8]), ([4, 4, 8, 0], 4));
    }

    #[test]
    fn compress_line_settles_after_repeated_passes() {
        // A merged tile may equal its neighbour (no chained merges), so one
        // pass is not always a fixed point. Every merging pass drops a tile,
        // so four passes always are.
        let values = [0, 2, 4, 8];
        for a in values {
            for b in values {
                for c in values {
                    for d in values {
                        let line = [a, b, c, d];
                        let (out, score) = compress_line(line);
                        let total_in: Score = line.iter().map(|&v| Score::from(v)).sum();
                        let total_out: Score = out.iter().map(|&v| Score::from(v)).sum();
                        assert_eq!(total_in, total_out);
                        assert!(score % 4 == 0 && score <= total_in);
                        if score == 0 {
                            for w in out.windows(2) {
                                assert!(w[0] == 0 || w[0] != w[1], "{line:?} -> {out:?}");
                            }
                            assert_eq!(compress_line(out), (out, 0));
                        }
                        let mut settled = out;
                        for _ in 0..3 {
                            settled = compress_line(settled).0;
                        }
                        assert_eq!(compress_line(settled), (settled, 0), "{line:?} -> {settled:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_move_left() {
        let b = Board::from_rows([[2, 4, 8, 16], [2, 8, 8, 4], [4, 0, 0, 4], [2, 0, 0, 4]]);
        let r = simulate_move(&b, Move::Left);
        assert_eq!(r.board, Board::from_rows([[2, 4, 8, 16], [2, 16, 4, 0], [8, 0, 0, 0], [2, 4, 0, 0]]));
        assert_eq!(r.score, 24);
        assert!(r.moved);
    }

    #[test]
    fn test_move_right() {
        let b = Board::from_rows([[2, 4, 8, 16], [2, 8, 8, 4], [4, 0, 0, 4], [2, 0, 0, 4]]);
        let r = simulate_move(&b, Move::Right);
        assert_eq!(r.board, Board::from_rows([[2, 4, 8, 16], [0, 2, 16, 4], [0, 0, 0, 8], [0, 0, 2, 4]]));
        assert_eq!(r.score, 24);
    }

    #[test]
    fn test_move_up_and_down() {
        let b = Board::from_rows([[2, 0, 0, 0], [2, 4, 0, 0], [4, 4, 0, 0], [8, 0, 0, 2]]);
        let up = simulate_move(&b, Move::Up);
        assert_eq!(up.board, Board::from_rows([[4, 8, 0, 2], [4, 0, 0, 0], [8, 0, 0, 0], [0, 0, 0, 0]]));
        assert_eq!(up.score, 12);
        let down = simulate_move(&b, Move::Down);
        assert_eq!(down.board, Board::from_rows([[0, 0, 0, 0], [4, 0, 0, 0], [4, 0, 0, 0], [8, 8, 0, 2]]));
        assert_eq!(down.score, 12);
    }

    #[test]
    fn illegal_move_reports_not_moved() {
        let b = Board::from_rows([[2, 4, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let r = simulate_move(&b, Move::Left);
        assert!(!r.moved);
        assert_eq!(r.board, b);
        assert_eq!(r.score, 0);
        assert!(!simulate_move(&b, Move::Up).moved);
        assert!(simulate_move(&b, Move::Down).moved);
    }

    #[test]
    fn simulate_move_is_pure() {
        let b = Board::from_rows([[2, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let copy = b;
        let first = simulate_move(&b, Move::Left);
        let second = simulate_move(&b, Move::Left);
        assert_eq!(first, second);
        assert_eq!(b, copy);
    }

    #[test]
    fn it_detects_game_over() {
        let full = Board::from_rows([[2, 4, 2, 4], [4, 2, 4, 2], [2, 4, 2, 4], [4, 2, 4, 2]]);
        assert!(full.is_game_over());
        let mergeable = full.with_tile((0, 0), 4);
        assert!(mergeable.has_legal_move());
        assert!(Board::EMPTY.is_game_over());
    }

    #[test]
    fn it_fills_board_with_random_tiles() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut b = Board::EMPTY;
        for _ in 0..16 {
            b = b.with_random_tile(&mut rng);
        }
        assert_eq!(b.count_empty(), 0);
        assert!(b.cells().iter().all(|&v| v == 2 || v == 4));
        assert_eq!(b.with_random_tile(&mut rng), b);
    }

    #[test]
    fn it_edits_cells() {
        let b = Board::from_rows([[8, 2, 0, 0], [0, 2, 0, 0], [0; 4], [0, 0, 0, 512]]);
        assert_eq!(b.max_tile(), 512);
        assert!(b.corner_has_max());
        assert_eq!(b.cells_with_value(2), vec![(0, 1), (1, 1)]);
        assert_eq!(b.without_value(2).count_empty(), 14);
        let s = b.swapped((0, 0), (3, 3));
        assert_eq!((s.get((0, 0)), s.get((3, 3))), (512, 8));
        assert!(!b.with_tile((1, 2), 1024).corner_has_max());
    }

    #[test]
    fn it_converts_direction_codes() {
        for dir in Move::ALL {
            assert_eq!(Move::from_code(dir.code()), Some(dir));
        }
        assert_eq!(Move::from_code(4), None);
        assert_eq!(Move::Left.code(), 2);
    }

    #[test]
    fn it_ranks_tiles() {
        assert_eq!(rank(0), 0);
        assert_eq!(rank(2), 1);
        assert_eq!(rank(2048), 11);
    }
}
