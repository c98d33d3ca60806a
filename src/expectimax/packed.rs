//! Packed 4x4 board: 16 4-bit exponents in a `u64`, cell 0 in the high nibble.
//!
//! Row moves go through 65 536-entry line tables built once from
//! [`compress_line`], so packed moves agree with the reference simulator.

use std::sync::OnceLock;

use crate::engine::{compress_line, rank, Move, Tile};

pub(crate) type Packed = u64;
type Line = u16;

const LINE_TABLE_SIZE: usize = 0x1_0000; // 65,536 possible 16-bit lines
const MAX_RANK: u32 = 15;
/// Largest tile a nibble can hold.
pub(crate) const MAX_TILE: Tile = 1 << MAX_RANK;

struct Stores {
    shift_left: Box<[Line]>,
    shift_right: Box<[Line]>,
    score_left: Box<[f64]>,
    score_right: Box<[f64]>,
}

static STORES: OnceLock<Stores> = OnceLock::new();

/// Build the shift tables. Safe to call multiple times.
pub(crate) fn warm() { let _ = stores(); }

#[inline(always)]
fn stores() -> &'static Stores { STORES.get_or_init(create_stores) }

fn create_stores() -> Stores {
    // Allocate on the heap to avoid large stack frames
    let mut shift_left = vec![0 as Line; LINE_TABLE_SIZE];
    let mut shift_right = vec![0 as Line; LINE_TABLE_SIZE];
    let mut score_left = vec![0.0; LINE_TABLE_SIZE];
    let mut score_right = vec![0.0; LINE_TABLE_SIZE];

    for val in 0..LINE_TABLE_SIZE {
        let line = line_values(val as Line);
        let (left, ls) = compress_line(line);
        shift_left[val] = line_from_values(left);
        score_left[val] = ls as f64;

        let (right_rev, rs) = compress_line([line[3], line[2], line[1], line[0]]);
        shift_right[val] = line_from_values([right_rev[3], right_rev[2], right_rev[1], right_rev[0]]);
        score_right[val] = rs as f64;
    }

    Stores {
        shift_left: shift_left.into_boxed_slice(),
        shift_right: shift_right.into_boxed_slice(),
        score_left: score_left.into_boxed_slice(),
        score_right: score_right.into_boxed_slice(),
    }
}

/// Tile values of a packed line, first tile in the high nibble.
pub(crate) fn line_values(line: Line) -> [Tile; 4] {
    [12, 8, 4, 0].map(|shift| rank_value(u32::from((line >> shift) & 0xf)))
}

fn line_from_values(values: [Tile; 4]) -> Line {
    values.iter().fold(0, |acc, &v| (acc << 4) | clamp_rank(v) as Line)
}

#[inline]
fn rank_value(r: u32) -> Tile { if r == 0 { 0 } else { 1 << r } }

#[inline]
fn clamp_rank(v: Tile) -> u32 { rank(v).min(MAX_RANK) }

pub(crate) fn pack(cells: &[Tile; 16]) -> Packed {
    cells.iter().fold(0, |acc, &v| (acc << 4) | u64::from(clamp_rank(v)))
}

pub(crate) fn unpack(board: Packed) -> [Tile; 16] {
    let mut cells = [0; 16];
    for (idx, cell) in cells.iter_mut().enumerate() {
        *cell = rank_value(nibble(board, idx));
    }
    cells
}

#[inline(always)]
pub(crate) fn nibble(board: Packed, idx: usize) -> u32 { ((board >> (60 - 4 * idx)) & 0xf) as u32 }

/// Board with a rank-`r` tile written into the (empty) cell `idx`.
#[inline(always)]
pub(crate) fn with_rank(board: Packed, idx: usize, r: u32) -> Packed { board | (u64::from(r) << (60 - 4 * idx)) }

// Credit to Nneonneo
pub(crate) fn transpose(x: Packed) -> Packed {
    let a1 = x & 0xF0F00F0FF0F00F0F;
    let a2 = x & 0x0000F0F00000F0F0;
    let a3 = x & 0x0F0F00000F0F0000;
    let a = a1 | (a2 << 12) | (a3 >> 12);
    let b1 = a & 0xFF00FF0000FF00FF;
    let b2 = a & 0x00FF00FF00000000;
    let b3 = a & 0x00000000FF00FF00;
    b1 | (b2 >> 24) | (b3 << 24)
}

#[inline(always)]
pub(crate) fn extract_line(board: Packed, line_idx: usize) -> Line { ((board >> ((3 - line_idx) * 16)) & 0xffff) as Line }

// https://stackoverflow.com/questions/38225571/count-number-of-zero-nibbles-in-an-unsigned-64-bit-integer
pub(crate) fn count_empty(board: Packed) -> usize {
    let mut x = board;
    x |= x >> 1;
    x |= x >> 2;
    x &= 0x1111111111111111;
    16 - x.count_ones() as usize
}

/// Slide/merge in `dir`; returns the new board and the merge score.
pub(crate) fn shift(board: Packed, dir: Move) -> (Packed, f64) {
    let s = stores();
    let (table, scores): (&[Line], &[f64]) = match dir {
        Move::Left | Move::Up => (&s.shift_left, &s.score_left),
        Move::Right | Move::Down => (&s.shift_right, &s.score_right),
    };
    let src = match dir {
        Move::Left | Move::Right => board,
        Move::Up | Move::Down => transpose(board),
    };
    let mut out = 0u64;
    let mut score = 0.0;
    for idx in 0..4 {
        let line = extract_line(src, idx) as usize;
        out |= u64::from(table[line]) << ((3 - idx) * 16);
        score += scores[line];
    }
    match dir {
        Move::Left | Move::Right => (out, score),
        Move::Up | Move::Down => (transpose(out), score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{simulate_move, Board};

    #[test]
    fn it_round_trips_cells() {
        let cells = [0, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768];
        assert_eq!(unpack(pack(&cells)), cells);
        assert_eq!(pack(&cells), 0x0123456789abcdef);
    }

    #[test]
    fn it_count_empty() {
        assert_eq!(count_empty(0x1111000011110000), 8);
        assert_eq!(count_empty(0x1100000000000000), 14);
        assert_eq!(count_empty(0), 16);
    }

    #[test]
    fn it_transposes() {
        let b = Board::from_rows([[2, 4, 0, 0], [8, 0, 0, 0], [0; 4], [0, 0, 0, 16]]);
        let t = unpack(transpose(pack(b.cells())));
        assert_eq!(Board::from_cells(t), Board::from_rows([[2, 8, 0, 0], [4, 0, 0, 0], [0; 4], [0, 0, 0, 16]]));
    }

    #[test]
    fn shift_matches_reference_simulator() {
        let boards = [
            Board::from_rows([[2, 4, 8, 16], [2, 8, 8, 4], [4, 0, 0, 4], [2, 0, 0, 4]]),
            Board::from_rows([[2, 0, 0, 0], [2, 4, 0, 0], [4, 4, 0, 0], [8, 0, 0, 2]]),
            Board::from_rows([[1024, 1024, 512, 512], [2, 2, 2, 2], [0, 4, 0, 4], [8, 16, 32, 64]]),
        ];
        for b in boards {
            for dir in Move::ALL {
                let r = simulate_move(&b, dir);
                let (p, score) = shift(pack(b.cells()), dir);
                assert_eq!(Board::from_cells(unpack(p)), r.board, "{dir} on {b:?}");
                assert_eq!(score, r.score as f64);
            }
        }
    }

    #[test]
    fn it_writes_ranks() {
        let b = with_rank(0, 5, 2);
        assert_eq!(nibble(b, 5), 2);
        assert_eq!(count_empty(b), 15);
    }
}
