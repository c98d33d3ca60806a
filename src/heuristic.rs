//! Board evaluation heuristic.
//!
//! The score is a weighted sum of six terms: snake positional weight,
//! free-cell bonus, corner occupancy of the maximum tile, smoothness,
//! monotonicity and merge potential. Smoothness, monotonicity and merge
//! potential decompose over rows and columns; the per-line helpers here are
//! shared with the packed backend so both produce identical values.
//!
//! All numeric defaults are calibration data, not derived quantities.

use serde::{Deserialize, Serialize};

use crate::engine::{rank, Board, Tile, CORNERS};

/// Snake matrices: geometric path weights (ratio ~1.5) from each corner.
pub const SNAKE_WEIGHTS: [[[f64; 4]; 4]; 4] = [
    [[438., 292., 195., 130.], [26., 38., 58., 87.], [17., 11., 8., 5.], [1., 2., 2., 3.]],
    [[130., 195., 292., 438.], [87., 58., 38., 26.], [5., 8., 11., 17.], [3., 2., 2., 1.]],
    [[1., 2., 2., 3.], [17., 11., 8., 5.], [26., 38., 58., 87.], [438., 292., 195., 130.]],
    [[3., 2., 2., 1.], [5., 8., 11., 17.], [87., 58., 38., 26.], [130., 195., 292., 438.]],
];

/// Tuning constants for [`Evaluator`]. Defaults reproduce the calibrated player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    pub snake_weights: [[[f64; 4]; 4]; 4],
    /// Score for a board with no empty cell.
    pub full_board_score: f64,
    /// Per-cell bonus with one or two empty cells.
    pub sparse_empty_unit: f64,
    /// Linear part of the bonus with three or more empty cells.
    pub empty_linear: f64,
    /// Logarithmic part of the bonus with three or more empty cells.
    pub empty_log: f64,
    pub corner_bonus: f64,
    pub edge_penalty: f64,
    pub interior_penalty: f64,
    pub smoothness_weight: f64,
    pub monotonicity_weight: f64,
    pub merge_weight: f64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            snake_weights: SNAKE_WEIGHTS,
            full_board_score: -200_000.0,
            sparse_empty_unit: 5000.0,
            empty_linear: 3000.0,
            empty_log: 5000.0,
            corner_bonus: 5.0,
            edge_penalty: 3.0,
            interior_penalty: 10.0,
            smoothness_weight: 100.0,
            monotonicity_weight: 200.0,
            merge_weight: 500.0,
        }
    }
}

/// Pure, deterministic board evaluator.
///
/// ```
/// use merge2048::engine::Board;
/// use merge2048::heuristic::Evaluator;
/// let ev = Evaluator::default();
/// let b = Board::from_rows([[512, 256, 0, 0], [0; 4], [0; 4], [0; 4]]);
/// assert_eq!(ev.evaluate(&b), ev.evaluate(&b));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    cfg: HeuristicConfig,
}

impl Evaluator {
    pub fn new(cfg: HeuristicConfig) -> Self { Self { cfg } }

    pub fn config(&self) -> &HeuristicConfig { &self.cfg }

    pub fn evaluate(&self, board: &Board) -> f64 {
        let cfg = &self.cfg;
        let rows = board.rows();
        let cols = transpose_rows(&rows);
        let (mut smooth, mut mono, mut merges) = (0.0, 0.0, 0.0);
        for line in rows.iter().chain(cols.iter()) {
            smooth += line_smoothness(line);
            mono += line_monotonicity(line);
            merges += line_merges(line);
        }
        self.snake(board.cells())
            + self.empty_score(board.count_empty())
            + self.corner_score(board.cells())
            + smooth * cfg.smoothness_weight
            + mono * cfg.monotonicity_weight
            + merges * cfg.merge_weight
    }

    /// Weighted sum of one row or column's line terms.
    pub(crate) fn line_terms(&self, line: &[Tile; 4]) -> f64 {
        line_smoothness(line) * self.cfg.smoothness_weight
            + line_monotonicity(line) * self.cfg.monotonicity_weight
            + line_merges(line) * self.cfg.merge_weight
    }

    /// Best dot product of the board with any snake orientation.
    pub(crate) fn snake(&self, cells: &[Tile; 16]) -> f64 {
        self.cfg
            .snake_weights
            .iter()
            .map(|w| {
                cells
                    .iter()
                    .enumerate()
                    .fold(0.0, |acc, (i, &v)| acc + f64::from(v) * w[i / 4][i % 4])
            })
            .fold(f64::NEG_INFINITY, f64::max)
    }

    pub(crate) fn empty_score(&self, empty: usize) -> f64 {
        let cfg = &self.cfg;
        match empty {
            0 => cfg.full_board_score,
            1 | 2 => empty as f64 * cfg.sparse_empty_unit,
            n => cfg.empty_linear * n as f64 + cfg.empty_log * (n as f64).log2(),
        }
    }

    pub(crate) fn corner_score(&self, cells: &[Tile; 16]) -> f64 {
        let cfg = &self.cfg;
        let mt = cells.iter().copied().max().unwrap_or(0);
        let at = |(r, c): (usize, usize)| cells[r * 4 + c];
        let mtf = f64::from(mt);
        if CORNERS.iter().any(|&cell| at(cell) == mt) {
            mtf * cfg.corner_bonus
        } else if (0..16).any(|i| is_edge(i / 4, i % 4) && cells[i] == mt) {
            -mtf * cfg.edge_penalty
        } else {
            -mtf * cfg.interior_penalty
        }
    }
}

#[inline]
fn is_edge(r: usize, c: usize) -> bool { r == 0 || r == 3 || c == 0 || c == 3 }

fn transpose_rows(rows: &[[Tile; 4]; 4]) -> [[Tile; 4]; 4] {
    let mut cols = [[0; 4]; 4];
    for (r, row) in rows.iter().enumerate() {
        for (c, &v) in row.iter().enumerate() {
            cols[c][r] = v;
        }
    }
    cols
}

/// Negative sum of log2 gaps between adjacent non-empty tiles.
pub(crate) fn line_smoothness(line: &[Tile; 4]) -> f64 {
    line.windows(2)
        .filter(|w| w[0] != 0 && w[1] != 0)
        .map(|w| -(f64::from(rank(w[0])) - f64::from(rank(w[1]))).abs())
        .sum()
}

/// Larger of the non-increasing and non-decreasing adjacent-pair counts.
pub(crate) fn line_monotonicity(line: &[Tile; 4]) -> f64 {
    let dec = line.windows(2).filter(|w| w[0] >= w[1]).count();
    let inc = line.windows(2).filter(|w| w[0] <= w[1]).count();
    dec.max(inc) as f64
}

/// Sum of log2 values of tiles equal to their successor in the line.
pub(crate) fn line_merges(line: &[Tile; 4]) -> f64 {
    line.windows(2)
        .filter(|w| w[0] != 0 && w[0] == w[1])
        .map(|w| f64::from(rank(w[0])))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev() -> Evaluator { Evaluator::default() }

    #[test]
    fn it_scores_empty_cells() {
        let e = ev();
        assert_eq!(e.empty_score(0), -200_000.0);
        assert_eq!(e.empty_score(1), 5000.0);
        assert_eq!(e.empty_score(2), 10_000.0);
        assert_eq!(e.empty_score(4), 3000.0 * 4.0 + 5000.0 * 2.0);
    }

    #[test]
    fn it_scores_corner_occupancy() {
        let e = ev();
        let corner = Board::from_rows([[0; 4], [0; 4], [0; 4], [0, 0, 0, 64]]);
        assert_eq!(e.corner_score(corner.cells()), 320.0);
        let edge = Board::from_rows([[0, 64, 0, 0], [0; 4], [0; 4], [0; 4]]);
        assert_eq!(e.corner_score(edge.cells()), -192.0);
        let interior = Board::from_rows([[0; 4], [0, 0, 64, 0], [0; 4], [0; 4]]);
        assert_eq!(e.corner_score(interior.cells()), -640.0);
    }

    #[test]
    fn it_scores_line_terms() {
        assert_eq!(line_smoothness(&[2, 8, 0, 8]), -2.0);
        assert_eq!(line_monotonicity(&[8, 4, 2, 0]), 3.0);
        assert_eq!(line_monotonicity(&[2, 8, 4, 16]), 2.0);
        assert_eq!(line_merges(&[4, 4, 4, 0]), 4.0);
        assert_eq!(line_merges(&[0, 0, 2, 4]), 0.0);
    }

    #[test]
    fn it_picks_best_snake_orientation() {
        let e = ev();
        let top_left = Board::from_rows([[2, 0, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let bottom_right = Board::from_rows([[0; 4], [0; 4], [0; 4], [0, 0, 0, 2]]);
        assert_eq!(e.snake(top_left.cells()), 876.0);
        assert_eq!(e.snake(bottom_right.cells()), 876.0);
    }

    #[test]
    fn it_evaluates_single_tile_board() {
        // snake 2*438, 15 empty cells, corner 2*5, no pairs,
        // monotonicity: 4 lines score 3 + 4 lines score 3 = 24.
        let b = Board::from_rows([[2, 0, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let expected = 876.0 + 3000.0 * 15.0 + 5000.0 * 15f64.log2() + 10.0 + 24.0 * 200.0;
        assert!((ev().evaluate(&b) - expected).abs() < 1e-9);
    }

    #[test]
    fn evaluate_is_deterministic() {
        let e = ev();
        let a = Board::from_rows([[1024, 512, 256, 2], [4, 8, 16, 32], [0, 0, 2, 2], [0, 4, 0, 0]]);
        let b = Board::from_rows([[2, 0, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let first = e.evaluate(&a);
        let _ = e.evaluate(&b);
        assert_eq!(first, e.evaluate(&a));
        assert_eq!(first, Evaluator::default().evaluate(&a));
    }

    #[test]
    fn prefers_max_tile_in_corner() {
        let e = ev();
        let corner = Board::from_rows([[256, 64, 16, 4], [0; 4], [0; 4], [0; 4]]);
        let interior = Board::from_rows([[64, 16, 4, 0], [0, 256, 0, 0], [0; 4], [0; 4]]);
        assert!(e.evaluate(&corner) > e.evaluate(&interior));
    }

    #[test]
    fn line_terms_sum_to_evaluation_components() {
        let e = ev();
        let b = Board::from_rows([[128, 64, 64, 2], [4, 8, 8, 2], [0, 0, 2, 4], [0, 0, 0, 4]]);
        let rows = b.rows();
        let cols = transpose_rows(&rows);
        let lines: f64 = rows.iter().chain(cols.iter()).map(|l| e.line_terms(l)).sum();
        let rest = e.snake(b.cells()) + e.empty_score(b.count_empty()) + e.corner_score(b.cells());
        assert!((e.evaluate(&b) - (rest + lines)).abs() < 1e-6);
    }
}
