use crate::engine::{simulate_move, Board, Move, Tile};
use crate::heuristic::{Evaluator, HeuristicConfig};

use super::{chance_cells, sort_branches, BranchScore, DepthTable, ExpectimaxConfig, Ranking, SearchBackend, SPAWN_FOUR_PROB, SPAWN_TWO_PROB};

enum Node { Max, Chance }

/// Reference single-threaded Expectimax over [`Board`] values.
///
/// Slow but portable; every other backend must reproduce its ranking.
pub struct Expectimax {
    evaluator: Evaluator,
    max_chance_cells: usize,
    depths: DepthTable,
}

impl Expectimax {
    pub fn new() -> Self { Self::with_config(&ExpectimaxConfig::default(), &HeuristicConfig::default()) }

    pub fn with_config(cfg: &ExpectimaxConfig, heuristic: &HeuristicConfig) -> Self {
        Self {
            evaluator: Evaluator::new(heuristic.clone()),
            max_chance_cells: cfg.max_chance_cells,
            depths: cfg.reference_depths.clone(),
        }
    }

    /// Node value of `board` at `depth`; a Max node when `is_max`.
    ///
    /// Depth 0 returns the evaluator for either node kind.
    ///
    /// ```
    /// use merge2048::engine::Board;
    /// use merge2048::expectimax::Expectimax;
    /// use merge2048::heuristic::Evaluator;
    /// let b = Board::from_rows([[2, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
    /// assert_eq!(Expectimax::new().value(&b, 0, true), Evaluator::default().evaluate(&b));
    /// ```
    pub fn value(&self, board: &Board, depth: u32, is_max: bool) -> f64 {
        let mut state_count = 0u64;
        let node = if is_max { Node::Max } else { Node::Chance };
        self.expectimax(board, node, depth, &mut state_count)
    }

    fn expectimax(&self, board: &Board, node: Node, depth: u32, state_count: &mut u64) -> f64 {
        *state_count += 1;
        if depth == 0 {
            return self.evaluator.evaluate(board);
        }
        match node {
            Node::Max => self.evaluate_max(board, depth, state_count),
            Node::Chance => self.evaluate_chance(board, depth, state_count),
        }
    }

    fn evaluate_max(&self, board: &Board, depth: u32, state_count: &mut u64) -> f64 {
        let mut best: Option<f64> = None;
        for &direction in &Move::ALL {
            let result = simulate_move(board, direction);
            if !result.moved {
                continue;
            }
            let score = self.expectimax(&result.board, Node::Chance, depth - 1, state_count) + result.score as f64;
            best = Some(best.map_or(score, |b: f64| b.max(score)));
        }
        best.unwrap_or_else(|| self.evaluator.evaluate(board))
    }

    fn evaluate_chance(&self, board: &Board, depth: u32, state_count: &mut u64) -> f64 {
        let cells = board.cells();
        let empty: Vec<usize> = (0..16).filter(|&i| cells[i] == 0).collect();
        if empty.is_empty() {
            return self.evaluator.evaluate(board);
        }
        let kept = chance_cells(&empty, self.max_chance_cells, |i| cells[i] != 0);
        let mut total = 0.0;
        for &idx in &kept {
            let cell = (idx / 4, idx % 4);
            for (value, prob) in [(2, SPAWN_TWO_PROB), (4, SPAWN_FOUR_PROB)] {
                let spawned = board.with_tile(cell, value);
                total += prob * self.expectimax(&spawned, Node::Max, depth - 1, state_count);
            }
        }
        total / kept.len() as f64
    }
}

impl SearchBackend for Expectimax {
    fn name(&self) -> &'static str { "reference" }

    fn search(&self, cells: &[Tile; 16], depth: u32) -> Ranking {
        let board = Board::from_cells(*cells);
        let mut state_count = 0u64;
        let mut branches = Vec::with_capacity(4);
        for &dir in &Move::ALL {
            let result = simulate_move(&board, dir);
            if !result.moved {
                continue;
            }
            let ev = self.expectimax(&result.board, Node::Chance, depth, &mut state_count) + result.score as f64;
            branches.push(BranchScore { ev, code: dir.code() });
        }
        sort_branches(&mut branches);
        Ranking { branches, nodes: state_count }
    }

    fn depth_table(&self) -> &DepthTable { &self.depths }
}

impl Default for Expectimax { fn default() -> Self { Self::new() } }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_zero_is_evaluation() {
        let ex = Expectimax::new();
        let ev = Evaluator::default();
        let boards = [
            Board::EMPTY,
            Board::from_rows([[2, 4, 2, 4], [4, 2, 4, 2], [2, 4, 2, 4], [4, 2, 4, 2]]),
            Board::from_rows([[128, 64, 0, 0], [2, 0, 0, 0], [0; 4], [0, 0, 0, 2]]),
        ];
        for b in boards {
            assert_eq!(ex.value(&b, 0, true), ev.evaluate(&b));
            assert_eq!(ex.value(&b, 0, false), ev.evaluate(&b));
        }
    }

    #[test]
    fn terminal_nodes_fall_back_to_evaluation() {
        let ex = Expectimax::new();
        let ev = Evaluator::default();
        let dead = Board::from_rows([[2, 4, 2, 4], [4, 2, 4, 2], [2, 4, 2, 4], [4, 2, 4, 2]]);
        assert_eq!(ex.value(&dead, 3, true), ev.evaluate(&dead));
        assert_eq!(ex.value(&dead, 3, false), ev.evaluate(&dead));
    }

    #[test]
    fn chance_node_averages_spawns() {
        // One empty cell: value = 0.9 * eval(with 2) + 0.1 * eval(with 4) at depth 1.
        let ex = Expectimax::new();
        let ev = Evaluator::default();
        let b = Board::from_rows([[2, 4, 2, 4], [4, 2, 4, 2], [2, 4, 2, 4], [4, 2, 4, 0]]);
        let expected = 0.9 * ev.evaluate(&b.with_tile((3, 3), 2)) + 0.1 * ev.evaluate(&b.with_tile((3, 3), 4));
        assert!((ex.value(&b, 1, false) - expected).abs() < 1e-9);
    }

    #[test]
    fn max_node_adds_merge_score() {
        let ex = Expectimax::new();
        let ev = Evaluator::default();
        let b = Board::from_rows([[2, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let best = Move::ALL
            .iter()
            .map(|&d| simulate_move(&b, d))
            .filter(|r| r.moved)
            .map(|r| ev.evaluate(&r.board) + r.score as f64)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(ex.value(&b, 1, true), best);
    }

    #[test]
    fn search_ranks_branches_descending() {
        let ex = Expectimax::new();
        let b = Board::from_rows([[0, 2, 0, 0], [2, 0, 0, 4], [0; 4], [0; 4]]);
        let ranking = ex.search(b.cells(), 2);
        assert_eq!(ranking.branches.len(), 4);
        assert!(ranking.branches.windows(2).all(|w| w[0].ev >= w[1].ev));
        assert!(ranking.nodes > 4);
    }
}
