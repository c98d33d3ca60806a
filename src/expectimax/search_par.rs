use std::collections::HashMap;

use ahash::RandomState as AHasher;
use rayon::prelude::*;

use crate::engine::{Move, Tile};
use crate::heuristic::{Evaluator, HeuristicConfig};

use super::packed::{self, Packed};
use super::{
    chance_cells, sort_branches, BranchScore, DepthTable, ExpectimaxConfig, Ranking, SearchBackend, SPAWN_FOUR_PROB,
    SPAWN_TWO_PROB,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Node { Max, Chance }

/// Keyed on remaining depth and node kind so a hit never changes a value.
type Cache = HashMap<(Packed, u32, Node), f64, AHasher>;

const CACHE_LIMIT: usize = 1 << 22;

/// Accelerated Expectimax on packed boards.
///
/// Moves and the row/column heuristic terms come from 65 536-entry line
/// tables. Each root branch runs on the rayon pool with its own
/// transposition table, so a call shares no mutable state.
pub struct ExpectimaxParallel {
    evaluator: Evaluator,
    line_terms: Box<[f64]>,
    max_chance_cells: usize,
    cache_enabled: bool,
    parallel: bool,
    depths: DepthTable,
}

impl ExpectimaxParallel {
    pub fn new() -> Self { Self::with_config(&ExpectimaxConfig::default(), &HeuristicConfig::default()) }

    pub fn with_config(cfg: &ExpectimaxConfig, heuristic: &HeuristicConfig) -> Self {
        packed::warm();
        let evaluator = Evaluator::new(heuristic.clone());
        let line_terms = (0..=u16::MAX)
            .map(|line| evaluator.line_terms(&packed::line_values(line)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            evaluator,
            line_terms,
            max_chance_cells: cfg.max_chance_cells,
            cache_enabled: cfg.cache_enabled,
            parallel: cfg.parallel,
            depths: cfg.accelerated_depths.clone(),
        }
    }

    /// Node value of `cells` at `depth`; a Max node when `is_max`.
    pub fn value(&self, cells: &[Tile; 16], depth: u32, is_max: bool) -> f64 {
        let mut cache = Cache::with_hasher(AHasher::new());
        let node = if is_max { Node::Max } else { Node::Chance };
        self.expectimax(packed::pack(cells), node, depth, &mut cache, &mut 0)
    }

    fn evaluate(&self, board: Packed) -> f64 {
        let cells = packed::unpack(board);
        let transposed = packed::transpose(board);
        let lines = (0..4).fold(0.0, |acc, idx| {
            acc + self.line_terms[packed::extract_line(board, idx) as usize]
                + self.line_terms[packed::extract_line(transposed, idx) as usize]
        });
        self.evaluator.snake(&cells)
            + self.evaluator.empty_score(packed::count_empty(board))
            + self.evaluator.corner_score(&cells)
            + lines
    }

    fn expectimax(&self, board: Packed, node: Node, depth: u32, cache: &mut Cache, nodes: &mut u64) -> f64 {
        *nodes += 1;
        if depth == 0 {
            return self.evaluate(board);
        }
        if self.cache_enabled {
            if let Some(&score) = cache.get(&(board, depth, node)) {
                return score;
            }
        }
        let score = match node {
            Node::Max => self.evaluate_max(board, depth, cache, nodes),
            Node::Chance => self.evaluate_chance(board, depth, cache, nodes),
        };
        if self.cache_enabled {
            if cache.len() >= CACHE_LIMIT {
                cache.clear();
            }
            cache.insert((board, depth, node), score);
        }
        score
    }

    fn evaluate_max(&self, board: Packed, depth: u32, cache: &mut Cache, nodes: &mut u64) -> f64 {
        let mut best: Option<f64> = None;
        for &dir in &Move::ALL {
            let (new_board, merged) = packed::shift(board, dir);
            if new_board == board {
                continue;
            }
            let score = self.expectimax(new_board, Node::Chance, depth - 1, cache, nodes) + merged;
            best = Some(best.map_or(score, |b: f64| b.max(score)));
        }
        best.unwrap_or_else(|| self.evaluate(board))
    }

    fn evaluate_chance(&self, board: Packed, depth: u32, cache: &mut Cache, nodes: &mut u64) -> f64 {
        let empty: Vec<usize> = (0..16).filter(|&idx| packed::nibble(board, idx) == 0).collect();
        if empty.is_empty() {
            return self.evaluate(board);
        }
        let slots = chance_cells(&empty, self.max_chance_cells, |idx| packed::nibble(board, idx) != 0);
        let mut total = 0.0;
        for &idx in &slots {
            for (rank, prob) in [(1, SPAWN_TWO_PROB), (2, SPAWN_FOUR_PROB)] {
                let spawned = packed::with_rank(board, idx, rank);
                total += prob * self.expectimax(spawned, Node::Max, depth - 1, cache, nodes);
            }
        }
        total / slots.len() as f64
    }
}

impl SearchBackend for ExpectimaxParallel {
    fn name(&self) -> &'static str { "accelerated" }

    fn max_tile(&self) -> Tile { packed::MAX_TILE }

    fn search(&self, cells: &[Tile; 16], depth: u32) -> Ranking {
        let board = packed::pack(cells);
        let branch = |&dir: &Move| -> Option<(BranchScore, u64)> {
            let (new_board, merged) = packed::shift(board, dir);
            if new_board == board {
                return None;
            }
            let mut cache = Cache::with_hasher(AHasher::new());
            let mut nodes = 0u64;
            let ev = self.expectimax(new_board, Node::Chance, depth, &mut cache, &mut nodes) + merged;
            Some((BranchScore { ev, code: dir.code() }, nodes))
        };
        let results: Vec<(BranchScore, u64)> = if self.parallel {
            Move::ALL.par_iter().filter_map(branch).collect()
        } else {
            Move::ALL.iter().filter_map(branch).collect()
        };
        let nodes = results.iter().map(|(_, n)| n).sum();
        let mut branches: Vec<BranchScore> = results.into_iter().map(|(b, _)| b).collect();
        sort_branches(&mut branches);
        Ranking { branches, nodes }
    }

    fn depth_table(&self) -> &DepthTable { &self.depths }
}

impl Default for ExpectimaxParallel { fn default() -> Self { Self::new() } }
