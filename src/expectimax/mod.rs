//! Expectimax search over agent moves and random tile spawns.
//!
//! Two interchangeable backends implement the same narrow contract
//! ([`SearchBackend`]): given 16 row-major tile values and a depth, return up
//! to four `(score, direction code)` pairs sorted best first.
//! - [`Expectimax`]: reference backend, plain recursion over [`Board`].
//! - [`ExpectimaxParallel`]: accelerated backend on a packed `u64` board with
//!   line lookup tables, a transposition table and rayon across root branches.
//!
//! [`SearchEngine`] picks one backend at construction and turns its output
//! into [`RankedMove`]s. Callers never learn which backend is active.
//!
//! Depth counts plies: a Max node recurses into Chance nodes at `depth - 1`
//! and vice versa. Depth 0 is the evaluator.
//!
//! Quick start
//! ```
//! use merge2048::engine::Board;
//! use merge2048::expectimax::{BackendKind, ExpectimaxConfig, SearchEngine};
//! use merge2048::heuristic::HeuristicConfig;
//!
//! let cfg = ExpectimaxConfig { backend: BackendKind::Reference, ..Default::default() };
//! let engine = SearchEngine::new(&cfg, &HeuristicConfig::default());
//! let b = Board::from_rows([[2, 2, 0, 0], [0, 4, 0, 0], [0; 4], [0; 4]]);
//! let ranked = engine.ranked_moves(&b, 2);
//! assert!(!ranked.is_empty());
//! assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::{simulate_move, Board, Move, Tile};
use crate::heuristic::HeuristicConfig;

pub(crate) mod packed;
mod search_par;
mod search_seq;

pub use search_par::ExpectimaxParallel;
pub use search_seq::Expectimax;

/// Spawn probabilities of a 2 and a 4 tile.
pub const SPAWN_TWO_PROB: f64 = 0.9;
pub const SPAWN_FOUR_PROB: f64 = 0.1;

/// Score for one legal root move as returned by a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchScore {
    pub ev: f64,
    /// Direction code: 0=up, 1=down, 2=left, 3=right.
    pub code: u8,
}

/// Result of one backend call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    /// At most four entries, sorted by `ev` descending.
    pub branches: Vec<BranchScore>,
    /// Nodes visited, for diagnostics only.
    pub nodes: u64,
}

/// Swappable search implementation.
///
/// Implementations must be stateless across calls and agree on ranking:
/// legal directions only, scores = chance value at `depth` plus the move's
/// merge score, sorted descending with ties left in direction-code order.
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn search(&self, cells: &[Tile; 16], depth: u32) -> Ranking;

    /// Adaptive depth thresholds tuned to this backend's speed.
    fn depth_table(&self) -> &DepthTable;

    /// Largest tile value searched exactly. Boards holding a larger tile
    /// still rank, but scores are no longer comparable across backends.
    fn max_tile(&self) -> Tile { Tile::MAX }
}

/// Scored legal move before the random tile spawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedMove {
    pub score: f64,
    pub dir: Move,
    pub board: Board,
}

/// Which backend [`SearchEngine::new`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Reference,
    Accelerated,
    /// Accelerated when available; it always is when built from this crate.
    #[default]
    Auto,
}

/// One max-tile bucket of a [`DepthTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthTier {
    /// Tier applies when the max tile is at least this value.
    pub min_max_tile: Tile,
    /// `[min_empty, depth]` pairs; the first with `empty >= min_empty` wins.
    pub by_empty: Vec<[u32; 2]>,
}

/// Adaptive depth lookup keyed by (max tile bucket, free-cell bucket).
///
/// Tiers are checked in order, so list them from the highest `min_max_tile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthTable {
    pub tiers: Vec<DepthTier>,
}

impl DepthTable {
    /// Thresholds for the reference backend.
    pub fn reference() -> Self {
        Self { tiers: vec![DepthTier { min_max_tile: 0, by_empty: vec![[8, 3], [4, 4], [0, 5]] }] }
    }

    /// Thresholds for the accelerated backend.
    pub fn accelerated() -> Self {
        Self {
            tiers: vec![
                DepthTier { min_max_tile: 1024, by_empty: vec![[8, 7], [4, 8], [0, 9]] },
                DepthTier { min_max_tile: 512, by_empty: vec![[4, 7], [0, 8]] },
                DepthTier { min_max_tile: 0, by_empty: vec![[10, 5], [6, 6], [0, 7]] },
            ],
        }
    }

    /// Depth for a position with max tile `max_tile` and `empty` free cells.
    ///
    /// ```
    /// use merge2048::expectimax::DepthTable;
    /// let t = DepthTable::accelerated();
    /// assert_eq!(t.depth_for(2048, 1), 9);
    /// assert_eq!(t.depth_for(64, 12), 5);
    /// assert_eq!(DepthTable::reference().depth_for(64, 3), 5);
    /// ```
    pub fn depth_for(&self, max_tile: Tile, empty: usize) -> u32 {
        let empty = empty as u32;
        self.tiers
            .iter()
            .find(|tier| max_tile >= tier.min_max_tile)
            .and_then(|tier| tier.by_empty.iter().find(|[min, _]| empty >= *min))
            .map(|[_, depth]| *depth)
            .unwrap_or(1)
    }
}

/// Configurable knobs for the search engine. Defaults preserve calibrated behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectimaxConfig {
    pub backend: BackendKind,
    /// Chance nodes with more empty cells keep only this many.
    pub max_chance_cells: usize,
    /// Optional hard cap on the adaptive depth.
    pub depth_cap: Option<u32>,
    /// Enable/disable transposition caching in the accelerated backend.
    pub cache_enabled: bool,
    /// Spread root branches over the rayon pool in the accelerated backend.
    pub parallel: bool,
    pub reference_depths: DepthTable,
    pub accelerated_depths: DepthTable,
}

impl Default for ExpectimaxConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            max_chance_cells: 6,
            depth_cap: None,
            cache_enabled: true,
            parallel: true,
            reference_depths: DepthTable::reference(),
            accelerated_depths: DepthTable::accelerated(),
        }
    }
}

/// Basic search stats for the last ranking.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchStats {
    pub nodes: u64,
    pub depth: u32,
}

/// Row-major indices of the empty cells a chance node expands.
///
/// Above `cap` cells, the ones with the most occupied neighbours are kept,
/// ties resolved by lower index.
pub(crate) fn chance_cells(empty: &[usize], cap: usize, occupied: impl Fn(usize) -> bool) -> Vec<usize> {
    let cap = cap.max(1);
    if empty.len() <= cap {
        return empty.to_vec();
    }
    let mut scored: Vec<(usize, usize)> = empty
        .iter()
        .map(|&idx| {
            let (r, c) = (idx / 4, idx % 4);
            let mut adj = 0;
            if r > 0 && occupied(idx - 4) { adj += 1; }
            if r < 3 && occupied(idx + 4) { adj += 1; }
            if c > 0 && occupied(idx - 1) { adj += 1; }
            if c < 3 && occupied(idx + 1) { adj += 1; }
            (adj, idx)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(cap).map(|(_, idx)| idx).collect()
}

/// Sort branches best first; the sort is stable so ties keep direction order.
pub(crate) fn sort_branches(branches: &mut [BranchScore]) {
    branches.sort_by(|a, b| b.ev.partial_cmp(&a.ev).unwrap_or(std::cmp::Ordering::Equal));
}

/// Search facade holding the backend selected at construction.
pub struct SearchEngine {
    backend: Box<dyn SearchBackend>,
    depth_cap: Option<u32>,
    last_nodes: AtomicU64,
    last_depth: AtomicU32,
}

impl SearchEngine {
    pub fn new(cfg: &ExpectimaxConfig, heuristic: &HeuristicConfig) -> Self {
        let backend: Box<dyn SearchBackend> = match cfg.backend {
            BackendKind::Reference => Box::new(Expectimax::with_config(cfg, heuristic)),
            BackendKind::Accelerated | BackendKind::Auto => Box::new(ExpectimaxParallel::with_config(cfg, heuristic)),
        };
        debug!(backend = backend.name(), "search backend selected");
        Self::with_backend(backend, cfg.depth_cap)
    }

    pub fn with_backend(backend: Box<dyn SearchBackend>, depth_cap: Option<u32>) -> Self {
        Self { backend, depth_cap, last_nodes: AtomicU64::new(0), last_depth: AtomicU32::new(0) }
    }

    pub fn backend_name(&self) -> &'static str { self.backend.name() }

    /// Adaptive depth for `board` from the active backend's table.
    pub fn depth_for(&self, board: &Board) -> u32 {
        let depth = self.backend.depth_table().depth_for(board.max_tile(), board.count_empty());
        match self.depth_cap { Some(cap) => depth.min(cap), None => depth }
    }

    /// Legal moves with their search scores, best first.
    pub fn ranked_moves(&self, board: &Board, depth: u32) -> Vec<RankedMove> {
        if board.max_tile() > self.backend.max_tile() {
            warn!(
                backend = self.backend.name(),
                max_tile = board.max_tile(),
                bound = self.backend.max_tile(),
                "tile exceeds backend range; ranking is approximate"
            );
        }
        let ranking = self.backend.search(board.cells(), depth);
        self.last_nodes.store(ranking.nodes, Ordering::Relaxed);
        self.last_depth.store(depth, Ordering::Relaxed);
        ranking
            .branches
            .iter()
            .filter_map(|branch| {
                let dir = Move::from_code(branch.code)?;
                let result = simulate_move(board, dir);
                result.moved.then_some(RankedMove { score: branch.ev, dir, board: result.board })
            })
            .collect()
    }

    /// Best move at the adaptive depth, or `None` when no move is legal.
    pub fn best_move(&self, board: &Board) -> Option<Move> {
        self.ranked_moves(board, self.depth_for(board)).first().map(|m| m.dir)
    }

    /// Statistics collected from the last call to [`Self::ranked_moves`].
    pub fn last_stats(&self) -> SearchStats {
        SearchStats { nodes: self.last_nodes.load(Ordering::Relaxed), depth: self.last_depth.load(Ordering::Relaxed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engines() -> Vec<SearchEngine> {
        let h = HeuristicConfig::default();
        [BackendKind::Reference, BackendKind::Accelerated]
            .into_iter()
            .map(|backend| SearchEngine::new(&ExpectimaxConfig { backend, ..Default::default() }, &h))
            .collect()
    }

    #[test]
    fn it_keeps_cells_with_most_neighbours() {
        // Occupied: index 5 only; its neighbours 1, 4, 6, 9 have one occupied neighbour.
        let empty: Vec<usize> = (0..16).filter(|&i| i != 5).collect();
        let kept = chance_cells(&empty, 6, |i| i == 5);
        assert_eq!(kept, vec![1, 4, 6, 9, 0, 2]);
        assert_eq!(chance_cells(&[3, 7], 6, |_| false), vec![3, 7]);
    }

    #[test]
    fn it_looks_up_depths() {
        let t = DepthTable::accelerated();
        assert_eq!(t.depth_for(1024, 8), 7);
        assert_eq!(t.depth_for(1024, 5), 8);
        assert_eq!(t.depth_for(512, 3), 8);
        assert_eq!(t.depth_for(256, 6), 6);
        let r = DepthTable::reference();
        assert_eq!(r.depth_for(4096, 9), 3);
        assert_eq!(r.depth_for(2, 4), 4);
        assert_eq!(DepthTable { tiers: vec![] }.depth_for(2, 4), 1);
    }

    #[test]
    fn ranked_moves_only_contain_legal_moves() {
        let b = Board::from_rows([[2, 4, 8, 16], [0; 4], [0; 4], [0; 4]]);
        for engine in engines() {
            let ranked = engine.ranked_moves(&b, 2);
            let dirs: Vec<Move> = ranked.iter().map(|m| m.dir).collect();
            assert!(!dirs.contains(&Move::Up), "{}", engine.backend_name());
            assert!(!dirs.contains(&Move::Left));
            assert!(!dirs.contains(&Move::Right));
            assert_eq!(dirs, vec![Move::Down]);
            assert_eq!(ranked[0].board, simulate_move(&b, Move::Down).board);
        }
    }

    #[test]
    fn no_moves_on_dead_board() {
        let dead = Board::from_rows([[2, 4, 2, 4], [4, 2, 4, 2], [2, 4, 2, 4], [4, 2, 4, 2]]);
        for engine in engines() {
            assert!(engine.ranked_moves(&dead, 3).is_empty());
            assert_eq!(engine.best_move(&dead), None);
        }
    }

    #[test]
    fn backends_agree_on_ranking() {
        let boards = [
            Board::from_rows([[2, 2, 0, 0], [0, 4, 0, 0], [0; 4], [0; 4]]),
            Board::from_rows([[256, 128, 64, 8], [4, 16, 32, 2], [2, 0, 4, 0], [0, 0, 2, 0]]),
            Board::from_rows([[1024, 512, 256, 128], [8, 16, 32, 64], [4, 2, 4, 2], [2, 0, 0, 4]]),
        ];
        let engines = engines();
        for b in boards {
            for depth in 0..=3 {
                let reference = engines[0].ranked_moves(&b, depth);
                let accelerated = engines[1].ranked_moves(&b, depth);
                assert_eq!(reference.len(), accelerated.len());
                for (r, a) in reference.iter().zip(&accelerated) {
                    let tol = 1e-9 * r.score.abs().max(1.0);
                    assert!((r.score - a.score).abs() <= tol, "{} vs {} at depth {depth}", r.score, a.score);
                }
                // Same score multiset; order may only differ between exact ties.
                if let (Some(r), Some(a)) = (reference.first(), accelerated.first()) {
                    assert!((r.score - a.score).abs() <= 1e-9 * r.score.abs().max(1.0));
                }
            }
        }
    }

    #[test]
    fn it_caps_adaptive_depth() {
        let h = HeuristicConfig::default();
        let cfg = ExpectimaxConfig { backend: BackendKind::Reference, depth_cap: Some(2), ..Default::default() };
        let engine = SearchEngine::new(&cfg, &h);
        let b = Board::from_rows([[2, 0, 0, 0], [0; 4], [0; 4], [0; 4]]);
        assert_eq!(engine.depth_for(&b), 2);
        engine.ranked_moves(&b, 1);
        assert_eq!(engine.last_stats().depth, 1);
        assert!(engine.last_stats().nodes > 0);
    }
}
