//! Power-up policy: when to spend undo, swap and delete charges.
//!
//! Every decision is a pure function of boards, ranked moves and charges; the
//! session applies the recommendation and verifies it through the sensor.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{Board, Cell, Move, Tile};
use crate::expectimax::RankedMove;
use crate::heuristic::Evaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerUpKind { Undo, Swap, Delete }

impl PowerUpKind {
    pub fn name(self) -> &'static str {
        match self {
            PowerUpKind::Undo => "undo",
            PowerUpKind::Swap => "swap",
            PowerUpKind::Delete => "delete",
        }
    }
}

/// A concrete activation sent over the power-up channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerUpRequest {
    Undo,
    Swap(Cell, Cell),
    /// Deletes every tile with the value held by this cell.
    Delete(Cell),
}

impl PowerUpRequest {
    pub fn kind(&self) -> PowerUpKind {
        match self {
            PowerUpRequest::Undo => PowerUpKind::Undo,
            PowerUpRequest::Swap(..) => PowerUpKind::Swap,
            PowerUpRequest::Delete(_) => PowerUpKind::Delete,
        }
    }
}

/// Remaining uses of each power-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PowerUpCharges {
    pub undo: u32,
    pub swap: u32,
    pub delete: u32,
}

impl PowerUpCharges {
    pub fn get(&self, kind: PowerUpKind) -> u32 {
        match kind {
            PowerUpKind::Undo => self.undo,
            PowerUpKind::Swap => self.swap,
            PowerUpKind::Delete => self.delete,
        }
    }

    #[inline]
    pub fn has(&self, kind: PowerUpKind) -> bool { self.get(kind) > 0 }

    fn slot(&mut self, kind: PowerUpKind) -> &mut u32 {
        match kind {
            PowerUpKind::Undo => &mut self.undo,
            PowerUpKind::Swap => &mut self.swap,
            PowerUpKind::Delete => &mut self.delete,
        }
    }

    /// Spend one charge; false when none is left.
    pub fn consume(&mut self, kind: PowerUpKind) -> bool {
        let slot = self.slot(kind);
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }

    pub fn grant(&mut self, kind: PowerUpKind) { *self.slot(kind) += 1; }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapTarget {
    pub a: Cell,
    pub b: Cell,
    pub gain: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeleteTarget {
    pub value: Tile,
    /// First cell (row-major) holding `value`.
    pub cell: Cell,
    pub gain: f64,
}

/// Why [`PowerUpPolicy::should_undo`] fired.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UndoReason {
    /// The significant max tile left its corner.
    LostCorner,
    /// The runner-up move was predicted to be clearly better than the outcome.
    ScoreDrop { runner_up: f64, actual: f64 },
    /// Free cells collapsed in one move.
    SpaceCollapse { before: usize, after: usize },
}

/// Thresholds for the power-up decisions (calibration data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerUpConfig {
    /// Max tiles below this never trigger the corner or score-drop undo.
    pub significant_tile: Tile,
    pub score_drop_floor: f64,
    pub score_drop_ratio: f64,
    /// Space collapse: from at least this many free cells...
    pub collapse_from: usize,
    /// ...to at most this many.
    pub collapse_to: usize,
    /// Swap must gain more than this fraction of |current evaluation|.
    pub swap_min_gain_ratio: f64,
    /// Delete candidates are at most `max_tile / delete_max_divisor`.
    pub delete_max_divisor: Tile,
    pub proactive_delete_max_empty: usize,
    pub proactive_delete_min_tile: Tile,
}

impl Default for PowerUpConfig {
    fn default() -> Self {
        Self {
            significant_tile: 64,
            score_drop_floor: 5000.0,
            score_drop_ratio: 0.15,
            collapse_from: 4,
            collapse_to: 1,
            swap_min_gain_ratio: 0.1,
            delete_max_divisor: 4,
            proactive_delete_max_empty: 1,
            proactive_delete_min_tile: 128,
        }
    }
}

pub struct PowerUpPolicy {
    cfg: PowerUpConfig,
    evaluator: Evaluator,
}

impl PowerUpPolicy {
    pub fn new(cfg: PowerUpConfig, evaluator: Evaluator) -> Self { Self { cfg, evaluator } }

    pub fn config(&self) -> &PowerUpConfig { &self.cfg }

    /// Judge a move that turned `before` into the observed `after`.
    ///
    /// `ranked` is the search output the move was chosen from; its second
    /// entry is the runner-up. Fewer than two candidates never trigger.
    pub fn should_undo(&self, before: &Board, after: &Board, ranked: &[RankedMove]) -> Option<UndoReason> {
        let runner_up = ranked.get(1)?;
        let cfg = &self.cfg;
        let significant = before.max_tile() >= cfg.significant_tile;

        if significant && before.corner_has_max() && !after.corner_has_max() {
            return Some(UndoReason::LostCorner);
        }
        if significant {
            let alt = self.evaluator.evaluate(&runner_up.board);
            let actual = self.evaluator.evaluate(after);
            if alt - actual > cfg.score_drop_floor.max(cfg.score_drop_ratio * alt.abs()) {
                return Some(UndoReason::ScoreDrop { runner_up: alt, actual });
            }
        }
        let (free_before, free_after) = (before.count_empty(), after.count_empty());
        if free_before >= cfg.collapse_from && free_after <= cfg.collapse_to {
            return Some(UndoReason::SpaceCollapse { before: free_before, after: free_after });
        }
        None
    }

    /// Direction to resend after an undo, when one is warranted and affordable.
    pub fn undo_plan(
        &self,
        before: &Board,
        after: &Board,
        ranked: &[RankedMove],
        charges: &PowerUpCharges,
    ) -> Option<(Move, UndoReason)> {
        if !charges.has(PowerUpKind::Undo) {
            return None;
        }
        let reason = self.should_undo(before, after, ranked)?;
        debug!(?reason, runner_up = %ranked[1].dir, "undo recommended");
        Some((ranked[1].dir, reason))
    }

    /// Best evaluation-improving swap of two occupied, unequal cells.
    ///
    /// Only returned when the gain clears the minimum ratio of the current
    /// evaluation's magnitude.
    pub fn find_best_swap(&self, board: &Board) -> Option<SwapTarget> {
        let base = self.evaluator.evaluate(board);
        let cells = board.cells();
        let occupied: Vec<usize> = (0..16).filter(|&i| cells[i] != 0).collect();
        let mut best: Option<SwapTarget> = None;
        for (n, &i) in occupied.iter().enumerate() {
            for &j in &occupied[n + 1..] {
                if cells[i] == cells[j] {
                    continue;
                }
                let (a, b) = ((i / 4, i % 4), (j / 4, j % 4));
                let gain = self.evaluator.evaluate(&board.swapped(a, b)) - base;
                if best.map_or(true, |t| gain > t.gain) {
                    best = Some(SwapTarget { a, b, gain });
                }
            }
        }
        best.filter(|t| t.gain > 0.0 && t.gain > self.cfg.swap_min_gain_ratio * base.abs())
    }

    /// Tile value whose removal helps the evaluation most.
    ///
    /// Values above `max_tile / 4` are protected. The best gain may be
    /// negative; callers only delete as a last resort.
    ///
    /// ```
    /// use merge2048::engine::Board;
    /// use merge2048::heuristic::Evaluator;
    /// use merge2048::powerup::{PowerUpConfig, PowerUpPolicy};
    /// let policy = PowerUpPolicy::new(PowerUpConfig::default(), Evaluator::default());
    /// let b = Board::from_rows([[512, 0, 0, 0], [0, 0, 8, 0], [0; 4], [0; 4]]);
    /// let target = policy.find_best_delete(&b).unwrap();
    /// assert_eq!((target.value, target.cell), (8, (1, 2)));
    /// ```
    pub fn find_best_delete(&self, board: &Board) -> Option<DeleteTarget> {
        let limit = board.max_tile() / self.cfg.delete_max_divisor.max(1);
        let base = self.evaluator.evaluate(board);
        // Distinct candidates in row-major first-seen order; ties keep the earliest.
        let mut values: Vec<Tile> = Vec::new();
        for &v in board.cells() {
            if v != 0 && v <= limit && !values.contains(&v) {
                values.push(v);
            }
        }
        let mut best: Option<DeleteTarget> = None;
        for value in values {
            let gain = self.evaluator.evaluate(&board.without_value(value)) - base;
            if best.map_or(true, |t| gain > t.gain) {
                let cell = board.cells_with_value(value)[0];
                best = Some(DeleteTarget { value, cell, gain });
            }
        }
        best
    }

    /// Near-dead board worth a delete even without being stuck.
    pub fn wants_proactive_delete(&self, board: &Board, charges: &PowerUpCharges) -> bool {
        let cfg = &self.cfg;
        let empty = board.count_empty();
        empty <= cfg.proactive_delete_max_empty
            && board.max_tile() >= cfg.proactive_delete_min_tile
            && charges.has(PowerUpKind::Delete)
            && (!board.has_legal_move() || empty == 0)
    }
}
