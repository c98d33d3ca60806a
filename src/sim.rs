//! In-process game implementing the session's external contracts.
//!
//! The sensor can be made unreliable: tiles at or above `misread_min_tile`
//! may be confused with a neighbouring magnitude (fixed per value for the
//! whole game, like two close colors), and reads can fail outright. The
//! actuator can drop commands.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::engine::{simulate_move, Board, Cell, Move, Score, Tile};
use crate::powerup::{PowerUpCharges, PowerUpKind, PowerUpRequest};
use crate::session::{Actuator, PowerUpChannel, Sensor};

const HISTORY_LIMIT: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Chance that a high tile value is confused for the rest of the game.
    pub misread_prob: f64,
    pub misread_min_tile: Tile,
    /// Chance that a single read returns nothing.
    pub unavailable_prob: f64,
    /// Chance that a move command is silently ignored.
    pub drop_prob: f64,
    pub start_charges: PowerUpCharges,
    pub undo_milestone: Tile,
    pub swap_milestone: Tile,
    pub delete_milestone: Tile,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            misread_prob: 0.0,
            misread_min_tile: 128,
            unavailable_prob: 0.0,
            drop_prob: 0.0,
            start_charges: PowerUpCharges { undo: 2, swap: 1, delete: 0 },
            undo_milestone: 128,
            swap_milestone: 256,
            delete_milestone: 512,
        }
    }
}

/// A game of 2048 with power-ups and an imperfect interface.
///
/// ```
/// use merge2048::engine::Move;
/// use merge2048::session::{Actuator, Sensor};
/// use merge2048::sim::{SimConfig, SimulatedGame};
/// let mut game = SimulatedGame::new(SimConfig::default(), 7);
/// let before = game.observe().unwrap();
/// assert_eq!(before.count_empty(), 14);
/// for dir in Move::ALL {
///     game.apply(dir);
/// }
/// assert_ne!(game.observe().unwrap(), before);
/// ```
pub struct SimulatedGame {
    cfg: SimConfig,
    rng: StdRng,
    board: Board,
    score: Score,
    charges: PowerUpCharges,
    history: Vec<(Board, Score)>,
    /// Value -> what the sensor shows for it; `None` when read correctly.
    confusions: BTreeMap<Tile, Option<Tile>>,
    max_seen: Tile,
    dropped: u32,
    refocuses: u32,
}

impl SimulatedGame {
    /// New game with two random starting tiles.
    pub fn new(cfg: SimConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let board = Board::EMPTY.with_random_tile(&mut rng).with_random_tile(&mut rng);
        Self::with_rng(cfg, rng, board)
    }

    /// Game resumed from an arbitrary position.
    pub fn from_board(cfg: SimConfig, seed: u64, board: Board) -> Self {
        Self::with_rng(cfg, StdRng::seed_from_u64(seed), board)
    }

    fn with_rng(cfg: SimConfig, rng: StdRng, board: Board) -> Self {
        Self {
            charges: cfg.start_charges,
            cfg,
            rng,
            board,
            score: 0,
            history: Vec::new(),
            confusions: BTreeMap::new(),
            max_seen: board.max_tile(),
            dropped: 0,
            refocuses: 0,
        }
    }

    /// True board, bypassing the sensor.
    pub fn board(&self) -> Board { self.board }

    pub fn score(&self) -> Score { self.score }

    pub fn dropped_commands(&self) -> u32 { self.dropped }

    pub fn refocuses(&self) -> u32 { self.refocuses }

    fn roll(&mut self, p: f64) -> bool { p > 0.0 && self.rng.gen_bool(p.min(1.0)) }

    fn shown_as(&mut self, value: Tile) -> Tile {
        let p = self.cfg.misread_prob.clamp(0.0, 1.0);
        let rng = &mut self.rng;
        let shown = *self.confusions.entry(value).or_insert_with(|| {
            (p > 0.0 && rng.gen_bool(p)).then(|| match rng.gen_range(0..3) {
                0 => value / 2,
                1 => value / 4,
                _ => value * 2,
            })
        });
        shown.unwrap_or(value)
    }

    fn grant_milestones(&mut self) {
        let max = self.board.max_tile();
        let milestones = [
            (self.cfg.undo_milestone, PowerUpKind::Undo),
            (self.cfg.swap_milestone, PowerUpKind::Swap),
            (self.cfg.delete_milestone, PowerUpKind::Delete),
        ];
        for (threshold, kind) in milestones {
            if self.max_seen < threshold && max >= threshold {
                debug!(tile = threshold, kind = kind.name(), "milestone charge granted");
                self.charges.grant(kind);
            }
        }
        self.max_seen = self.max_seen.max(max);
    }

    fn remember(&mut self) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.remove(0);
        }
        self.history.push((self.board, self.score));
    }
}

#[inline]
fn in_bounds((r, c): Cell) -> bool { r < 4 && c < 4 }

impl Sensor for SimulatedGame {
    fn observe(&mut self) -> Option<Board> {
        if self.roll(self.cfg.unavailable_prob) {
            trace!("read failed");
            return None;
        }
        let min_tile = self.cfg.misread_min_tile;
        let mut cells = *self.board.cells();
        for v in cells.iter_mut().filter(|v| **v >= min_tile) {
            *v = self.shown_as(*v);
        }
        Some(Board::from_cells(cells))
    }

    // Simulated time: nothing to wait for.
    fn settle(&mut self, _delay: Duration) {}
}

impl Actuator for SimulatedGame {
    fn apply(&mut self, dir: Move) {
        if self.roll(self.cfg.drop_prob) {
            trace!(%dir, "command dropped");
            self.dropped += 1;
            return;
        }
        let result = simulate_move(&self.board, dir);
        if !result.moved {
            return;
        }
        self.remember();
        self.score += result.score;
        self.board = result.board.with_random_tile(&mut self.rng);
        self.grant_milestones();
    }

    fn refocus(&mut self) { self.refocuses += 1; }
}

impl PowerUpChannel for SimulatedGame {
    fn charges(&self) -> PowerUpCharges { self.charges }

    fn activate(&mut self, request: PowerUpRequest) -> bool {
        if !self.charges.has(request.kind()) {
            return false;
        }
        let next = match request {
            PowerUpRequest::Undo => match self.history.pop() {
                Some((board, score)) => {
                    self.score = score;
                    board
                }
                None => return false,
            },
            PowerUpRequest::Swap(a, b) => {
                if !in_bounds(a) || !in_bounds(b) {
                    return false;
                }
                let (x, y) = (self.board.get(a), self.board.get(b));
                if x == 0 || y == 0 || x == y {
                    return false;
                }
                self.remember();
                self.board.swapped(a, b)
            }
            PowerUpRequest::Delete(cell) => {
                if !in_bounds(cell) || self.board.get(cell) == 0 {
                    return false;
                }
                self.remember();
                self.board.without_value(self.board.get(cell))
            }
        };
        self.board = next;
        self.charges.consume(request.kind());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> SimConfig { SimConfig::default() }

    #[test]
    fn moves_spawn_a_tile() {
        let start = Board::from_rows([[2, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let mut game = SimulatedGame::from_board(quiet(), 1, start);
        game.apply(Move::Left);
        assert_eq!(game.board().get((0, 0)), 4);
        assert_eq!(game.board().count_empty(), 14);
        assert_eq!(game.score(), 4);
    }

    #[test]
    fn illegal_moves_change_nothing() {
        let start = Board::from_rows([[2, 4, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let mut game = SimulatedGame::from_board(quiet(), 1, start);
        game.apply(Move::Left);
        assert_eq!(game.board(), start);
    }

    #[test]
    fn dropped_commands_are_ignored() {
        let start = Board::from_rows([[2, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let mut game = SimulatedGame::from_board(SimConfig { drop_prob: 1.0, ..quiet() }, 1, start);
        game.apply(Move::Left);
        assert_eq!(game.board(), start);
        assert_eq!(game.dropped_commands(), 1);
    }

    #[test]
    fn unavailable_sensor_returns_nothing() {
        let mut game = SimulatedGame::new(SimConfig { unavailable_prob: 1.0, ..quiet() }, 3);
        assert_eq!(game.observe(), None);
    }

    #[test]
    fn misreads_only_touch_high_tiles_and_are_stable() {
        let start = Board::from_rows([[512, 256, 128, 64], [32, 16, 8, 4], [2, 0, 0, 0], [0; 4]]);
        let mut game = SimulatedGame::from_board(SimConfig { misread_prob: 1.0, ..quiet() }, 9, start);
        let first = game.observe().unwrap();
        assert_eq!(first, game.observe().unwrap());
        for (idx, (&seen, &truth)) in first.cells().iter().zip(start.cells()).enumerate() {
            if truth < 128 {
                assert_eq!(seen, truth, "cell {idx}");
            } else {
                assert!(seen == truth / 2 || seen == truth / 4 || seen == truth * 2, "cell {idx}: {seen}");
            }
        }
    }

    #[test]
    fn undo_restores_previous_board() {
        let start = Board::from_rows([[2, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let mut game = SimulatedGame::from_board(quiet(), 1, start);
        assert!(!game.activate(PowerUpRequest::Undo));
        game.apply(Move::Left);
        assert!(game.activate(PowerUpRequest::Undo));
        assert_eq!(game.board(), start);
        assert_eq!(game.score(), 0);
        assert_eq!(game.charges().undo, 1);
    }

    #[test]
    fn swap_and_delete_consume_charges() {
        let start = Board::from_rows([[2, 0, 0, 0], [0, 64, 0, 2], [0; 4], [0; 4]]);
        let cfg = SimConfig { start_charges: PowerUpCharges { undo: 0, swap: 1, delete: 1 }, ..quiet() };
        let mut game = SimulatedGame::from_board(cfg, 1, start);
        assert!(!game.activate(PowerUpRequest::Swap((0, 0), (1, 3))));
        assert!(game.activate(PowerUpRequest::Swap((0, 0), (1, 1))));
        assert_eq!(game.board().get((0, 0)), 64);
        assert!(!game.activate(PowerUpRequest::Swap((0, 0), (1, 1))));
        assert!(!game.activate(PowerUpRequest::Delete((3, 3))));
        assert!(game.activate(PowerUpRequest::Delete((1, 3))));
        assert_eq!(game.board().count_value(2), 0);
        assert_eq!(game.charges(), PowerUpCharges::default());
    }

    #[test]
    fn milestones_grant_charges_once() {
        let start = Board::from_rows([[64, 64, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let mut game = SimulatedGame::from_board(quiet(), 1, start);
        game.apply(Move::Left);
        assert_eq!(game.charges().undo, 3);
        game.apply(Move::Right);
        assert_eq!(game.charges().undo, 3);
    }
}
