//! Belief estimator: tracks the true board across moves from noisy readings.
//!
//! The sensor is reliable for empty cells and freshly spawned 2/4 tiles but
//! confuses high tiles whose colors are close. The estimator therefore
//! advances its believed board with [`simulate_move`], takes spawned tiles
//! from the observation, and keeps believed high tiles when the observation
//! differs by a plausible x2/x4 factor.
//!
//! ```
//! use merge2048::belief::{reconcile, BeliefConfig};
//! use merge2048::engine::Board;
//! let believed = Board::from_rows([[128, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
//! let observed = Board::from_rows([[32, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
//! assert_eq!(reconcile(&believed, &observed, &BeliefConfig::default()), believed);
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{simulate_move, Board, Move, Tile};

/// Calibration thresholds for reconciliation and divergence detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeliefConfig {
    /// Believed tiles at or above this value outrank the sensor.
    pub high_tile: Tile,
    /// Smallest observed value a high tile is plausibly misread as.
    pub misread_floor: Tile,
    /// Count-level recovery only runs when the believed max reaches this.
    pub recovery_min_max: Tile,
    /// Divisors of the believed max searched for a misread copy.
    pub recovery_divisors: Vec<Tile>,
    /// Count-level recovery stops at fractions below this value.
    pub recovery_floor: Tile,
    /// Implausible value mismatches that count as divergence.
    pub divergence_mismatches: usize,
}

impl Default for BeliefConfig {
    fn default() -> Self {
        Self {
            high_tile: 128,
            misread_floor: 64,
            recovery_min_max: 256,
            recovery_divisors: vec![2, 4, 8],
            recovery_floor: 64,
            divergence_mismatches: 4,
        }
    }
}

impl BeliefConfig {
    /// True when the sensor could plausibly report `observed` for a true `truth`.
    ///
    /// ```
    /// use merge2048::belief::BeliefConfig;
    /// let cfg = BeliefConfig::default();
    /// assert!(cfg.is_plausible_misread(256, 64));
    /// assert!(cfg.is_plausible_misread(8, 8));
    /// assert!(!cfg.is_plausible_misread(16, 4));
    /// ```
    pub fn is_plausible_misread(&self, truth: Tile, observed: Tile) -> bool {
        if truth == observed {
            return true;
        }
        truth >= self.high_tile
            && observed >= self.misread_floor
            && (is_scaled(truth, observed) || is_scaled(observed, truth))
    }
}

#[inline]
fn is_scaled(big: Tile, small: Tile) -> bool { small > 0 && (big == small * 2 || big == small * 4) }

/// Merge a believed board with an observation of the same position.
///
/// Cell by cell the observation wins, except that a believed high tile is kept
/// when the sensor shows it halved or quartered, and a reading of exactly
/// twice a believed high tile is taken as a merge the model missed. When the
/// believed max is still missing afterwards, a surplus copy of one of its
/// fractions (1/2, 1/4, 1/8) is promoted back to it, lowest row-major cell
/// first.
pub fn reconcile(believed: &Board, observed: &Board, cfg: &BeliefConfig) -> Board {
    let b = believed.cells();
    let mut out = *observed.cells();
    for (idx, slot) in out.iter_mut().enumerate() {
        let (e, a) = (b[idx], *slot);
        if e == a || e < cfg.high_tile || a == 0 {
            continue;
        }
        if is_scaled(e, a) {
            debug!(cell = idx, believed = e, observed = a, "keeping believed high tile");
            *slot = e;
        }
    }
    let mut corrected = Board::from_cells(out);

    let believed_max = believed.max_tile();
    if believed_max >= cfg.recovery_min_max
        && believed_max > observed.max_tile()
        && corrected.max_tile() < believed_max
    {
        for &div in &cfg.recovery_divisors {
            let value = believed_max / div.max(1);
            if value < cfg.recovery_floor {
                break;
            }
            if corrected.count_value(value) > believed.count_value(value) {
                if let Some(&cell) = corrected.cells_with_value(value).first() {
                    info!(?cell, from = value, to = believed_max, "promoting misread max tile");
                    corrected = corrected.with_tile(cell, believed_max);
                }
                break;
            }
        }
    }
    corrected
}

/// Disagreement between a believed board and an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Divergence {
    /// Cells empty in exactly one of the two boards.
    pub empty_mismatches: usize,
    /// Occupied cells whose values are not a plausible misread of each other.
    pub value_mismatches: usize,
    pub diverged: bool,
}

impl Divergence {
    pub fn between(believed: &Board, observed: &Board, cfg: &BeliefConfig) -> Self {
        let mut d = Divergence::default();
        for (&e, &a) in believed.cells().iter().zip(observed.cells()) {
            if (e == 0) != (a == 0) {
                d.empty_mismatches += 1;
            } else if e != a && !cfg.is_plausible_misread(e, a) {
                d.value_mismatches += 1;
            }
        }
        d.diverged = d.empty_mismatches > 0 || d.value_mismatches >= cfg.divergence_mismatches;
        d
    }
}

/// How [`BeliefEstimator::after_move`] produced the new believed board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracking {
    /// Predicted board plus the spawn(s) seen in the observation.
    Confirmed { spawns: usize },
    /// No spawn located; predicted board reconciled with the observation.
    Reconciled,
    /// No believed board existed; rebuilt from the observation.
    Bootstrapped,
}

/// Owner of the believed board for one game.
#[derive(Debug, Clone, Default)]
pub struct BeliefEstimator {
    cfg: BeliefConfig,
    believed: Option<Board>,
    /// Last trusted board, used to seed a rebuild after invalidation.
    reference: Option<Board>,
    resyncs: u32,
}

impl BeliefEstimator {
    pub fn new(cfg: BeliefConfig) -> Self { Self { cfg, ..Default::default() } }

    pub fn config(&self) -> &BeliefConfig { &self.cfg }

    pub fn believed(&self) -> Option<Board> { self.believed }

    pub fn reference(&self) -> Option<Board> { self.reference }

    pub fn resyncs(&self) -> u32 { self.resyncs }

    /// Forget everything; called at the start of a game.
    pub fn reset(&mut self) {
        self.believed = None;
        self.reference = None;
        self.resyncs = 0;
    }

    /// Board to search from: the believed board, bootstrapped from `observed` if absent.
    pub fn current(&mut self, observed: &Board) -> Board {
        match self.believed {
            Some(board) => board,
            None => self.bootstrap(observed),
        }
    }

    /// Rebuild the believed board from `observed`, seeded by the reference if any.
    pub fn bootstrap(&mut self, observed: &Board) -> Board {
        let board = match &self.reference {
            Some(reference) => reconcile(reference, observed, &self.cfg),
            None => *observed,
        };
        debug!(seeded = self.reference.is_some(), "belief bootstrapped");
        self.believed = Some(board);
        board
    }

    /// Advance the believed board by `dir` and fold in the next observation.
    pub fn after_move(&mut self, dir: Move, observed: &Board) -> Tracking {
        let Some(before) = self.believed else {
            self.bootstrap(observed);
            return Tracking::Bootstrapped;
        };
        let predicted = simulate_move(&before, dir);
        if !predicted.moved {
            self.believed = Some(reconcile(&before, observed, &self.cfg));
            return Tracking::Reconciled;
        }
        let expected = predicted.board;
        let spawns: Vec<(usize, Tile)> = (0..16)
            .filter(|&idx| expected.cells()[idx] == 0)
            .map(|idx| (idx, observed.cells()[idx]))
            .filter(|&(_, v)| v == 2 || v == 4)
            .collect();
        if spawns.is_empty() {
            debug!(%dir, "no spawn located, reconciling prediction");
            self.believed = Some(reconcile(&expected, observed, &self.cfg));
            return Tracking::Reconciled;
        }
        let board = spawns.iter().fold(expected, |b, &(idx, v)| b.with_tile((idx / 4, idx % 4), v));
        self.believed = Some(board);
        Tracking::Confirmed { spawns: spawns.len() }
    }

    /// Drop the believed board after an external change the model cannot predict.
    pub fn invalidate(&mut self) {
        if let Some(board) = self.believed.take() {
            self.reference = Some(board);
        }
    }

    /// Return to a board known from before an undo; the current one becomes the reference.
    pub fn restore(&mut self, board: Board) {
        self.reference = self.believed.take().or(self.reference);
        self.believed = Some(board);
    }

    pub fn divergence(&self, observed: &Board) -> Option<Divergence> {
        self.believed.map(|b| Divergence::between(&b, observed, &self.cfg))
    }

    /// Rebuild the believed board against `observed`, keeping the old one as reference.
    pub fn resync(&mut self, observed: &Board) -> Board {
        let board = match self.believed {
            Some(believed) => {
                self.reference = Some(believed);
                reconcile(&believed, observed, &self.cfg)
            }
            None => *observed,
        };
        self.resyncs += 1;
        info!(resyncs = self.resyncs, "belief resynchronised");
        self.believed = Some(board);
        board
    }

    /// Resync only when the observation has diverged; returns whether it did.
    pub fn resync_if_diverged(&mut self, observed: &Board) -> bool {
        match self.divergence(observed) {
            Some(d) if d.diverged => {
                debug!(empty = d.empty_mismatches, values = d.value_mismatches, "belief diverged");
                self.resync(observed);
                true
            }
            _ => false,
        }
    }
}
