//! Game loop: observe, estimate, search, act, verify.
//!
//! The loop talks to the outside world through three narrow traits. Commands
//! are fire-and-forget, so every action is checked by re-observing the board,
//! and repeated non-effect is handled by a stuck-recovery schedule rather than
//! treated as the end of the game.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::belief::{BeliefEstimator, Tracking};
use crate::config::EngineConfig;
use crate::engine::{Board, Move, Tile};
use crate::expectimax::SearchEngine;
use crate::heuristic::Evaluator;
use crate::powerup::{PowerUpCharges, PowerUpKind, PowerUpPolicy, PowerUpRequest};

/// Source of board readings.
pub trait Sensor {
    /// One reading, or `None` when the board could not be read.
    fn observe(&mut self) -> Option<Board>;

    /// Wait before the next read.
    fn settle(&mut self, delay: Duration) { std::thread::sleep(delay); }
}

/// Move sink. Commands may be dropped silently.
pub trait Actuator {
    fn apply(&mut self, dir: Move);

    /// Regain input focus before retrying.
    fn refocus(&mut self) {}
}

pub trait PowerUpChannel {
    fn charges(&self) -> PowerUpCharges;

    /// Request an activation. `true` only means the request was accepted.
    fn activate(&mut self, request: PowerUpRequest) -> bool;
}

/// Everything a [`Player`] needs from the game.
pub trait GameEnv: Sensor + Actuator + PowerUpChannel {}

impl<T: Sensor + Actuator + PowerUpChannel> GameEnv for T {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Extra reads after a failed one.
    pub read_retries: u32,
    /// Linear backoff step between failed reads.
    pub read_backoff_ms: u64,
    /// Extra sends of a move that produced no change.
    pub resend_attempts: u32,
    /// Pause while the board is unchanged in early stuck detection.
    pub stuck_wait_ms: u64,
    pub focus_retries: u32,
    /// Moves between routine divergence checks; 0 disables them.
    pub divergence_interval: u32,
    pub max_moves: u32,
    pub win_tile: Tile,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_retries: 5,
            read_backoff_ms: 100,
            resend_attempts: 2,
            stuck_wait_ms: 150,
            focus_retries: 3,
            divergence_interval: 10,
            max_moves: 20_000,
            win_tile: 2048,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("board unreadable after {attempts} attempts")]
    SensorUnavailable { attempts: u32 },
    #[error("move budget of {moves} exhausted")]
    MoveBudgetExhausted { moves: u32 },
}

/// How a finished game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEnd {
    /// No direction changes the believed board and no delete could help.
    NoLegalMove,
    /// The board stopped responding and every recovery failed.
    Stuck,
}

impl std::fmt::Display for GameEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameEnd::NoLegalMove => f.write_str("no legal move"),
            GameEnd::Stuck => f.write_str("stuck"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameSummary {
    pub end: GameEnd,
    pub max_tile: Tile,
    pub moves: u32,
    pub won: bool,
    pub board: Board,
    pub undos: u32,
    pub swaps: u32,
    pub deletes: u32,
    pub resyncs: u32,
}

/// Per-game counters.
#[derive(Debug, Default)]
struct Progress {
    last_obs: Option<Board>,
    same_count: u32,
    focus_tries: u32,
    moves: u32,
    won: bool,
    undos: u32,
    swaps: u32,
    deletes: u32,
}

enum Flow {
    /// Start the next iteration.
    Continue,
    /// Fall through to a normal search move.
    Proceed,
    GameOver,
}

/// Plays games against a [`GameEnv`].
pub struct Player {
    cfg: SessionConfig,
    engine: SearchEngine,
    belief: BeliefEstimator,
    policy: PowerUpPolicy,
}

impl Player {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cfg: config.session.clone(),
            engine: SearchEngine::new(&config.search, &config.heuristic),
            belief: BeliefEstimator::new(config.belief.clone()),
            policy: PowerUpPolicy::new(config.powerup.clone(), Evaluator::new(config.heuristic.clone())),
        }
    }

    pub fn engine(&self) -> &SearchEngine { &self.engine }

    /// Play one game to its end.
    pub fn play<E: GameEnv>(&mut self, env: &mut E) -> Result<GameSummary, SessionError> {
        self.belief.reset();
        let mut st = Progress::default();
        loop {
            if st.moves >= self.cfg.max_moves {
                warn!(moves = st.moves, "move budget exhausted");
                return Err(SessionError::MoveBudgetExhausted { moves: st.moves });
            }
            let obs = self.observe(env)?;
            if st.last_obs == Some(obs) {
                st.same_count += 1;
            } else {
                st.same_count = 0;
            }
            st.last_obs = Some(obs);

            if st.same_count > 0 {
                match self.handle_stuck(env, &obs, &mut st)? {
                    Flow::Continue => continue,
                    Flow::GameOver => return Ok(self.summary(GameEnd::Stuck, &obs, &st)),
                    Flow::Proceed => {}
                }
            }

            let board = self.belief.current(&obs);
            if !st.won && board.max_tile() >= self.cfg.win_tile {
                st.won = true;
                info!(moves = st.moves, "win tile reached");
            }

            let depth = self.engine.depth_for(&board);
            let ranked = self.engine.ranked_moves(&board, depth);
            let Some(best) = ranked.first() else {
                if st.same_count < 3 && self.try_delete(env, &board, &obs, &mut st)? {
                    continue;
                }
                info!(moves = st.moves, max_tile = board.max_tile(), "no legal move");
                return Ok(self.summary(GameEnd::NoLegalMove, &board, &st));
            };
            debug!(dir = %best.dir, depth, score = best.score, nodes = self.engine.last_stats().nodes, "move chosen");

            let Some(after) = self.send_move(env, best.dir, &obs)? else {
                continue;
            };
            st.moves += 1;
            self.belief.after_move(best.dir, &after);
            let believed = self.belief.current(&after);

            if self.cfg.divergence_interval > 0 && st.moves % self.cfg.divergence_interval == 0 {
                self.belief.resync_if_diverged(&after);
            }

            if let Some((alt, reason)) = self.policy.undo_plan(&board, &believed, &ranked, &env.charges()) {
                info!(?reason, alt = %alt, "undoing move");
                if let Some(undone) = self.activate(env, PowerUpRequest::Undo, &after)? {
                    st.undos += 1;
                    self.belief.restore(board);
                    if let Some(resumed) = self.send_move(env, alt, &undone)? {
                        st.moves += 1;
                        self.belief.after_move(alt, &resumed);
                    }
                    continue;
                }
            }

            if self.policy.wants_proactive_delete(&believed, &env.charges()) {
                info!("board nearly full, deleting proactively");
                self.try_delete(env, &believed, &after, &mut st)?;
            }
        }
    }

    /// Read the board, retrying with linear backoff.
    fn observe<E: GameEnv>(&mut self, env: &mut E) -> Result<Board, SessionError> {
        let attempts = self.cfg.read_retries + 1;
        for attempt in 1..=attempts {
            if let Some(board) = env.observe() {
                return Ok(board);
            }
            debug!(attempt, "board read failed");
            if attempt < attempts {
                env.settle(Duration::from_millis(self.cfg.read_backoff_ms * u64::from(attempt)));
            }
        }
        warn!(attempts, "sensor unavailable");
        Err(SessionError::SensorUnavailable { attempts })
    }

    /// Send `dir` until the board changes; `None` if it never does.
    fn send_move<E: GameEnv>(&mut self, env: &mut E, dir: Move, before: &Board) -> Result<Option<Board>, SessionError> {
        for attempt in 0..=self.cfg.resend_attempts {
            env.apply(dir);
            let after = self.observe(env)?;
            if after != *before {
                return Ok(Some(after));
            }
            debug!(attempt, %dir, "move not acknowledged");
        }
        Ok(None)
    }

    /// Request a power-up and confirm it changed the board.
    fn activate<E: GameEnv>(
        &mut self,
        env: &mut E,
        request: PowerUpRequest,
        before: &Board,
    ) -> Result<Option<Board>, SessionError> {
        let kind = request.kind();
        if !env.charges().has(kind) {
            debug!(kind = kind.name(), "power-up unavailable");
            return Ok(None);
        }
        if !env.activate(request) {
            warn!(kind = kind.name(), "power-up rejected");
            return Ok(None);
        }
        let after = self.observe(env)?;
        if after == *before {
            warn!(kind = kind.name(), "power-up had no visible effect");
            return Ok(None);
        }
        info!(kind = kind.name(), ?request, "power-up applied");
        Ok(Some(after))
    }

    fn try_delete<E: GameEnv>(
        &mut self,
        env: &mut E,
        board: &Board,
        obs: &Board,
        st: &mut Progress,
    ) -> Result<bool, SessionError> {
        if !env.charges().has(PowerUpKind::Delete) {
            return Ok(false);
        }
        let Some(target) = self.policy.find_best_delete(board) else {
            return Ok(false);
        };
        debug!(value = target.value, gain = target.gain, "delete candidate");
        if self.activate(env, PowerUpRequest::Delete(target.cell), obs)?.is_some() {
            st.deletes += 1;
            self.belief.invalidate();
            return Ok(true);
        }
        Ok(false)
    }

    fn handle_stuck<E: GameEnv>(&mut self, env: &mut E, obs: &Board, st: &mut Progress) -> Result<Flow, SessionError> {
        let count = st.same_count;
        match count {
            1..=3 => {
                env.settle(Duration::from_millis(self.cfg.stuck_wait_ms));
                return Ok(Flow::Continue);
            }
            4 => {
                let again = self.observe(env)?;
                if again != *obs {
                    st.same_count = 0;
                    st.last_obs = Some(again);
                    return Ok(Flow::Continue);
                }
                return Ok(Flow::Proceed);
            }
            _ => {}
        }
        debug!(same_count = count, "board unchanged");

        if count == 5 {
            self.belief.resync_if_diverged(obs);
        }
        if (5..=8).contains(&count) {
            self.recovery_sweep(env, obs, st)?;
            return Ok(Flow::Continue);
        }
        if (9..=15).contains(&count) && !st.won && self.escape(env, obs, st)? {
            return Ok(Flow::Continue);
        }
        if count > 12 {
            self.belief.resync_if_diverged(obs);
            let board = self.belief.current(obs);
            if board.has_legal_move() && st.focus_tries < self.cfg.focus_retries {
                st.focus_tries += 1;
                warn!(attempt = st.focus_tries, "board unresponsive, refocusing");
                env.refocus();
                st.same_count = 5;
                return Ok(Flow::Continue);
            }
            warn!(moves = st.moves, "giving up on unresponsive board");
            return Ok(Flow::GameOver);
        }
        Ok(Flow::Proceed)
    }

    /// Try each direction until one changes the board.
    fn recovery_sweep<E: GameEnv>(&mut self, env: &mut E, obs: &Board, st: &mut Progress) -> Result<bool, SessionError> {
        for dir in Move::ALL {
            env.apply(dir);
            let after = self.observe(env)?;
            if after == *obs {
                continue;
            }
            st.moves += 1;
            if !matches!(self.belief.after_move(dir, &after), Tracking::Confirmed { .. }) {
                self.belief.invalidate();
            }
            info!(%dir, "recovery sweep moved the board");
            return Ok(true);
        }
        Ok(false)
    }

    /// Spend a power-up to unstick the board: undo, then delete, then swap.
    fn escape<E: GameEnv>(&mut self, env: &mut E, obs: &Board, st: &mut Progress) -> Result<bool, SessionError> {
        let board = self.belief.current(obs);
        if self.activate(env, PowerUpRequest::Undo, obs)?.is_some() {
            st.undos += 1;
            self.belief.invalidate();
            return Ok(true);
        }
        if self.try_delete(env, &board, obs, st)? {
            return Ok(true);
        }
        if env.charges().has(PowerUpKind::Swap) {
            if let Some(swap) = self.policy.find_best_swap(&board) {
                if self.activate(env, PowerUpRequest::Swap(swap.a, swap.b), obs)?.is_some() {
                    st.swaps += 1;
                    self.belief.invalidate();
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn summary(&self, end: GameEnd, board: &Board, st: &Progress) -> GameSummary {
        let board = self.belief.believed().unwrap_or(*board);
        GameSummary {
            end,
            max_tile: board.max_tile(),
            moves: st.moves,
            won: st.won,
            board,
            undos: st.undos,
            swaps: st.swaps,
            deletes: st.deletes,
            resyncs: self.belief.resyncs(),
        }
    }
}
