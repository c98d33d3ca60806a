//! merge2048: a decision engine for 2048-style merge puzzles
//!
//! This crate provides:
//! - A copyable `Board` value with a pure move simulator (`engine`)
//! - A six-term board evaluator (`heuristic`)
//! - Expectimax search behind a swappable backend contract, with a reference
//!   and an accelerated (packed, cached, parallel) implementation (`expectimax`)
//! - A belief estimator that tracks the true board through a noisy sensor (`belief`)
//! - A policy for spending undo, swap and delete charges (`powerup`)
//! - A game loop over narrow sensor/actuator/power-up traits (`session`) and
//!   an in-process game implementing them (`sim`)
//!
//! Quick start:
//! ```
//! use merge2048::config::EngineConfig;
//! use merge2048::engine::{Board, Move};
//! use merge2048::expectimax::SearchEngine;
//!
//! let cfg = EngineConfig::default();
//! let engine = SearchEngine::new(&cfg.search, &cfg.heuristic);
//! let b = Board::from_rows([[2, 2, 0, 0], [0; 4], [0; 4], [0; 4]]);
//! let ranked = engine.ranked_moves(&b, 2);
//! assert!(ranked.iter().all(|m| b.shift(m.dir).moved));
//! assert!(ranked.iter().any(|m| m.dir == Move::Left));
//! ```
//!
//! Playing a simulated game end to end:
//! ```no_run
//! use merge2048::config::EngineConfig;
//! use merge2048::session::Player;
//! use merge2048::sim::SimulatedGame;
//!
//! let cfg = EngineConfig::default();
//! let mut game = SimulatedGame::new(cfg.sim.clone(), 42);
//! let summary = Player::new(&cfg).play(&mut game).unwrap();
//! println!("max tile {} after {} moves", summary.max_tile, summary.moves);
//! ```
pub mod belief;
pub mod config;
pub mod engine;
pub mod expectimax;
pub mod ffi;
pub mod heuristic;
pub mod powerup;
pub mod session;
pub mod sim;
