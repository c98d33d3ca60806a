use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use merge2048::config::{self, EngineConfig};
use merge2048::engine::{Board, Tile};
use merge2048::expectimax::{BackendKind, SearchEngine};
use merge2048::session::{GameSummary, Player, SessionError};
use merge2048::sim::SimulatedGame;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "merge2048", about = "Expectimax player for 2048 with power-ups and a noisy board reader")]
struct Args {
    #[command(subcommand)]
    cmd: Option<Cmd>,

    /// TOML config file (defaults: MERGE2048_CONFIG, ./merge2048.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Play simulated games and print a scoreboard
    Play(PlayArgs),
    /// Print the ranked moves for one board
    Rank {
        /// 16 comma-separated tile values, row-major
        board: String,
        /// Search depth (default: adaptive)
        #[arg(long)]
        depth: Option<u32>,
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
    },
}

#[derive(Debug, Parser)]
struct PlayArgs {
    /// Number of games to play
    #[arg(long, default_value_t = 1)]
    games: u32,
    /// Seed of the first game; game i uses seed + i
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,
    /// Probability that a high tile value is misread
    #[arg(long)]
    noise: Option<f64>,
    /// Probability that a move command is dropped
    #[arg(long)]
    drop: Option<f64>,
    /// Suppress the spinner status line
    #[arg(long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Reference,
    Accelerated,
    Auto,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Reference => BackendKind::Reference,
            BackendArg::Accelerated => BackendKind::Accelerated,
            BackendArg::Auto => BackendKind::Auto,
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => config::load_from_path(path)?,
        None => config::load_config()?,
    };
    match args.cmd.unwrap_or_else(|| Cmd::Play(PlayArgs::parse_from(["play"]))) {
        Cmd::Play(play_args) => play(cfg, play_args),
        Cmd::Rank { board, depth, backend } => rank(cfg, &board, depth, backend),
    }
}

fn play(mut cfg: EngineConfig, args: PlayArgs) -> anyhow::Result<()> {
    if let Some(backend) = args.backend {
        cfg.search.backend = backend.into();
    }
    if let Some(p) = args.noise {
        cfg.sim.misread_prob = p;
    }
    if let Some(p) = args.drop {
        cfg.sim.drop_prob = p;
    }
    for (name, p) in [("noise", cfg.sim.misread_prob), ("drop", cfg.sim.drop_prob)] {
        if !(0.0..=1.0).contains(&p) {
            bail!("--{name} must be a probability in [0, 1], got {p}");
        }
    }
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut player = Player::new(&cfg);
    info!(backend = player.engine().backend_name(), seed, games = args.games, "starting");

    let pb = (!args.quiet).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner} {elapsed_precise} | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠃⠇⠧⠷⠿⠻⠟⠯⠷⠧⠇⠃"),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    });

    let start = Instant::now();
    let mut rows: Vec<(u32, Result<GameSummary, SessionError>, u64)> = Vec::new();
    let mut total_moves = 0u64;
    for game_idx in 0..args.games {
        if let Some(pb) = &pb {
            pb.set_message(format!("game {}/{} | moves: {}", game_idx + 1, args.games, total_moves));
        }
        let mut game = SimulatedGame::new(cfg.sim.clone(), seed.wrapping_add(u64::from(game_idx)));
        let result = player.play(&mut game);
        match &result {
            Ok(summary) => total_moves += u64::from(summary.moves),
            Err(e) => error!(game = game_idx + 1, "game aborted: {e}"),
        }
        if let Some(pb) = &pb {
            let rate = total_moves as f64 / start.elapsed().as_secs_f64().max(1e-6);
            pb.set_message(format!("game {}/{} | moves: {} | moves/sec: {:.1}", game_idx + 1, args.games, total_moves, rate));
        }
        rows.push((game_idx + 1, result, game.score()));
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    print_scoreboard(&rows, start.elapsed());
    Ok(())
}

fn print_scoreboard(rows: &[(u32, Result<GameSummary, SessionError>, u64)], elapsed: Duration) {
    println!(
        "{:>5} | {:<28} | {:>8} | {:>6} | {:>8} | {:>5} {:>5} {:>5} {:>6}",
        "game", "result", "max", "moves", "score", "undo", "swap", "del", "resync"
    );
    println!("{}", "-".repeat(96));
    let mut best: Tile = 0;
    let mut wins = 0;
    let mut moves = 0u64;
    for (idx, result, score) in rows {
        match result {
            Ok(s) => {
                best = best.max(s.max_tile);
                wins += usize::from(s.won);
                moves += u64::from(s.moves);
                let label = if s.won { format!("won, {}", s.end) } else { s.end.to_string() };
                println!(
                    "{:>5} | {:<28} | {:>8} | {:>6} | {:>8} | {:>5} {:>5} {:>5} {:>6}",
                    idx, label, s.max_tile, s.moves, score, s.undos, s.swaps, s.deletes, s.resyncs
                );
            }
            Err(e) => println!("{:>5} | {:<28} | {:>8} | {:>6} | {:>8} |", idx, e.to_string(), "-", "-", score),
        }
    }
    println!("{}", "-".repeat(96));
    println!(
        "games: {} | wins: {} | best tile: {} | moves: {} | elapsed: {:.1}s",
        rows.len(),
        wins,
        best,
        moves,
        elapsed.as_secs_f64()
    );
}

fn rank(mut cfg: EngineConfig, text: &str, depth: Option<u32>, backend: Option<BackendArg>) -> anyhow::Result<()> {
    if let Some(backend) = backend {
        cfg.search.backend = backend.into();
    }
    let cells = text
        .split(',')
        .map(|s| s.trim().parse::<Tile>().with_context(|| format!("bad tile value {s:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let board = Board::try_from_slice(&cells)?;
    let engine = SearchEngine::new(&cfg.search, &cfg.heuristic);
    let depth = depth.unwrap_or_else(|| engine.depth_for(&board));
    println!("{board}");
    let ranked = engine.ranked_moves(&board, depth);
    if ranked.is_empty() {
        println!("no legal move");
        return Ok(());
    }
    for m in &ranked {
        println!("{:>6} {:>16.1}", m.dir, m.score);
    }
    let stats = engine.last_stats();
    println!("backend: {} | depth: {} | nodes: {}", engine.backend_name(), stats.depth, stats.nodes);
    Ok(())
}
