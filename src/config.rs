//! Engine configuration: one TOML file, one section per component.
//!
//! Every section falls back to its calibrated defaults, so an empty file (or
//! no file at all) reproduces the stock player.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::belief::BeliefConfig;
use crate::expectimax::ExpectimaxConfig;
use crate::heuristic::HeuristicConfig;
use crate::powerup::PowerUpConfig;
use crate::session::SessionConfig;
use crate::sim::SimConfig;

/// Locations searched by [`load_config`] after `MERGE2048_CONFIG`.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["merge2048.toml", "config/merge2048.toml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub heuristic: HeuristicConfig,
    pub search: ExpectimaxConfig,
    pub belief: BeliefConfig,
    pub powerup: PowerUpConfig,
    pub session: SessionConfig,
    pub sim: SimConfig,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

/// Parse a TOML document into a config, then apply environment overrides.
///
/// ```
/// use merge2048::config::parse_config;
/// use merge2048::expectimax::BackendKind;
/// let cfg = parse_config("[search]\nbackend = \"reference\"\n").unwrap();
/// assert_eq!(cfg.search.backend, BackendKind::Reference);
/// assert_eq!(cfg.search.max_chance_cells, 6);
/// ```
pub fn parse_config(content: &str) -> Result<EngineConfig, toml::de::Error> {
    toml::from_str(content).map(apply_env_overrides)
}

pub fn load_from_path(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let config = parse_config(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Load from `MERGE2048_CONFIG` or the first existing search path; defaults otherwise.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    if let Ok(path) = std::env::var("MERGE2048_CONFIG") {
        return load_from_path(Path::new(&path));
    }
    for candidate in CONFIG_SEARCH_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            return load_from_path(path);
        }
    }
    debug!("no config file found, using built-in defaults");
    Ok(apply_env_overrides(EngineConfig::default()))
}

macro_rules! env_override {
    ($config:expr, $section:ident . $field:ident, $key:expr) => {
        if let Some(v) = std::env::var($key).ok().and_then(|s| s.parse().ok()) {
            $config.$section.$field = v;
        }
    };
    ($config:expr, $section:ident . $field:ident, $key:expr, optional) => {
        if let Some(v) = std::env::var($key).ok().and_then(|s| s.parse().ok()) {
            $config.$section.$field = Some(v);
        }
    };
}

/// Environment overrides follow `MERGE2048_<SECTION>_<KEY>`.
pub fn apply_env_overrides(mut config: EngineConfig) -> EngineConfig {
    env_override!(config, search.depth_cap, "MERGE2048_SEARCH_DEPTH_CAP", optional);
    env_override!(config, search.max_chance_cells, "MERGE2048_SEARCH_MAX_CHANCE_CELLS");
    env_override!(config, search.parallel, "MERGE2048_SEARCH_PARALLEL");
    env_override!(config, session.max_moves, "MERGE2048_SESSION_MAX_MOVES");
    env_override!(config, sim.misread_prob, "MERGE2048_SIM_MISREAD_PROB");
    env_override!(config, sim.drop_prob, "MERGE2048_SIM_DROP_PROB");
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::powerup::PowerUpCharges;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(toml::from_str::<EngineConfig>("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn sections_override_individual_fields() {
        let text = r#"
            [heuristic]
            merge_weight = 250.0

            [search]
            backend = "accelerated"
            depth_cap = 4

            [[search.reference_depths.tiers]]
            min_max_tile = 0
            by_empty = [[0, 2]]

            [sim]
            start_charges = { undo = 0, swap = 0, delete = 3 }
        "#;
        let cfg: EngineConfig = toml::from_str(text).unwrap();
        assert_eq!(cfg.heuristic.merge_weight, 250.0);
        assert_eq!(cfg.heuristic.smoothness_weight, 100.0);
        assert_eq!(cfg.search.depth_cap, Some(4));
        assert_eq!(cfg.search.reference_depths.depth_for(2, 16), 2);
        assert_eq!(cfg.sim.start_charges, PowerUpCharges { undo: 0, swap: 0, delete: 3 });
        assert_eq!(cfg.belief, BeliefConfig::default());
    }

    #[test]
    fn bad_values_are_parse_errors() {
        assert!(toml::from_str::<EngineConfig>("[search]\nbackend = \"gpu\"\n").is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_from_path(Path::new("/nonexistent/merge2048.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
