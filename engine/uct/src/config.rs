//! Search configuration.
//!
//! All knobs are read once when a controller is created. Defaults can be
//! overridden from a `config.toml` file and `UCT_*` environment variables.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::SearchError;

/// Configuration for one search controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Worker count, including the calling thread.
    pub num_threads: usize,

    /// Default playout cap per `think`. 0 means unbounded.
    pub max_playouts: u32,

    /// Mix Dirichlet noise into the root priors in `think`.
    pub noise: bool,

    /// Game plies during which the best move is sampled proportionally to
    /// visit counts instead of taken by argmax.
    pub random_moves: u32,

    /// Resign when the root winrate falls below this percentage.
    pub resign_pct: u32,

    /// Ply threshold below which resignation is forbidden.
    pub min_resign_ply: u32,

    /// Suppress analysis and stats output.
    pub quiet: bool,

    /// Hard cap on expansions; beyond it leaves are scored without growing
    /// the tree.
    pub max_tree_size: usize,

    /// Bucket count of the transposition table (rounded up to a power of
    /// two).
    pub tt_buckets: usize,

    /// Exploration constant of the PUCT formula.
    pub c_puct: f32,

    /// Fraction of the root prior replaced by Dirichlet noise.
    pub dirichlet_epsilon: f32,

    /// Dirichlet concentration parameter.
    pub dirichlet_alpha: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            max_playouts: 800,
            noise: false,
            random_moves: 0,
            resign_pct: 10,
            min_resign_ply: 20,
            quiet: false,
            max_tree_size: 2_000_000,
            tt_buckets: 1 << 16,
            c_puct: 1.25,
            dirichlet_epsilon: 0.25,
            dirichlet_alpha: 0.3,
        }
    }
}

impl SearchConfig {
    /// Fast, quiet config for tests.
    pub fn for_testing() -> Self {
        Self {
            max_playouts: 100,
            quiet: true,
            ..Self::default()
        }
    }

    /// Builder: worker count (including the calling thread).
    pub fn with_threads(mut self, n: usize) -> Self {
        self.num_threads = n;
        self
    }

    /// Builder: playout cap (0 = unbounded).
    pub fn with_playouts(mut self, n: u32) -> Self {
        self.max_playouts = n;
        self
    }

    /// Builder: root Dirichlet noise on or off.
    pub fn with_noise(mut self, noise: bool) -> Self {
        self.noise = noise;
        self
    }

    /// Builder: proportional-sampling ply window.
    pub fn with_random_moves(mut self, plies: u32) -> Self {
        self.random_moves = plies;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.num_threads == 0 {
            return Err(SearchError::InvalidConfig {
                msg: "num_threads must be at least 1",
            });
        }
        if !(self.c_puct.is_finite() && self.c_puct > 0.0) {
            return Err(SearchError::InvalidConfig {
                msg: "c_puct must be finite and > 0",
            });
        }
        if !(self.dirichlet_alpha.is_finite() && self.dirichlet_alpha > 0.0) {
            return Err(SearchError::InvalidConfig {
                msg: "dirichlet_alpha must be finite and > 0",
            });
        }
        if !(0.0..=1.0).contains(&self.dirichlet_epsilon) {
            return Err(SearchError::InvalidConfig {
                msg: "dirichlet_epsilon must be in [0, 1]",
            });
        }
        if self.resign_pct > 100 {
            return Err(SearchError::InvalidConfig {
                msg: "resign_pct must be at most 100",
            });
        }
        if self.max_tree_size == 0 {
            return Err(SearchError::InvalidConfig {
                msg: "max_tree_size must be at least 1",
            });
        }
        if self.tt_buckets == 0 {
            return Err(SearchError::InvalidConfig {
                msg: "tt_buckets must be at least 1",
            });
        }
        Ok(())
    }
}

/// Standard locations to search for config.toml.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["config.toml", "../config.toml"];

/// Load the search configuration.
///
/// Looks for `config.toml` at the path named by `UCT_CONFIG`, then in the
/// standard locations, and falls back to defaults. Environment variable
/// overrides are applied last.
pub fn load_config() -> SearchConfig {
    if let Ok(path) = std::env::var("UCT_CONFIG") {
        let path = Path::new(&path);
        if path.exists() {
            return load_from_path(path);
        }
        warn!("UCT_CONFIG={} not found, searching defaults", path.display());
    }

    for path_str in CONFIG_SEARCH_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            return load_from_path(path);
        }
    }

    debug!("no config.toml found, using built-in defaults");
    apply_env_overrides(SearchConfig::default())
}

/// Load configuration from a specific path, falling back to defaults if the
/// file cannot be read or parsed.
pub fn load_from_path(path: &Path) -> SearchConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => apply_env_overrides(config),
            Err(e) => {
                warn!("failed to parse {}: {}, using defaults", path.display(), e);
                apply_env_overrides(SearchConfig::default())
            }
        },
        Err(e) => {
            warn!("failed to read {}: {}, using defaults", path.display(), e);
            apply_env_overrides(SearchConfig::default())
        }
    }
}

macro_rules! env_override {
    ($config:expr, $field:ident, $key:expr) => {
        if let Ok(v) =
            std::env::var($key).and_then(|s| s.parse().map_err(|_| std::env::VarError::NotPresent))
        {
            $config.$field = v;
        }
    };
}

/// Apply `UCT_*` environment variable overrides.
pub fn apply_env_overrides(mut config: SearchConfig) -> SearchConfig {
    env_override!(config, num_threads, "UCT_NUM_THREADS");
    env_override!(config, max_playouts, "UCT_MAX_PLAYOUTS");
    env_override!(config, noise, "UCT_NOISE");
    env_override!(config, random_moves, "UCT_RANDOM_MOVES");
    env_override!(config, resign_pct, "UCT_RESIGN_PCT");
    env_override!(config, min_resign_ply, "UCT_MIN_RESIGN_PLY");
    env_override!(config, quiet, "UCT_QUIET");
    env_override!(config, max_tree_size, "UCT_MAX_TREE_SIZE");
    config
}
