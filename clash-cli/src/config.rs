use anyhow::{bail, Context, Result};
use clash_core::{MatchConfig, Tokens};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "CLASH_CONFIG";

#[derive(Debug, Clone, PartialEq)]
pub struct CliConfig {
    pub match_config: MatchConfig,
    pub starting_balance: Tokens,
    pub seed: Option<u64>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            match_config: MatchConfig::default(),
            starting_balance: clash_core::services::wallet::DEFAULT_STARTING_BALANCE,
            seed: None,
        }
    }
}

/// On-disk layout. Every field is optional; missing ones keep their default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    lobby_name: Option<String>,
    #[serde(default)]
    capacity: Option<usize>,
    #[serde(default)]
    team_count: Option<u32>,
    #[serde(default)]
    heartbeat_secs: Option<u64>,
    #[serde(default)]
    poll_secs: Option<u64>,
    #[serde(default)]
    coverage_check_ms: Option<u64>,
    /// 0 waits for coverage forever.
    #[serde(default)]
    coverage_timeout_secs: Option<u64>,
    #[serde(default)]
    starting_balance: Option<u64>,
    #[serde(default)]
    seed: Option<u64>,
}

/// Values given on the command line, applied over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub capacity: Option<usize>,
    pub team_count: Option<u32>,
    pub coverage_timeout_secs: Option<u64>,
    pub starting_balance: Option<u64>,
    pub seed: Option<u64>,
}

/// `--config` wins over `$CLASH_CONFIG`, which wins over the per-user
/// config directory. Only the last one may be absent on disk.
pub fn resolve_path(explicit: Option<&Path>) -> Option<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), true));
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some((PathBuf::from(path), true));
        }
    }

    dirs::config_dir().map(|dir| (dir.join("clash").join("config.json"), false))
}

pub fn load(explicit: Option<&Path>, overrides: &Overrides) -> Result<CliConfig> {
    let mut cfg = CliConfig::default();

    if let Some((path, required)) = resolve_path(explicit) {
        if path.exists() {
            let file = read_file(&path)?;
            apply_file(&mut cfg, file);
            tracing::debug!("Loaded config from {}", path.display());
        } else if required {
            bail!("Config file not found: {}", path.display());
        }
    }

    apply_overrides(&mut cfg, overrides);
    validate(&cfg)?;
    Ok(cfg)
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))
}

fn apply_file(cfg: &mut CliConfig, file: FileConfig) {
    let mc = &mut cfg.match_config;
    if let Some(v) = file.lobby_name {
        mc.lobby_name = v;
    }
    if let Some(v) = file.capacity {
        mc.capacity = v;
    }
    if let Some(v) = file.team_count {
        mc.team_count = v;
    }
    if let Some(v) = file.heartbeat_secs {
        mc.heartbeat_interval = Duration::from_secs(v);
    }
    if let Some(v) = file.poll_secs {
        mc.poll_interval = Duration::from_secs(v);
    }
    if let Some(v) = file.coverage_check_ms {
        mc.coverage_check_interval = Duration::from_millis(v);
    }
    if let Some(v) = file.coverage_timeout_secs {
        mc.coverage_timeout = timeout_from_secs(v);
    }
    if let Some(v) = file.starting_balance {
        cfg.starting_balance = Tokens::new(v);
    }
    if let Some(v) = file.seed {
        cfg.seed = Some(v);
    }
}

fn apply_overrides(cfg: &mut CliConfig, overrides: &Overrides) {
    if let Some(v) = overrides.capacity {
        cfg.match_config.capacity = v;
    }
    if let Some(v) = overrides.team_count {
        cfg.match_config.team_count = v;
    }
    if let Some(v) = overrides.coverage_timeout_secs {
        cfg.match_config.coverage_timeout = timeout_from_secs(v);
    }
    if let Some(v) = overrides.starting_balance {
        cfg.starting_balance = Tokens::new(v);
    }
    if let Some(v) = overrides.seed {
        cfg.seed = Some(v);
    }
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn validate(cfg: &CliConfig) -> Result<()> {
    cfg.match_config
        .validate()
        .context("Invalid configuration")?;
    if cfg.starting_balance.is_zero() {
        bail!("Invalid configuration: starting_balance must be > 0");
    }
    Ok(())
}
