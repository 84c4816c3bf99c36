use eyre::{Context, Result};
use hermes::breaker::BreakerConfig;
use hermes::runner::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub execution: ExecutionConfig,
    pub breaker: BreakerConfig,
    pub git: GitConfig,
    pub agent: AgentConfig,
    pub merge: MergeConfig,
    /// Runtime state (breaker), relative to the repository root
    pub state_dir: PathBuf,
    /// Task definitions, relative to the repository root
    pub tasks_file: PathBuf,
    /// Directory of `<name>.hbs` prompt template overrides
    pub prompts_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_workers: usize,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub serial: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            max_attempts: 3,
            timeout_secs: 900,
            serial: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub worktree_dir: PathBuf,
    pub delete_merged_branches: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            worktree_dir: PathBuf::from(".hermes/worktrees"),
            delete_merged_branches: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Instruction file the task prompt is injected into
    pub instruction_file: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--print".to_string(), "--dangerously-skip-permissions".to_string()],
            instruction_file: "CLAUDE.md".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub ai_enabled: bool,
    pub min_confidence: f64,
    pub semantic_review: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            ai_enabled: true,
            min_confidence: 0.7,
            semantic_review: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            breaker: BreakerConfig::default(),
            git: GitConfig::default(),
            agent: AgentConfig::default(),
            merge: MergeConfig::default(),
            state_dir: PathBuf::from(".hermes/state"),
            tasks_file: PathBuf::from(".hermes/tasks.yaml"),
            prompts_dir: None,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// `path` resolved against the repository root unless absolute.
    pub fn resolve(&self, repo_root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            repo_root.join(path)
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_workers: self.execution.max_workers.max(1),
            max_attempts: self.execution.max_attempts.max(1),
            timeout: Duration::from_secs(self.execution.timeout_secs.max(1)),
            serial: self.execution.serial,
            delete_merged_branches: self.git.delete_merged_branches,
            ai_merge: self.merge.ai_enabled,
            min_merge_confidence: self.merge.min_confidence,
            semantic_review: self.merge.semantic_review,
        }
    }
}
