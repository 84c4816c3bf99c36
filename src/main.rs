use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hermes::analyzer::ResponseAnalyzer;
use hermes::breaker::{CircuitBreaker, CircuitState};
use hermes::conflict::{ConflictDetector, TaskChanges};
use hermes::domain::TaskStatus;
use hermes::prompt::{PromptInjector, PromptRenderer};
use hermes::provider::CommandProvider;
use hermes::runner::{Orchestrator, RunSummary};
use hermes::scheduler::Scheduler;
use hermes::store::{StateDir, TaskStore, YamlTaskStore};
use hermes::worktree::{BRANCH_PREFIX, GitCli, Workspace, WorkspaceManager};

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hermes")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("hermes.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Paths and handles shared by the subcommands.
struct Project {
    config: Config,
    repo_root: PathBuf,
}

impl Project {
    fn new(cli: &Cli, config: &Config) -> Result<Self> {
        let repo_root = match &cli.repo {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("Failed to read current directory")?,
        };
        Ok(Self {
            config: config.clone(),
            repo_root,
        })
    }

    fn tasks_file(&self, explicit: Option<&PathBuf>) -> PathBuf {
        let path = explicit.unwrap_or(&self.config.tasks_file);
        self.config.resolve(&self.repo_root, path)
    }

    fn state_dir(&self) -> Result<StateDir> {
        let path = self.config.resolve(&self.repo_root, &self.config.state_dir);
        StateDir::open(&path).context(format!("Failed to open state directory {}", path.display()))
    }

    fn breaker(&self) -> Result<CircuitBreaker> {
        CircuitBreaker::open(self.config.breaker.clone(), self.state_dir()?).context("Failed to load circuit breaker")
    }

    fn workspaces(&self) -> Result<WorkspaceManager> {
        let workspaces = WorkspaceManager::new(Arc::new(GitCli::new()), &self.repo_root, &self.config.git.worktree_dir)
            .context(format!("{} is not a usable git repository", self.repo_root.display()))?;
        workspaces.exclude(&self.config.resolve(&self.repo_root, &self.config.state_dir))?;
        Ok(workspaces)
    }

    fn renderer(&self) -> Result<PromptRenderer> {
        let renderer = PromptRenderer::new();
        match &self.config.prompts_dir {
            Some(dir) => Ok(renderer.with_overrides(&self.config.resolve(&self.repo_root, dir))?),
            None => Ok(renderer),
        }
    }
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let project = Project::new(cli, config)?;

    match &cli.command {
        None => handle_status_command(&project, None, false),
        Some(Commands::Run {
            tasks,
            max_workers,
            serial,
            json,
        }) => handle_run_command(&project, tasks.as_ref(), *max_workers, *serial, *json).await,
        Some(Commands::Plan { tasks }) => handle_plan_command(&project, tasks.as_ref()),
        Some(Commands::Status { tasks, detailed }) => handle_status_command(&project, tasks.as_ref(), *detailed),
        Some(Commands::Reset { reason }) => handle_reset_command(&project, reason),
        Some(Commands::Analyze { file }) => handle_analyze_command(file),
        Some(Commands::Conflicts) => handle_conflicts_command(&project),
    }
}

async fn handle_run_command(
    project: &Project,
    tasks: Option<&PathBuf>,
    max_workers: Option<usize>,
    serial: bool,
    json: bool,
) -> Result<()> {
    let tasks_file = project.tasks_file(tasks);
    info!("Running tasks from {}", tasks_file.display());

    let mut settings = project.config.orchestrator();
    if let Some(n) = max_workers {
        settings.max_workers = n.max(1);
    }
    settings.serial |= serial;

    let store = Arc::new(YamlTaskStore::new(&tasks_file));
    let provider = Arc::new(CommandProvider::new(
        project.config.agent.command.clone(),
        project.config.agent.args.clone(),
    ));

    let mut orchestrator = Orchestrator::new(store, provider, project.workspaces()?, project.breaker()?, settings)
        .with_renderer(project.renderer()?)
        .with_injector(PromptInjector::new(project.config.agent.instruction_file.clone()));

    let token = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling run");
            token.cancel();
        }
    });

    println!("{} {}", "Running:".green(), tasks_file.display());
    let summary = orchestrator.run().await.context("Run failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if summary.is_clean() {
        Ok(())
    } else {
        Err(eyre!("Run finished with unfinished tasks"))
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "{} {} batches, {} agent loops",
        "Summary:".cyan(),
        summary.batches,
        summary.loops
    );
    let groups = [
        ("completed", &summary.completed),
        ("blocked", &summary.blocked),
        ("at risk", &summary.at_risk),
        ("cancelled", &summary.cancelled),
        ("stranded", &summary.stranded),
    ];
    for (label, ids) in groups {
        if !ids.is_empty() {
            println!("  {:<10} {}", label, ids.join(", "));
        }
    }
    for conflict in &summary.conflicts {
        println!("  {} {}", "conflict".yellow(), conflict);
    }
    for warning in &summary.warnings {
        println!("  {} {}", "warning".yellow(), warning);
    }
    if let Some(reason) = &summary.halted {
        println!("{} {}", "Halted:".red(), reason);
    }
}

fn handle_plan_command(project: &Project, tasks: Option<&PathBuf>) -> Result<()> {
    let tasks_file = project.tasks_file(tasks);
    info!("Planning tasks from {}", tasks_file.display());

    let tasks = YamlTaskStore::new(&tasks_file).tasks()?;
    let scheduler = Scheduler::new().with_max_workers(project.config.execution.max_workers.max(1));
    let plan = scheduler.plan(&tasks)?;

    if plan.is_empty() {
        println!("{}", "Nothing to run".yellow());
    }
    for (i, batch) in plan.iter().enumerate() {
        println!("{} {}", format!("Batch {}:", i + 1).green(), batch.ids().join(", "));
    }

    let stranded = scheduler.stranded(&tasks)?;
    if !stranded.is_empty() {
        println!("{} {}", "Stranded:".red(), stranded.join(", "));
    }
    Ok(())
}

fn handle_status_command(project: &Project, tasks: Option<&PathBuf>, detailed: bool) -> Result<()> {
    let tasks_file = project.tasks_file(tasks);
    info!("Status for {} (detailed: {})", tasks_file.display(), detailed);

    if tasks_file.exists() {
        for feature in YamlTaskStore::new(&tasks_file).load()? {
            println!(
                "{} {} [{}] {:.0}%",
                feature.id.bold(),
                feature.name,
                colorize(feature.status()),
                feature.progress() * 100.0
            );
            for task in &feature.tasks {
                println!("  {:<12} {:<24} {}", task.id, colorize(task.status), task.name);
                if detailed {
                    for change in &task.history {
                        println!(
                            "      {} {} -> {}{}",
                            change.at.format("%Y-%m-%d %H:%M:%S"),
                            change.from,
                            change.to,
                            change.reason.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default()
                        );
                    }
                }
            }
        }
    } else {
        println!("{} {}", "No task file at".yellow(), tasks_file.display());
    }

    let breaker = project.breaker()?;
    let state = match breaker.state() {
        CircuitState::Closed => breaker.state().to_string().green(),
        CircuitState::HalfOpen => breaker.state().to_string().yellow(),
        CircuitState::Open => breaker.state().to_string().red(),
    };
    println!("{} {} {}", "Circuit breaker:".cyan(), state, breaker.status());
    Ok(())
}

fn colorize(status: TaskStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        TaskStatus::Completed => text.green(),
        TaskStatus::InProgress => text.cyan(),
        TaskStatus::Blocked => text.red(),
        TaskStatus::AtRisk => text.yellow(),
        _ => text.normal(),
    }
}

fn handle_reset_command(project: &Project, reason: &str) -> Result<()> {
    info!("Resetting circuit breaker: {}", reason);
    let mut breaker = project.breaker()?;
    breaker.reset(reason)?;
    println!("{} {}", "Circuit breaker reset:".green(), reason);
    Ok(())
}

fn handle_analyze_command(file: &Path) -> Result<()> {
    info!("Analyzing transcript {}", file.display());
    let output = fs::read_to_string(file).context(format!("Failed to read {}", file.display()))?;
    let result = ResponseAnalyzer::new().analyze(&output);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn handle_conflicts_command(project: &Project) -> Result<()> {
    let workspaces = project.workspaces()?;
    let mut detector = ConflictDetector::new();

    for entry in workspaces.list()? {
        let Some(task_id) = entry.branch.as_deref().and_then(|b| b.strip_prefix(BRANCH_PREFIX)) else {
            continue;
        };
        let ws = Workspace {
            task_id: task_id.to_string(),
            base_path: workspaces.repo_root().to_path_buf(),
            work_path: entry.path.clone(),
            branch: workspaces.branch_name(task_id),
            shared: false,
        };
        let files = workspaces.get_branch_changes(&ws)?;
        let diff = workspaces.get_branch_diff(&ws)?;
        detector.add(task_id, TaskChanges::new(files, diff));
    }

    if detector.is_empty() {
        println!("{}", "No task worktrees found".yellow());
        return Ok(());
    }

    let conflicts = detector.analyze();
    if conflicts.is_empty() {
        println!("{} across {} branches", "No conflicts".green(), detector.len());
    }
    for conflict in &conflicts {
        let label = if conflict.can_auto_resolve {
            "auto".green()
        } else {
            "manual".red()
        };
        println!("[{}] {}", label, conflict);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
