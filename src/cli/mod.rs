// CLI module - Foreground runner for project files

mod output;

use crate::config::{ProcessDefinition, ProjectFile};
use crate::error::{LaunchError, Result};
use crate::events::{ChannelSink, Notification};
use crate::process::{ProcessId, ProcessSupervisor, ResourceSampler};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Launchkit - run and supervise the processes of a project
#[derive(Parser)]
#[command(name = "launchkit")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the processes of a project and supervise them until Ctrl-C
    Run {
        /// Path to the project file (.toml or .json)
        project: PathBuf,

        /// Only start the named processes
        #[arg(long = "only")]
        only: Vec<String>,

        /// Print notifications as JSON lines
        #[arg(long)]
        json: bool,

        /// Seconds between resource tables (0 disables)
        #[arg(long, default_value = "5")]
        stats_secs: u64,

        /// Extra environment variables for every process (KEY=VALUE format)
        #[arg(short, long)]
        env: Vec<String>,
    },

    /// Validate a project file and print its processes
    Check {
        /// Path to the project file (.toml or .json)
        project: PathBuf,
    },
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Check { project } => {
                let project = ProjectFile::from_file(&project)?;
                output::print_definitions(&project);
                Ok(())
            }
            Commands::Run {
                project,
                only,
                json,
                stats_secs,
                env,
            } => {
                let project = ProjectFile::from_file(&project)?;
                let extra_env = parse_env_vars(&env)?;
                let selected = select_definitions(&project, &only)?;
                run_project(&project, selected, extra_env, json, stats_secs).await
            }
        }
    }
}

/// Pick the definitions named by `--only`, or all of them
fn select_definitions<'a>(
    project: &'a ProjectFile,
    only: &[String],
) -> Result<Vec<&'a ProcessDefinition>> {
    if only.is_empty() {
        return Ok(project.processes.iter().collect());
    }

    only.iter()
        .map(|name| {
            project.find(name).ok_or_else(|| {
                LaunchError::ConfigValidationError(format!(
                    "no process named '{}' in project '{}'",
                    name, project.project_name
                ))
            })
        })
        .collect()
}

async fn run_project(
    project: &ProjectFile,
    definitions: Vec<&ProcessDefinition>,
    extra_env: HashMap<String, String>,
    json: bool,
    stats_secs: u64,
) -> Result<()> {
    let (sink, mut rx) = ChannelSink::new();
    let supervisor = ProcessSupervisor::new(project.settings.clone(), Arc::new(sink));
    let sampler = ResourceSampler::from_backend(project.settings.sampler);

    let mut names: HashMap<ProcessId, String> = HashMap::new();
    for definition in definitions {
        let mut definition = definition.clone();
        definition.env.extend(extra_env.clone());

        let result = supervisor.start_definition(&definition, &project.root);
        match (result.process_id, result.error) {
            (Some(id), _) => {
                if !json {
                    output::print_started(&definition.name, &id);
                }
                names.insert(id, definition.name);
            }
            (None, error) => output::print_error(&format!(
                "{}: {}",
                definition.name,
                error.unwrap_or_else(|| "failed to start".to_string())
            )),
        }
    }

    if names.is_empty() {
        return Err(LaunchError::SpawnError(
            "no process could be started".to_string(),
        ));
    }

    let ids: Vec<ProcessId> = names.keys().cloned().collect();
    let mut stats = tokio::time::interval(Duration::from_secs(stats_secs.max(1)));
    stats.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    stats.tick().await;
    let mut idle_check = tokio::time::interval(Duration::from_millis(200));
    idle_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            notification = rx.recv() => {
                let Some(notification) = notification else { break };
                output::print_notification(&notification, &names, json);
            }
            _ = idle_check.tick() => {
                if supervisor.is_idle() {
                    if !json {
                        output::print_info("All processes have exited");
                    }
                    break;
                }
            }
            _ = stats.tick(), if stats_secs > 0 => {
                let usage = supervisor.sample_resources(&sampler, &ids).await;
                if !json && !usage.is_empty() {
                    output::print_resource_table(&usage, &names);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if !json {
                    output::print_info("Stopping processes...");
                }
                supervisor.stop_all();
                let grace = project.settings.kill_timeout() + Duration::from_secs(1);
                if !supervisor.wait_idle(grace).await {
                    tracing::warn!("Some processes were still running after {:?}", grace);
                }
                break;
            }
        }
    }

    supervisor.stop_all();
    drain(&mut rx, &names, json);
    Ok(())
}

fn drain(rx: &mut UnboundedReceiver<Notification>, names: &HashMap<ProcessId, String>, json: bool) {
    while let Ok(notification) = rx.try_recv() {
        output::print_notification(&notification, names, json);
    }
}

/// Parse environment variables from KEY=VALUE format
fn parse_env_vars(env_vars: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for env_str in env_vars {
        if let Some((key, value)) = env_str.split_once('=') {
            map.insert(key.to_string(), value.to_string());
        } else {
            return Err(LaunchError::ConfigError(format!(
                "Invalid environment variable format: '{}'. Expected KEY=VALUE",
                env_str
            )));
        }
    }

    Ok(map)
}
