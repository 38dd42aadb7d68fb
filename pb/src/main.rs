//! probatch CLI entry point

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use tracing::info;

use probatch::cli::{Cli, Command, ConfigCommand};
use probatch::config::Config;
use probatch::daemon::Daemon;
use probatch::events::EventFilter;
use probatch::tasks::TaskConfig;
use problemstore::TaskFilters;

fn setup_logging(cli_log_level: Option<&str>) {
    let level = match cli_log_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref());

    let config = Config::load(cli.config.as_ref())?;
    let daemon = Daemon::build(config)?;

    // Resolve the acting user, creating it on first use
    let user_id = match daemon.deps.db.get_user_by_name(&cli.user)? {
        Some(user) => user.id,
        None => daemon.deps.db.create_user(&cli.user, cli.user == "admin")?,
    };

    let result = dispatch(&daemon, &cli, user_id).await;
    daemon.shutdown().await;
    result
}

async fn dispatch(daemon: &Daemon, cli: &Cli, user_id: i64) -> Result<()> {
    match &cli.command {
        Command::Run {
            problems,
            source,
            target,
            llm,
            no_fetch,
            no_gen,
            no_upload,
            no_solve,
        } => {
            let config = TaskConfig {
                enable_fetch: !no_fetch,
                enable_generation: !no_gen,
                enable_upload: !no_upload,
                enable_solve: !no_solve,
                source_adapter: source.clone(),
                target_adapter: target.clone(),
                problem_adapters: None,
                llm_provider: llm.clone(),
                force: true,
            };

            // Mirror progress to the terminal while the batch runs
            let printer = daemon.deps.events.spawn_subscriber(EventFilter::Class("task"), |event| {
                let line = match event.kind {
                    probatch::EventKind::TaskStarted => format!("task {} started", event.task_id).cyan(),
                    probatch::EventKind::TaskCompleted => format!("task {} completed", event.task_id).green(),
                    probatch::EventKind::TaskFailed => {
                        format!("task {} failed: {}", event.task_id, event.message).red()
                    }
                    probatch::EventKind::TaskCancelled => format!("task {} cancelled", event.task_id).yellow(),
                    _ => return,
                };
                println!("{line}");
            });

            let created = daemon.service.create_tasks(user_id, problems, &config);
            if created.is_empty() {
                return Err(eyre!("no tasks could be created"));
            }
            info!(count = created.len(), "batch created");
            daemon.service.clone().execute_tasks(&created, &config, user_id).await;
            printer.abort();

            for task in &created {
                if let Some(row) = daemon.service.get_task(task.id, user_id, true) {
                    let status = format!("{:?}", row.status);
                    println!(
                        "{}  {}  {}  {}",
                        row.id,
                        row.problem_id,
                        status,
                        row.uploaded_url.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }

        Command::List { search, status, limit } => {
            let filters = TaskFilters {
                search: search.clone(),
                status: status.as_deref().and_then(problemstore::TaskStatus::parse_filter),
                limit: Some(*limit),
                ..Default::default()
            };
            for task in daemon.service.get_user_tasks(user_id, &filters) {
                println!(
                    "{}  {:?}  {}  {}  {}",
                    task.id, task.status, task.stage, task.problem_id, task.created_at
                );
            }
            Ok(())
        }

        Command::Logs { task_id } => {
            let logs = daemon.service.get_task_logs(*task_id, user_id, true);
            if logs.is_empty() {
                println!("{}", "no logs recorded".dimmed());
            }
            for line in logs {
                println!("{line}");
            }
            Ok(())
        }

        Command::Retry { task_id, module } => {
            match daemon.service.clone().retry_task(*task_id, user_id, module, true).await {
                Some(id) => {
                    println!("retrying task {id} ({module})");
                    // Keep the process alive until the retry lands
                    while daemon.service.get_task(id, user_id, true).is_some_and(|t| !t.status.is_terminal()) {
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                    Ok(())
                }
                None => Err(eyre!("task {task_id} cannot be retried")),
            }
        }

        Command::Cancel { task_id } => {
            daemon.service.cancel_task(*task_id);
            println!("task {task_id} cancelled");
            Ok(())
        }

        Command::Delete { task_id } => {
            if daemon.service.delete_task(*task_id, user_id, true) {
                println!("task {task_id} deleted");
                Ok(())
            } else {
                Err(eyre!("task {task_id} not found"))
            }
        }

        Command::Download { task_id, output } => {
            if daemon.service.download_workspace(*task_id, user_id, true, output) {
                println!("workspace written to {}", output.display());
                Ok(())
            } else {
                Err(eyre!("cannot bundle workspace for task {task_id}"))
            }
        }

        Command::Stats => {
            let stats = daemon.service.user_stats(user_id);
            println!("total     {}", stats.total);
            println!("completed {}", format!("{}", stats.completed).green());
            println!("running   {}", stats.running);
            println!("pending   {}", stats.pending);
            println!("failed    {}", format!("{}", stats.failed).red());
            Ok(())
        }

        Command::Config { command } => match command {
            ConfigCommand::SetAdapter { adapter, json } => {
                let value: serde_json::Value =
                    serde_json::from_str(json).context("config must be a JSON object")?;
                daemon
                    .deps
                    .db
                    .set_user_adapter_config(&daemon.deps.secrets, user_id, adapter, &value)?;
                println!("{adapter} config saved");
                Ok(())
            }
            ConfigCommand::GetAdapter { adapter } => {
                match daemon
                    .deps
                    .db
                    .get_user_adapter_config(&daemon.deps.secrets, user_id, adapter)?
                {
                    Some(config) => {
                        println!("{}", serde_json::to_string_pretty(&config)?);
                        Ok(())
                    }
                    None => Err(eyre!("no {adapter} config stored")),
                }
            }
        },
    }
}
