use std::env;
use std::error::Error;
use std::process;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};

use taskboard_lib::gateway::{RestTaskRepository, TokenSource};
use taskboard_lib::models::ProfilePatch;
use taskboard_lib::{
    group_by_status, AppStore, BoardSummary, Config, LoadMode, PasswordAuth, ProfileClient,
    SessionBridge, Task, TaskCache, TaskDraft, TaskStatus,
};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(about = "Personal task board client", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show tasks grouped by status
    Board {
        /// Only tasks with this status, as filtered by the server
        #[arg(long)]
        status: Option<TaskStatus>,

        /// Keep running and reprint the board on every change
        #[arg(long)]
        watch: bool,
    },

    /// Show the dashboard counters
    Dashboard,

    /// Add a task
    Add {
        title: String,

        #[arg(long)]
        description: Option<String>,

        /// Due date, e.g. 2024-05-05T19:00 or 2024-05-05
        #[arg(long)]
        due: Option<String>,

        #[arg(long, default_value = "waiting")]
        status: TaskStatus,
    },

    /// Move a task to another status
    Status { id: String, status: TaskStatus },

    /// Delete a task
    Delete { id: String },

    /// Show the profile, or update it when any field is given
    Profile {
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        photo_url: Option<String>,
    },

    /// Create an account (password from TASKBOARD_PASSWORD and TASKBOARD_PASSWORD_CONFIRM)
    Register {
        email: String,

        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    taskboard_lib::init_logging();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult {
    let config = Config::from_env()?;
    let auth = Arc::new(PasswordAuth::from_config(&config)?);

    if let Commands::Register { email, name } = &cli.command {
        let password = required_env("TASKBOARD_PASSWORD")?;
        let confirm = required_env("TASKBOARD_PASSWORD_CONFIRM")?;
        let user = auth
            .register(email, &password, &confirm, name.as_deref())
            .await?;
        println!("Registered {} ({})", user.display_name(), user.uid);
        return Ok(());
    }

    let email = required_env("TASKBOARD_EMAIL")?;
    let password = required_env("TASKBOARD_PASSWORD")?;
    let user = auth.sign_in(&email, &password).await?;

    let tokens: Arc<dyn TokenSource> = auth.clone();
    let repository = RestTaskRepository::new(config.api_url.as_str(), Arc::clone(&tokens))
        .with_poll_interval(config.poll_interval);

    if let Commands::Board {
        status: Some(status),
        ..
    } = &cli.command
    {
        let tasks = repository.fetch_with_status(Some(*status)).await?;
        print_board(&tasks);
        return Ok(());
    }

    let mut store = AppStore::new(Arc::new(repository));
    if let Some(dir) = &config.cache_dir {
        store = store.with_cache(TaskCache::in_dir(dir));
    }
    let store = Arc::new(store);

    let watching = matches!(cli.command, Commands::Board { watch: true, .. });
    let bridge = SessionBridge::new(Arc::clone(&store), load_mode(config.load_mode, watching));
    bridge.handle_event(auth.current_identity()).await;
    if !watching {
        // Subscribed loads complete in the background.
        store.watch().wait_for(|state| !state.is_loading).await?;
    }

    match cli.command {
        Commands::Board { watch: true, .. } => watch_board(&store).await?,
        Commands::Board { .. } => {
            report(&store)?;
            print_board(&store.snapshot().tasks);
        }
        Commands::Dashboard => {
            report(&store)?;
            let summary = BoardSummary::compute(&store.snapshot().tasks, Utc::now());
            println!("Hello, {}", user.display_name());
            println!("  total        {}", summary.total);
            println!("  waiting      {}", summary.waiting);
            println!("  in progress  {}", summary.in_progress);
            println!("  completed    {} ({}%)", summary.completed, summary.completed_percent);
            println!("  overdue      {}", summary.overdue);
            println!("  next 7 days  {}", summary.upcoming);
        }
        Commands::Add {
            title,
            description,
            due,
            status,
        } => {
            let draft = TaskDraft {
                title,
                description,
                due,
                status,
            };
            match store.add_task(draft).await {
                Some(task) => println!("Added {}", task.id),
                None => report(&store)?,
            }
        }
        Commands::Status { id, status } => {
            if !store.update_task_status(&id, status).await {
                report(&store)?;
                return Err(format!("no task {}", id).into());
            }
            println!("{} is now {}", id, status);
        }
        Commands::Delete { id } => {
            if !store.delete_task(&id).await {
                report(&store)?;
                return Err(format!("no task {}", id).into());
            }
            println!("Deleted {}", id);
        }
        Commands::Profile {
            name,
            phone,
            location,
            photo_url,
        } => {
            let profiles = ProfileClient::new(config.api_url.as_str(), tokens);
            let patch = ProfilePatch {
                display_name: name,
                phone,
                location,
                photo_url,
            };
            let profile = if patch.is_empty() {
                profiles.ensure_profile(&user).await?
            } else {
                profiles.ensure_profile(&user).await?;
                profiles.update_profile(&user.uid, &patch).await?
            };
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        Commands::Register { .. } => {}
    }
    Ok(())
}

async fn watch_board(store: &AppStore) -> CliResult {
    let mut changes = store.watch();
    loop {
        {
            let state = changes.borrow_and_update();
            if !state.is_loading {
                print_board(&state.tasks);
            }
        }
        tokio::select! {
            changed = changes.changed() => changed?,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_board(tasks: &[Task]) {
    for (status, column) in group_by_status(tasks) {
        println!("{} ({})", status, column.len());
        for task in column {
            match &task.due {
                Some(due) => println!("  {}  {}  due {}", task.id, task.title, due),
                None => println!("  {}  {}", task.id, task.title),
            }
        }
    }
}

/// The configured load mode; watching always needs a subscription.
fn load_mode(configured: LoadMode, watching: bool) -> LoadMode {
    if watching {
        LoadMode::Subscribe
    } else {
        configured
    }
}

/// Turns an error recorded by the store into a command failure.
fn report(store: &AppStore) -> CliResult {
    match store.snapshot().error {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}

fn required_env(key: &str) -> Result<String, Box<dyn Error>> {
    env::var(key).map_err(|_| format!("{} is not set", key).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watching_forces_a_subscription() {
        assert_eq!(load_mode(LoadMode::Fetch, false), LoadMode::Fetch);
        assert_eq!(load_mode(LoadMode::Subscribe, false), LoadMode::Subscribe);
        assert_eq!(load_mode(LoadMode::Fetch, true), LoadMode::Subscribe);
    }
}
