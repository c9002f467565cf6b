use clap::{Parser, Subcommand};
use colored::*;
use tasksync_client::{ClientConfig, HttpRemote, TaskOrder, TaskSyncBuilder, TaskUiState, TaskView};
use tasksync_core::{Priority, SyncError, Task, TaskDraft, TaskId};

#[derive(Parser)]
#[command(name = "todo")]
#[command(about = "To-do list backed by a task sync server", long_about = None)]
struct Cli {
    /// Task server base URL
    #[arg(long, env = "TASKSYNC_SERVER", global = true)]
    server: Option<String>,

    /// SQLite URL for the offline cache, e.g. sqlite://tasks.db
    #[arg(long, env = "TASKSYNC_CACHE", global = true)]
    cache: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List all tasks
    List {
        /// Sort HIGH before MEDIUM before LOW
        #[arg(long)]
        by_priority: bool,
    },
    /// Add a task
    Add {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, default_value = "LOW")]
        priority: Priority,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Show one task
    Show { id: String },
    /// Edit a task; omitted fields keep their value
    Update {
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        priority: Option<Priority>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a task
    Delete { id: String },
    /// Delete every task
    Clear,
    /// Print the list every time it changes
    Watch {
        #[arg(long)]
        by_priority: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env()?.with_live_updates(false);
    if let Some(server) = cli.server {
        config = config.with_server_url(server);
    }
    if let Some(cache) = cli.cache {
        config = config.with_cache_url(cache);
    }

    match cli.command {
        Command::List { by_priority } => {
            let view = open(config.with_order(order(by_priority))).await?;
            view.refresh().await?;
            print_state(&view.current_state());
        }
        Command::Add {
            name,
            priority,
            description,
        } => {
            let draft = TaskDraft::default()
                .with_title(name)
                .with_priority(priority)
                .with_description(description);
            let view = open(config).await?;
            let created = view.create(draft).await?;
            println!("{} {}", "Created".green().bold(), render_task(&created));
        }
        Command::Show { id } => {
            let view = open(config).await?;
            let task = find(&view, &id).await?;
            println!("{}", render_task(&task));
            if !task.description().is_empty() {
                println!("    {}", task.description());
            }
        }
        Command::Update {
            id,
            name,
            priority,
            description,
        } => {
            let view = open(config).await?;
            let mut task = find(&view, &id).await?;
            if let Some(name) = name {
                task = task.with_name(name);
            }
            if let Some(priority) = priority {
                task = task.with_priority(priority);
            }
            if let Some(description) = description {
                task = task.with_description(description);
            }
            let updated = view.update(task).await?;
            println!("{} {}", "Updated".yellow().bold(), render_task(&updated));
        }
        Command::Delete { id } => {
            let view = open(config).await?;
            view.delete_id(&TaskId::new(id.clone())).await?;
            println!("{} {}", "Deleted".red().bold(), id);
        }
        Command::Clear => {
            let view = open(config).await?;
            view.delete_all().await?;
            println!("{}", "All tasks deleted".red().bold());
        }
        Command::Watch { by_priority } => {
            let config = config
                .with_order(order(by_priority))
                .with_live_updates(true);
            let view = open(config).await?;
            watch(&view).await;
        }
    }

    Ok(())
}

async fn open(config: ClientConfig) -> Result<TaskView<HttpRemote>, SyncError> {
    TaskSyncBuilder::from_config(config)?.open().await
}

fn order(by_priority: bool) -> TaskOrder {
    if by_priority {
        TaskOrder::Priority
    } else {
        TaskOrder::Created
    }
}

async fn find(view: &TaskView<HttpRemote>, id: &str) -> Result<Task, SyncError> {
    let id = TaskId::from(id);
    let snapshot = view.refresh().await?;
    snapshot
        .get(&id)
        .cloned()
        .ok_or(SyncError::NotFound(id))
}

async fn watch(view: &TaskView<HttpRemote>) {
    let mut state = view.state();
    print_state(&state.borrow_and_update().clone());

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                println!();
                print_state(&current);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

fn print_state(state: &TaskUiState) {
    match state {
        TaskUiState::Loading => println!("{}", "Loading...".dimmed()),
        TaskUiState::Error(message) => {
            println!("{} {}", "Error:".red().bold(), message);
            println!("{}", "Run the command again to retry.".dimmed());
        }
        TaskUiState::Success(tasks) if tasks.is_empty() => {
            println!("{}", "No tasks yet.".dimmed())
        }
        TaskUiState::Success(tasks) => {
            for task in tasks {
                println!("{}", render_task(task));
            }
        }
    }
}

fn render_priority(priority: Priority) -> ColoredString {
    let label = format!("{:<6}", priority.to_string());
    match priority {
        Priority::High => label.red().bold(),
        Priority::Medium => label.yellow(),
        Priority::Low => label.green(),
    }
}

fn render_task(task: &Task) -> String {
    let id = task.id().map(TaskId::as_str).unwrap_or("-");
    format!(
        "{} {} {} {}",
        format!("[{id}]").cyan(),
        render_priority(task.priority()),
        task.name().bold(),
        task.display_date().dimmed()
    )
}
