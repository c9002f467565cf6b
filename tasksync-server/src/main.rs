use clap::Parser;
use colored::*;
use tasksync_server::{router, AppState, ServerError, TaskRepository, DEFAULT_FEED_BUFFER};

#[derive(Parser)]
#[command(name = "tasksync-server")]
#[command(about = "Reference task store with a live change feed", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind: String,

    /// tracing filter directives
    #[arg(long, env = "RUST_LOG", default_value = "tasksync_server=debug,tower_http=debug")]
    log_filter: String,

    /// Events buffered per change-feed subscriber before it is evicted
    #[arg(long, default_value_t = DEFAULT_FEED_BUFFER)]
    feed_buffer: usize,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_filter))
        .init();

    let state = AppState {
        repo: TaskRepository::new(),
        feed_buffer: args.feed_buffer.max(1),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    tracing::info!("{} {}", "Task sync server listening on".bold().cyan(), args.bind);

    axum::serve(listener, app).await?;
    Ok(())
}
