//! message-dispatcher CLI: forward queued messages to an HTTP endpoint or a
//! unix socket.

use clap::{Parser, Subcommand};
use message_dispatcher::config::{Config, Destination, DispatchConfig, ExposeSecret};
use message_dispatcher::db::Db;
use message_dispatcher::dispatch::Coordinator;
use message_dispatcher::sink;
use message_dispatcher::source::pgmq::{PgmqSource, PgmqSourceConfig, payload_for};
use message_dispatcher::telemetry::{TelemetryConfig, init_telemetry};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "message-dispatcher", about = "Forward queued messages to a sink")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume a queue and forward every message
    Run {
        /// Queue name
        #[arg(short, long, env = "DISPATCH_QUEUE")]
        queue: String,
        /// Destination URI: http(s)://... or unix:/path/to.sock
        #[arg(long, env = "DISPATCH_TO")]
        to: String,
        /// Number of concurrent workers
        #[arg(short = 'n', long, default_value_t = 1)]
        concurrency: usize,
        /// Stop a worker after this many idle seconds (0 disables)
        #[arg(long, default_value_t = 0)]
        idle_timeout: u64,
        /// Requeue messages the sink failed to take
        #[arg(long)]
        requeue: bool,
        /// Stop a worker after its first forward failure
        #[arg(long)]
        fail_fast: bool,
        /// Seconds a read message stays invisible to other consumers
        #[arg(long, default_value_t = 60)]
        visibility_timeout: i32,
        /// Milliseconds between polls of an empty queue
        #[arg(long, default_value_t = 1000)]
        poll_interval_ms: u64,
    },
    /// Enqueue one message
    Send {
        /// Queue name
        #[arg(short, long, env = "DISPATCH_QUEUE")]
        queue: String,
        /// Content type forwarded with the body
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
        /// Seconds before the message becomes visible
        #[arg(long, default_value_t = 0)]
        delay: i32,
        /// Message body
        body: String,
    },
    /// Queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Create a queue (idempotent)
    Create {
        /// Queue name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            queue,
            to,
            concurrency,
            idle_timeout,
            requeue,
            fail_fast,
            visibility_timeout,
            poll_interval_ms,
        } => {
            let dispatch = DispatchConfig {
                concurrency,
                requeue_failed: requeue,
                fail_fast,
                ..Default::default()
            }
            .with_idle_timeout(Duration::from_secs(idle_timeout));
            let source = PgmqSourceConfig {
                queue,
                visibility_timeout,
                poll_interval: Duration::from_millis(poll_interval_ms),
            };
            cmd_run(source, &to, dispatch).await
        }
        Command::Send {
            queue,
            content_type,
            delay,
            body,
        } => {
            let db = connect(1).await?;
            db.create_queue(&queue).await?;
            let msg_id = db
                .send_to_queue(&queue, &payload_for(&body, &content_type), delay)
                .await?;
            println!("Sent: {msg_id} (queue: {queue})");
            Ok(ExitCode::SUCCESS)
        }
        Command::Queue {
            action: QueueAction::Create { name },
        } => {
            let db = connect(1).await?;
            db.create_queue(&name).await?;
            println!("Created: {name}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn connect(max_connections: u32) -> anyhow::Result<Db> {
    let config = Config::from_env()?;
    Ok(Db::connect(config.database_url.expose_secret(), max_connections).await?)
}

async fn cmd_run(
    source_config: PgmqSourceConfig,
    to: &str,
    dispatch: DispatchConfig,
) -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "message-dispatcher".to_string(),
        log_level: config.log_level.clone(),
    })?;

    dispatch.validate()?;
    let destination = Destination::parse(to)?;
    let sink = sink::from_destination(&destination)?;

    let db = Db::connect(
        config.database_url.expose_secret(),
        dispatch.concurrency as u32 + 1,
    )
    .await?;
    db.health_check().await?;
    db.create_queue(&source_config.queue).await?;

    info!(queue = %source_config.queue, "consuming queue");
    info!(%destination, "forwarding to");

    let pump_shutdown = CancellationToken::new();
    let (source, stream) = PgmqSource::new(db, source_config, pump_shutdown.clone());
    let pump = source.spawn();

    let summary = Coordinator::new(stream, sink, dispatch)
        .run(shutdown_signal())
        .await?;

    pump_shutdown.cancel();
    if let Err(e) = pump.await {
        warn!("pgmq source task failed: {e}");
    }

    Ok(ExitCode::from(summary.exit_code()))
}

/// Resolves on Ctrl-C, or SIGQUIT on unix.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let quit = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::quit()) {
            Ok(mut quit) => {
                quit.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGQUIT: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let quit = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("received interrupt signal"),
        _ = quit => info!("received QUIT signal"),
    }
}
