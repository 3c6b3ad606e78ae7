use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roundtable_models::SessionEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "roundtable", about = "Multi-agent trading deliberation")]
struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one session and stream its events to stdout as JSON lines
    Run {
        /// Path to configuration file (.json or .toml)
        #[arg(short, long, default_value = "config/roundtable.toml")]
        config: String,

        /// Session input JSON (topic, context, image_paths, history)
        #[arg(short, long)]
        input: String,

        /// Session id; generated when omitted
        #[arg(long)]
        session_id: Option<String>,

        /// SQLite archive to record the session in
        #[arg(long)]
        archive: Option<String>,
    },
    /// Print the archived events of a session
    Replay {
        #[arg(long)]
        archive: String,

        #[arg(long)]
        session_id: String,
    },
    /// List archived sessions with their status
    Sessions {
        #[arg(long)]
        archive: String,
    },
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_event(event: &SessionEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            input,
            session_id,
            archive,
        } => {
            let code = run(&config, &input, session_id, archive.as_deref()).await?;
            std::process::exit(code);
        }
        Command::Replay {
            archive,
            session_id,
        } => {
            let archive = roundtable::open_archive(&archive)?;
            let events = archive
                .replay(&session_id)
                .await
                .with_context(|| format!("Failed to replay session {session_id}"))?;
            for event in events.iter() {
                print_event(event)?;
            }
        }
        Command::Sessions { archive } => {
            let archive = roundtable::open_archive(&archive)?;
            for row in archive.sessions()? {
                println!(
                    "{}",
                    serde_json::json!({
                        "session_id": row.session_id,
                        "status": row.status,
                        "created_at": row.created_at,
                        "updated_at": row.updated_at,
                    })
                );
            }
        }
    }
    Ok(())
}

/// Run a session to completion. Returns the process exit code for its terminal status.
async fn run(
    config_path: &str,
    input_path: &str,
    session_id: Option<String>,
    archive: Option<&str>,
) -> Result<i32> {
    let config = roundtable::load_config(config_path)?;
    let input = roundtable::load_input(input_path)?;
    let manager = roundtable::build_manager(archive)?;

    let session_id = manager
        .start(config, input, session_id)
        .await
        .context("Failed to start session")?;
    info!(session_id = %session_id, "Streaming session events");

    let (history, mut live) = manager.subscribe(&session_id)?;
    let mut finished = false;
    for event in &history {
        print_event(event)?;
        finished |= event.event.is_exit();
    }

    let mut kill_sent = false;
    while !finished {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if !kill_sent => {
                kill_sent = true;
                match signal {
                    Ok(()) => {
                        warn!(session_id = %session_id, "Interrupted; killing session");
                        manager.kill(&session_id)?;
                    }
                    Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
                }
            }
            received = live.recv() => match received {
                Ok(event) => {
                    print_event(&event)?;
                    finished = event.event.is_exit();
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session_id = %session_id, skipped, "Event stream lagged; events dropped from stdout");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let status = manager.wait(&session_id).await?;
    info!(session_id = %session_id, status = status.as_str(), "Session ended");
    Ok(status.exit_code())
}
