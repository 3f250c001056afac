use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stageflow::api::types::RegisterSessionRequest;
use stageflow::app::App;
use stageflow::chat::LocalGateway;
use stageflow::client::ControlPlaneClient;
use stageflow::config::Settings;

#[derive(Parser)]
#[command(name = "sflow")]
#[command(about = "Stage workflow orchestrator for agent sessions")]
struct Cli {
    /// Control plane base URL for client commands
    #[arg(long, global = true, env = "STAGEFLOW_URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control plane
    Serve {
        /// Port for the HTTP control plane
        #[arg(short, long, env = "STAGEFLOW_PORT")]
        port: Option<u16>,
    },
    /// Relay text into a session's backing host
    Relay {
        session: u32,
        text: String,
        /// Thread the text came from
        #[arg(long)]
        thread: Option<String>,
    },
    /// List sessions
    Sessions,
    /// Show one session
    Session { number: u32 },
    /// Register a session created by another process
    Register {
        session: u32,
        thread: String,
        project: String,
        stage: String,
        /// Working directory of the session
        #[arg(long)]
        dir: PathBuf,
        /// Project root, required with --create-project
        #[arg(long)]
        project_path: Option<PathBuf>,
        /// Also create the project and workflow records
        #[arg(long)]
        create_project: bool,
    },
    /// Check control plane status
    Status,
}

/// Initialize tracing with output to stderr (client commands) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "stageflow=debug,tower_http=debug".into()),
    );

    if use_stderr {
        // Client commands print JSON on stdout
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(settings: &Settings, port: u16) -> anyhow::Result<()> {
    tracing::info!("Starting stageflow on port {}", port);
    let app = App::from_settings(settings, Arc::new(LocalGateway::new()));
    app.serve(port).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = !matches!(cli.command, None | Some(Commands::Serve { .. }));
    init_tracing(use_stderr);

    let settings = Settings::from_env();
    let client = ControlPlaneClient::new(cli.url.clone().unwrap_or_else(|| settings.url.clone()));

    match cli.command {
        Some(Commands::Serve { port }) => {
            serve(&settings, port.unwrap_or(settings.port)).await?;
        }
        Some(Commands::Relay {
            session,
            text,
            thread,
        }) => {
            let response = client.relay(session, &text, thread.as_deref()).await?;
            print_json(&response)?;
        }
        Some(Commands::Sessions) => {
            print_json(&client.list_sessions().await?)?;
        }
        Some(Commands::Session { number }) => {
            print_json(&client.get_session(number).await?)?;
        }
        Some(Commands::Register {
            session,
            thread,
            project,
            stage,
            dir,
            project_path,
            create_project,
        }) => {
            let request = RegisterSessionRequest {
                session_number: session,
                thread_id: thread,
                project_name: project,
                stage,
                working_directory: dir,
                project_path,
                create_project,
            };
            print_json(&client.register_session(&request).await?)?;
        }
        Some(Commands::Status) => match client.status().await {
            Ok(status) => print_json(&status)?,
            Err(e) => {
                println!("stageflow is not reachable at {}: {}", client.base_url(), e);
                std::process::exit(1);
            }
        },
        None => {
            serve(&settings, settings.port).await?;
        }
    }

    Ok(())
}
