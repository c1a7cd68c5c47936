use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokenrelay_core::{
    client::{ChatClient, SubmissionController, SubmitOutcome},
    config::Config,
    provider_factory::build_inference_client,
    server::{self, AppState},
    telemetry::init_tracing,
};
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(author, version, about = "Streaming relay in front of Bedrock Converse", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Serve {
        #[arg(long, help = "Config file (JSON or TOML)")]
        config: Option<PathBuf>,
        #[arg(long, help = "Listen port; overrides config and PORT")]
        port: Option<u16>,
        #[arg(long, default_value = "info")]
        log_level: String,
        #[arg(long, help = "Emit logs as JSON lines")]
        log_json: bool,
    },
    /// Submit a prompt to a running relay and print fragments live
    Chat {
        #[arg(long, default_value = "http://localhost:4000")]
        url: String,
        #[arg(short, long, help = "Prompt to send")]
        message: String,
    },
    /// Query a running relay's health endpoint
    Health {
        #[arg(long, default_value = "http://localhost:4000")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            log_level,
            log_json,
        } => {
            init_tracing(&log_level, log_json)?;
            let mut cfg = match &config {
                Some(path) => Config::from_path(path)
                    .with_context(|| format!("loading config from {}", path.display()))?,
                None => Config::default(),
            };
            cfg.apply_env(|key| std::env::var(key).ok());
            if let Some(port) = port {
                cfg.server.port = port;
            }

            let client = build_inference_client(&cfg)?;
            let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            server::serve(listener, AppState::new(client, cfg)).await?;
        }
        Commands::Chat { url, message } => {
            let controller = SubmissionController::new(ChatClient::new(&url)?)
                .with_fragment_observer(|fragment| {
                    print!("{fragment}");
                    io::stdout().flush().ok();
                });
            controller.set_prompt(message);

            let canceller = controller.clone();
            let watcher = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    canceller.cancel();
                }
            });
            let outcome = controller.submit().await;
            watcher.abort();

            if !controller.snapshot().response.is_empty() {
                println!();
            }
            eprintln!("[{}]", controller.status_text());
            if matches!(outcome, SubmitOutcome::Errored(_)) {
                std::process::exit(1);
            }
        }
        Commands::Health { url } => {
            let doc = ChatClient::new(&url)?.health().await?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }

    Ok(())
}
