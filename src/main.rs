use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use bedrock_launcher::{
    LauncherConfig, PackageInstaller, ProcessSupervisor, ServerError, VersionResolver,
    stream::{EventPayload, InstanceEvent},
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "bedrock-launcher", version, about = "Update and run a Bedrock dedicated server")]
struct Cli {
    /// Launcher configuration (JSON)
    #[arg(short, long, default_value = "launcher.json")]
    config: PathBuf,

    /// Start the installed server without checking for updates
    #[arg(long)]
    skip_update: bool,

    /// Print the latest available server version and exit
    #[arg(long, conflicts_with = "skip_update")]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bedrock_launcher=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = LauncherConfig::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if cli.check {
        let resolved = VersionResolver::new(&config)?
            .check_available_version()
            .await?;
        println!("{}", resolved.version);
        return Ok(());
    }

    if cli.skip_update {
        info!("Skipping update check");
    } else {
        let report = PackageInstaller::new(&config)?.update().await?;
        info!(
            "{} is at {} ({} files written)",
            config.world_name, report.resolved.version, report.summary.extracted
        );
    }

    let mut supervisor = ProcessSupervisor::new_with_config(&config);
    let mut events = supervisor.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(InstanceEvent {
                    payload: EventPayload::StdLine { line },
                    ..
                }) => println!("{line}"),
                Ok(InstanceEvent {
                    payload: EventPayload::Notice { message },
                    ..
                }) => println!("{message}"),
                Ok(_) => {}
                Err(e) => warn!("Console output lagged: {}", e),
            }
        }
    });

    supervisor.start()?;

    let mut console = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut exit_poll = tokio::time::interval(EXIT_POLL);

    let code = loop {
        tokio::select! {
            line = console.next_line() => {
                let Some(line) = line? else {
                    break shutdown(&mut supervisor).await?;
                };
                let command = line.trim();
                if command.is_empty() {
                    continue;
                }
                if command == "stop" {
                    break shutdown(&mut supervisor).await?;
                }
                supervisor.send_command(command)?;
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break shutdown(&mut supervisor).await?;
            }
            _ = exit_poll.tick() => {
                if !supervisor.running() {
                    break supervisor.join().await?;
                }
            }
        }
    };

    // closing the event channel lets the printer flush what is left
    drop(supervisor);
    _ = printer.await;

    info!("Server exited with code {}", code);
    // stdin is read on a blocking thread the runtime cannot cancel
    std::process::exit(code);
}

async fn shutdown(supervisor: &mut ProcessSupervisor) -> Result<i32, ServerError> {
    match supervisor.stop() {
        Ok(()) | Err(ServerError::NotRunning) => {}
        Err(e) => return Err(e),
    }
    supervisor.join().await
}
