use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use sysreview::service::{ReviewApi, ReviewService};
use sysreview::{api, config, logging};
use tokio::net::TcpListener;

/// Section-aware systematic review generation.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Ingest every paper uploaded for a session.
    Ingest {
        /// Session directory name under the uploads root.
        session: String,
    },
    /// Generate a review over a session's papers.
    Generate {
        /// Session directory name under the uploads root.
        session: String,
        /// Review question.
        #[arg(long)]
        prompt: String,
        /// Write the review here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();
    let config = config::load().context("invalid configuration")?;
    let service = ReviewService::from_config(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let app = api::create_router(Arc::new(service));
            let (listener, port) = bind_listener(config.server_port).await.context("failed to bind listener")?;
            tracing::info!("Listening on http://0.0.0.0:{}", port);
            axum::serve(listener, app).await.context("server error")?;
        }
        Command::Ingest { session } => {
            let reports = service.ingest_session(&session).await?;
            serde_json::to_writer_pretty(std::io::stdout(), &reports)?;
        }
        Command::Generate {
            session,
            prompt,
            output,
        } => {
            let review = service.generate(&session, &prompt).await?;
            let text = review.compose();
            match output {
                Some(path) => {
                    tokio::fs::write(&path, text)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "Review written");
                }
                None => {
                    use std::io::Write;
                    writeln!(std::io::stdout(), "{text}")?;
                }
            }
        }
    }
    Ok(())
}

async fn bind_listener(fixed_port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    if let Some(port) = fixed_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 5000..=5099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 5000-5099",
    ))
}
